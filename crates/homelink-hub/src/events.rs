//! Events a hub session emits toward the bridge controller.
//!
//! Sessions assemble the upstream-ready payload fragments themselves (they
//! own the device state); the consumer only wraps and forwards them.

use serde_json::Value;

/// Session → controller notifications.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// The device roster changed; upstream should re-run discovery.
    DevicesUpdated { user: String },

    /// Telemetry changed; `devices` holds one entry per affected endpoint
    /// with the changed capability and property states.
    DataUpdated { user: String, devices: Vec<Value> },
}
