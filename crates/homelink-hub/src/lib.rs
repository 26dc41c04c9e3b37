//! # homelink-hub
//!
//! The hub-facing TCP surface of HomeLink. Hubs behind NAT dial in, run a
//! Diffie–Hellman handshake, authorize with their user's client token, and
//! then exchange encrypted, byte-stuffed JSON envelopes carrying the device
//! inventory and telemetry:
//!
//! - connection accept and per-session tasks
//! - framing codec and cipher chains
//! - the capability/property model and the expose translator
//! - device roster and telemetry demultiplexing

pub mod capability;
pub mod codec;
pub mod device;
pub mod events;
pub mod expose;
pub mod property;
pub mod session;

pub use events::HubEvent;
pub use session::SessionHandle;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Hard deadline for a connection to complete handshake and authorization.
pub const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Claims hub sessions for users by their client token.
///
/// Implemented by the user registry; the hub crate stays ignorant of users
/// beyond the name it tags log lines and events with.
pub trait SessionAuthorizer: Send + Sync {
    /// Attach `session` to the user owning `token`. Returns the user's name,
    /// or `None` when no user claims the token (the session then closes).
    fn authorize(&self, token: &[u8], session: &Arc<SessionHandle>) -> Option<String>;

    /// The session disconnected; detach it from its user.
    fn release(&self, session: &Arc<SessionHandle>);
}

/// The hub TCP listener.
pub struct HubServer {
    authorizer: Arc<dyn SessionAuthorizer>,
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubServer {
    pub fn new(
        authorizer: Arc<dyn SessionAuthorizer>,
        events: mpsc::UnboundedSender<HubEvent>,
    ) -> Self {
        Self { authorizer, events }
    }

    /// Accept hub connections forever, one task per session.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!("Hub server listening on {}", listener.local_addr()?);

        loop {
            let (socket, peer) = listener.accept().await?;
            tracing::debug!(%peer, "Hub connected");

            tokio::spawn(session::run(
                socket,
                self.authorizer.clone(),
                self.events.clone(),
            ));
        }
    }
}
