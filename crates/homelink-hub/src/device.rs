//! Devices and endpoints as a session sees them.
//!
//! A device is keyed `<service>/<id>` within its session and carries the
//! endpoints the hub's expose description produced. Endpoints hold the
//! translated capabilities and properties; the owning device is implicit
//! (publishes take the device topic alongside the endpoint), so there is no
//! back-reference to cycle-manage.

use crate::capability::Capability;
use crate::expose;
use crate::property::Property;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A numeric sub-address within a device.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: u8,
    /// Hubs that address endpoints with `_<n>`-suffixed scalar keys instead
    /// of topic path segments.
    pub numeric: bool,
    /// Voice-assistant device type; assigned once, never overwritten.
    device_type: String,
    pub exposes: Vec<String>,
    pub options: Map<String, Value>,
    /// Emission order is the discovery order seen by clients.
    pub capabilities: Vec<Capability>,
    /// Keyed by the hub-side data key that feeds each property.
    pub properties: BTreeMap<String, Property>,
}

impl Endpoint {
    pub fn new(id: u8, numeric: bool) -> Self {
        Self {
            id,
            numeric,
            device_type: String::new(),
            exposes: Vec::new(),
            options: Map::new(),
            capabilities: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// First writer wins; later rules may add capabilities but not retype.
    pub fn set_type(&mut self, value: &str) {
        if self.device_type.is_empty() && !value.is_empty() {
            self.device_type = value.to_owned();
        }
    }

    /// Whether discovery should publish this endpoint at all.
    pub fn has_content(&self) -> bool {
        !self.capabilities.is_empty() || !self.properties.is_empty()
    }

    /// State of the capability at `index`, propagating the ThermostatMode →
    /// ThermostatPower on-value link.
    pub fn capability_state(&mut self, index: usize) -> Value {
        let state = self.capabilities[index].state();

        if let Some((power, value)) = self.capabilities[index].thermostat_link() {
            if power < index {
                self.capabilities[power].set_on_value(value);
            }
        }

        state
    }
}

/// A device within one hub session.
#[derive(Debug, Clone)]
pub struct Device {
    pub key: String,
    pub topic: String,
    pub name: String,
    pub description: String,
    pub available: bool,
    pub endpoints: BTreeMap<u8, Endpoint>,
}

impl Device {
    pub fn new(key: &str, topic: &str, name: &str, description: &str) -> Self {
        Self {
            key: key.to_owned(),
            topic: topic.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            available: false,
            endpoints: BTreeMap::new(),
        }
    }

    /// Build endpoints from an `expose/<topic>` message and return the `fd`
    /// subscriptions to issue.
    ///
    /// The message maps endpoint ids to `{items, options}`; an item of the
    /// form `<expose>_<n>` addresses the numeric endpoint `n` instead of the
    /// outer key. Suffixed option keys are filtered to their endpoint.
    pub fn apply_exposes(&mut self, message: &Map<String, Value>) -> Vec<String> {
        let mut subscriptions = Vec::new();

        for (outer, entry) in message {
            let options = entry
                .get("options")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let items = entry
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for item in items.iter().filter_map(Value::as_str) {
                let mut parts = item.splitn(2, '_');
                let expose = parts.next().unwrap_or_default();
                let suffix = parts.next();
                let id: u8 = suffix.unwrap_or(outer.as_str()).parse().unwrap_or_default();

                let endpoint = self.endpoints.entry(id).or_insert_with(|| {
                    let mut endpoint = Endpoint::new(id, suffix.is_some());

                    for (key, value) in &options {
                        let mut parts = key.splitn(2, '_');
                        let base = parts.next().unwrap_or_default();

                        if let Some(option_suffix) = parts.next() {
                            if option_suffix.parse::<u8>().unwrap_or_default() != id {
                                continue;
                            }
                        }

                        endpoint.options.insert(base.to_owned(), value.clone());
                    }

                    endpoint
                });

                if let Some(explicit) = options.get("cloudType").and_then(Value::as_str) {
                    endpoint.set_type(explicit);
                }

                if !endpoint.exposes.iter().any(|e| e == expose) {
                    endpoint.exposes.push(expose.to_owned());
                }

                let mut subscription = format!("fd/{}", self.topic);

                if endpoint.id != 0 && !endpoint.numeric {
                    subscription.push_str(&format!("/{}", endpoint.id));
                }

                if !subscriptions.contains(&subscription) {
                    subscriptions.push(subscription);
                }
            }
        }

        for endpoint in self.endpoints.values_mut() {
            expose::parse_exposes(endpoint);
        }

        subscriptions
    }

    /// Route an `fd` telemetry message into capabilities and properties.
    /// Keys of the form `<instance>_<n>` address endpoint `n`; bare keys use
    /// the endpoint the topic addressed. Returns whether anything changed.
    pub fn apply_update(&mut self, default_endpoint: u8, message: &Map<String, Value>) -> bool {
        let mut changed = false;

        for (key, value) in message {
            let mut parts = key.splitn(2, '_');
            let instance = parts.next().unwrap_or_default();
            let id = parts
                .next()
                .map_or(default_endpoint, |suffix| suffix.parse().unwrap_or_default());

            let Some(endpoint) = self.endpoints.get_mut(&id) else {
                continue;
            };

            for capability in &mut endpoint.capabilities {
                match capability.data.get(instance) {
                    Some(current) if current != value => {
                        capability.data.insert(instance.to_owned(), value.clone());
                        capability.updated = true;
                        changed = true;
                    }
                    _ => {}
                }
            }

            if let Some(property) = endpoint.properties.get_mut(instance) {
                if property.update(value) {
                    changed = true;
                }
            }
        }

        changed
    }
}

/// First device whose key or display topic prefixes `search`. Topics carry
/// either names or ids depending on the hub's `names` flag, so both spaces
/// are probed.
pub fn find_device<'a>(
    devices: &'a mut BTreeMap<String, Device>,
    search: &str,
) -> Option<&'a mut Device> {
    let key = devices
        .values()
        .find(|device| search.starts_with(&device.key) || search.starts_with(&device.topic))?
        .key
        .clone();

    devices.get_mut(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expose_message(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn light_discovery_orders_capabilities() {
        let mut device = Device::new("zigbee/0x01", "zigbee/Bulb", "Bulb", "");
        let subscriptions = device.apply_exposes(&expose_message(json!({
            "0": {
                "items": ["light"],
                "options": { "light": ["level", "color"] },
            }
        })));

        assert_eq!(subscriptions, ["fd/zigbee/Bulb"]);

        let endpoint = &device.endpoints[&0];
        assert_eq!(endpoint.device_type(), "devices.types.light");

        let types: Vec<_> = endpoint
            .capabilities
            .iter()
            .map(Capability::wire_type)
            .collect();
        assert_eq!(
            types,
            [
                "devices.capabilities.on_off",
                "devices.capabilities.range",
                "devices.capabilities.color_setting",
            ]
        );
    }

    #[test]
    fn numeric_suffix_creates_numeric_endpoint() {
        let mut device = Device::new("modbus/1.3", "modbus/relay", "Relay", "");
        let subscriptions = device.apply_exposes(&expose_message(json!({
            "1": {
                "items": ["switch_2"],
                "options": {},
            }
        })));

        // Numeric endpoints fold into the device topic, no path suffix
        assert_eq!(subscriptions, ["fd/modbus/relay"]);

        let endpoint = &device.endpoints[&2];
        assert!(endpoint.numeric);
        assert_eq!(endpoint.id, 2);
        assert_eq!(endpoint.device_type(), "devices.types.switch");
    }

    #[test]
    fn suffixed_options_filter_by_endpoint() {
        let mut device = Device::new("zigbee/0x02", "zigbee/Plug", "Plug", "");
        device.apply_exposes(&expose_message(json!({
            "1": {
                "items": ["switch_1", "switch_2"],
                "options": { "switch_1": "outlet", "switch_2": "relay" },
            }
        })));

        assert_eq!(device.endpoints[&1].device_type(), "devices.types.socket");
        assert_eq!(device.endpoints[&2].device_type(), "devices.types.switch");
    }

    #[test]
    fn path_endpoints_subscribe_with_suffix() {
        let mut device = Device::new("zigbee/0x03", "zigbee/Strip", "Strip", "");
        let subscriptions = device.apply_exposes(&expose_message(json!({
            "1": { "items": ["switch"], "options": {} },
            "2": { "items": ["switch"], "options": {} },
        })));

        assert_eq!(subscriptions, ["fd/zigbee/Strip/1", "fd/zigbee/Strip/2"]);
    }

    #[test]
    fn explicit_cloud_type_wins() {
        let mut device = Device::new("custom/fan", "custom/fan", "Fan", "");
        device.apply_exposes(&expose_message(json!({
            "0": {
                "items": ["switch"],
                "options": { "cloudType": "devices.types.fan" },
            }
        })));

        assert_eq!(device.endpoints[&0].device_type(), "devices.types.fan");
    }

    #[test]
    fn update_routes_by_suffix_and_marks_flags() {
        let mut device = Device::new("zigbee/0x04", "zigbee/Wall", "Wall", "");
        device.apply_exposes(&expose_message(json!({
            "1": { "items": ["switch_1", "switch_2"], "options": {} },
        })));

        let mut message = Map::new();
        message.insert("status_2".into(), json!("on"));
        assert!(device.apply_update(0, &message));

        assert!(!device.endpoints[&1].capabilities[0].updated);
        assert!(device.endpoints[&2].capabilities[0].updated);

        // Same value again is not a change
        let endpoint = device.endpoints.get_mut(&2).unwrap();
        endpoint.capabilities[0].updated = false;
        assert!(!device.apply_update(0, &message));
    }

    #[test]
    fn update_uses_topic_endpoint_for_bare_keys() {
        let mut device = Device::new("zigbee/0x05", "zigbee/Dimmer", "Dimmer", "");
        device.apply_exposes(&expose_message(json!({
            "3": { "items": ["light"], "options": { "light": ["level"] } },
        })));

        let mut message = Map::new();
        message.insert("level".into(), json!(128));
        assert!(device.apply_update(3, &message));
        assert!(device.endpoints[&3].capabilities[1].updated);
    }

    #[test]
    fn find_device_matches_key_and_topic_prefixes() {
        let mut devices = BTreeMap::new();
        devices.insert(
            "zigbee/0x06".to_owned(),
            Device::new("zigbee/0x06", "zigbee/Kitchen Light", "Kitchen Light", ""),
        );

        assert!(find_device(&mut devices, "zigbee/Kitchen Light").is_some());
        assert!(find_device(&mut devices, "zigbee/0x06").is_some());
        assert!(find_device(&mut devices, "zigbee/Kitchen Light/2").is_some());
        assert!(find_device(&mut devices, "zigbee/Hallway").is_none());
    }

    #[test]
    fn instance_names_are_unique_per_endpoint() {
        let mut device = Device::new("zigbee/0x07", "zigbee/Multi", "Multi", "");
        device.apply_exposes(&expose_message(json!({
            "0": {
                "items": ["temperature", "humidity", "pressure", "battery"],
                "options": {},
            }
        })));

        let endpoint = &device.endpoints[&0];
        let mut instances: Vec<_> = endpoint
            .properties
            .values()
            .map(|p| p.instance().to_owned())
            .collect();
        instances.sort();
        instances.dedup();
        assert_eq!(instances.len(), endpoint.properties.len());
    }
}
