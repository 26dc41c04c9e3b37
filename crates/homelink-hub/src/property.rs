//! Device properties — sensors and events in the voice-assistant schema.
//!
//! Float properties report a numeric value, optionally scaled by a divider
//! (e.g. Pa → mmHg). Event properties map declared hub values onto wire
//! event names and ignore everything else.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

const FLOAT: &str = "devices.properties.float";
const EVENT: &str = "devices.properties.event";

/// A single sensor on an endpoint.
#[derive(Debug, Clone)]
pub struct Property {
    wire_type: &'static str,
    instance: String,
    divider: f64,
    /// Static descriptor shipped in discovery.
    pub parameters: Map<String, Value>,
    /// Event properties: hub value → wire event name.
    events: BTreeMap<String, String>,
    /// Last observed hub value; `None` until the first report.
    pub value: Option<Value>,
    /// Set when a telemetry update changed `value`.
    pub updated: bool,
}

impl Property {
    fn float(instance: &str, unit: &str, divider: f64) -> Self {
        let mut parameters = Map::new();

        if !unit.is_empty() {
            parameters.insert("unit".into(), json!(unit));
        }

        parameters.insert("instance".into(), json!(instance));

        Self {
            wire_type: FLOAT,
            instance: instance.into(),
            divider,
            parameters,
            events: BTreeMap::new(),
            value: None,
            updated: false,
        }
    }

    fn event(instance: &str, events: BTreeMap<String, String>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("instance".into(), json!(instance));
        parameters.insert(
            "events".into(),
            json!(events
                .values()
                .map(|event| json!({ "value": event }))
                .collect::<Vec<_>>()),
        );

        Self {
            wire_type: EVENT,
            instance: instance.into(),
            divider: 0.0,
            parameters,
            events,
            value: None,
            updated: false,
        }
    }

    /// Button events, built from the actions the hub's enum declares.
    pub fn button(actions: &[Value]) -> Self {
        let mut events = BTreeMap::new();

        for (action, event) in [
            ("singleClick", "click"),
            ("doubleClick", "double_click"),
            ("hold", "long_press"),
        ] {
            if actions.contains(&json!(action)) {
                events.insert(action.into(), event.into());
            }
        }

        Self::event("button", events)
    }

    /// Two-state event property driven by a boolean hub value.
    pub fn binary(instance: &str, on: &str, off: &str) -> Self {
        Self::event(
            instance,
            BTreeMap::from([("true".into(), on.into()), ("false".into(), off.into())]),
        )
    }

    pub fn vibration() -> Self {
        Self::event(
            "vibration",
            BTreeMap::from([
                ("vibration".into(), "vibration".into()),
                ("tilt".into(), "tilt".into()),
                ("drop".into(), "fall".into()),
            ]),
        )
    }

    pub fn temperature() -> Self {
        Self::float("temperature", "unit.temperature.celsius", 0.0)
    }

    pub fn pressure() -> Self {
        Self::float("pressure", "unit.pressure.mmhg", 0.1333)
    }

    pub fn humidity() -> Self {
        Self::float("humidity", "unit.percent", 0.0)
    }

    pub fn co2() -> Self {
        Self::float("co2_level", "unit.ppm", 0.0)
    }

    pub fn pm1() -> Self {
        Self::float("pm1_density", "unit.density.mcg_m3", 0.0)
    }

    pub fn pm10() -> Self {
        Self::float("pm10_density", "unit.density.mcg_m3", 0.0)
    }

    pub fn pm25() -> Self {
        Self::float("pm2.5_density", "unit.density.mcg_m3", 0.0)
    }

    pub fn voc() -> Self {
        Self::float("tvoc", "unit.density.mcg_m3", 0.0)
    }

    pub fn illuminance() -> Self {
        Self::float("illumination", "unit.illumination.lux", 0.0)
    }

    pub fn volume() -> Self {
        Self::float("water_meter", "unit.cubic_meter", 1000.0)
    }

    pub fn energy() -> Self {
        Self::float("electricity_meter", "unit.kilowatt_hour", 0.0)
    }

    pub fn voltage() -> Self {
        Self::float("voltage", "unit.volt", 0.0)
    }

    pub fn current() -> Self {
        Self::float("amperage", "unit.ampere", 0.0)
    }

    pub fn power() -> Self {
        Self::float("power", "unit.watt", 0.0)
    }

    pub fn battery() -> Self {
        Self::float("battery_level", "unit.percent", 0.0)
    }

    /// Voice-assistant property URI.
    pub fn wire_type(&self) -> &'static str {
        self.wire_type
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Apply a telemetry value. Returns whether anything changed; event
    /// properties reject values outside their declared set.
    pub fn update(&mut self, value: &Value) -> bool {
        if self.value.as_ref() == Some(value) {
            return false;
        }

        if self.wire_type == EVENT && !self.events.contains_key(&loose_string(value)) {
            return false;
        }

        self.value = Some(value.clone());
        self.updated = true;
        true
    }

    /// Edge-triggered events (button, vibration) are cleared once reported.
    pub fn clear_value(&mut self) {
        self.value = None;
    }

    /// Current state object. Only meaningful once a value has been observed.
    pub fn state(&self) -> Value {
        let value = match &self.value {
            Some(value) if self.wire_type == EVENT => {
                json!(self.events.get(&loose_string(value)))
            }
            Some(value) if self.divider > 0.0 => {
                json!(value.as_f64().unwrap_or(0.0) / self.divider)
            }
            Some(value) => value.clone(),
            None => Value::Null,
        };

        json!({ "instance": self.instance, "value": value })
    }
}

/// Hub values keyed into the events map may arrive as strings, booleans, or
/// numbers; compare them the way the hubs print them.
fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_applies_divider() {
        let mut pressure = Property::pressure();
        assert!(pressure.update(&json!(101.3)));

        let state = pressure.state();
        let value = state["value"].as_f64().unwrap();
        assert!((value - 101.3 / 0.1333).abs() < 1e-9);
    }

    #[test]
    fn float_without_divider_passes_value_through() {
        let mut temperature = Property::temperature();
        temperature.update(&json!(21.5));
        assert_eq!(temperature.state(), json!({ "instance": "temperature", "value": 21.5 }));
    }

    #[test]
    fn event_rejects_undeclared_values() {
        let mut button = Property::button(&[json!("singleClick"), json!("hold")]);

        assert!(!button.update(&json!("doubleClick")));
        assert!(button.value.is_none());

        assert!(button.update(&json!("hold")));
        assert_eq!(button.state(), json!({ "instance": "button", "value": "long_press" }));
    }

    #[test]
    fn repeated_value_is_not_a_change() {
        let mut humidity = Property::humidity();
        assert!(humidity.update(&json!(40)));
        humidity.updated = false;

        assert!(!humidity.update(&json!(40)));
        assert!(!humidity.updated);
    }

    #[test]
    fn binary_maps_booleans_and_strings() {
        let mut contact = Property::binary("open", "opened", "closed");
        contact.update(&json!(true));
        assert_eq!(contact.state(), json!({ "instance": "open", "value": "opened" }));

        contact.update(&json!("false"));
        assert_eq!(contact.state(), json!({ "instance": "open", "value": "closed" }));
    }

    #[test]
    fn declared_events_are_listed_in_parameters() {
        let vibration = Property::vibration();
        assert_eq!(
            vibration.parameters.get("events"),
            Some(&json!([
                { "value": "fall" },
                { "value": "tilt" },
                { "value": "vibration" },
            ]))
        );
    }
}
