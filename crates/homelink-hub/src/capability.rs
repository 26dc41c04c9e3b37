//! Device capabilities — actuators in the voice-assistant schema.
//!
//! Each capability translates between the hub-native partial state held in
//! its `data` map and the voice-assistant state object, in both directions:
//! `state()` renders the current data, `action()` turns an incoming action
//! payload into the hub patch to publish.

use serde_json::{Map, Value, json};

/// Named-color palette: display value the assistant shows → canonical RGB the
/// device is driven with. Primary colors are purified (e.g. "Red" maps to
/// pure 0xFF0000). Ordered ascending by display value; state reporting scans
/// in this order and snaps to the first entry within Euclidean distance 20.
const PALETTE: [(i64, i64); 17] = [
    (673791, 255),           // Blue
    (710399, 65535),         // Cyan
    (720711, 65280),         // Green
    (720813, 720813),        // Emerald
    (720883, 720883),        // Turquoise
    (8719103, 8719103),      // Lavender
    (11340543, 11340543),    // Violet
    (13303562, 13303562),    // Lime
    (15067647, 15067647),    // Moonlight
    (16711765, 16711765),    // Raspberry
    (16714250, 16711680),    // Red
    (16714393, 16714393),    // Orchid
    (16714471, 16714471),    // Purple
    (16722742, 16722742),    // Mauve
    (16727040, 16727040),    // Orange
    (16729907, 16729907),    // Coral
    (16740362, 16740362),    // Yellow
];

/// Color-temperature ladder in Kelvin. Hub-supplied ranges snap outward to
/// the nearest rung on both ends.
const TEMPERATURE_LADDER: [i64; 8] = [1500, 2700, 3400, 4500, 5600, 6500, 7500, 9000];

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Switch,
    Brightness,
    Color { color_mode: bool },
    Curtain,
    Open,
    ThermostatPower { on_value: Value },
    ThermostatMode { value: Value, power: Option<usize> },
    Temperature,
    FanMode,
    HeatMode,
    SwingMode,
}

/// A single actuator on an endpoint.
#[derive(Debug, Clone)]
pub struct Capability {
    kind: Kind,
    /// Static descriptor shipped in discovery.
    pub parameters: Map<String, Value>,
    /// Last hub-side values driving `state()`.
    pub data: Map<String, Value>,
    /// Set when a telemetry update changed `data`; coalesces notifications.
    pub updated: bool,
}

fn mode_list(values: &[Value], allowed: &[&str]) -> Vec<Value> {
    values
        .iter()
        .filter(|value| allowed.contains(&value.as_str().unwrap_or_default()))
        .map(|value| json!({ "value": value }))
        .collect()
}

impl Capability {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            parameters: Map::new(),
            data: Map::new(),
            updated: false,
        }
    }

    pub fn switch() -> Self {
        let mut capability = Self::new(Kind::Switch);
        capability.data.insert("status".into(), Value::Null);
        capability
    }

    pub fn brightness() -> Self {
        let mut capability = Self::new(Kind::Brightness);
        capability.parameters.insert("instance".into(), json!("brightness"));
        capability
            .parameters
            .insert("range".into(), json!({ "min": 1, "max": 100 }));
        capability.parameters.insert("unit".into(), json!("unit.percent"));
        capability.data.insert("level".into(), Value::Null);
        capability
    }

    pub fn color(options: &Map<String, Value>) -> Self {
        let mut capability = Self::new(Kind::Color { color_mode: false });
        let light = options
            .get("light")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if light.contains(&json!("color")) {
            capability.parameters.insert("color_model".into(), json!("rgb"));
            capability.data.insert("color".into(), Value::Null);
        }

        if light.contains(&json!("colorTemperature")) {
            let option = options
                .get("colorTemperature")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            // Hub supplies mireds, the assistant wants Kelvin, so min and max swap
            let min = option
                .get("max")
                .and_then(Value::as_f64)
                .map_or(1500.0, |max| (1e6 / max).round());
            let max = option
                .get("min")
                .and_then(Value::as_f64)
                .map_or(9000.0, |min| (1e6 / min).round());

            let mut range = Map::new();

            for window in TEMPERATURE_LADDER.windows(2) {
                if window[0] as f64 <= min && (window[1] as f64) > min {
                    range.insert("min".into(), json!(window[0]));
                }

                if (window[0] as f64) < max && window[1] as f64 >= max {
                    range.insert("max".into(), json!(window[1]));
                }
            }

            capability
                .parameters
                .insert("temperature_k".into(), Value::Object(range));
            capability.data.insert("colorTemperature".into(), Value::Null);
        }

        if light.contains(&json!("colorMode")) {
            capability.data.insert("colorMode".into(), Value::Null);
        }

        capability
    }

    pub fn curtain() -> Self {
        let mut capability = Self::new(Kind::Curtain);
        capability.data.insert("cover".into(), Value::Null);
        capability
    }

    pub fn open() -> Self {
        let mut capability = Self::new(Kind::Open);
        capability.parameters.insert("instance".into(), json!("open"));
        capability
            .parameters
            .insert("range".into(), json!({ "min": 0, "max": 100 }));
        capability.parameters.insert("unit".into(), json!("unit.percent"));
        capability.data.insert("position".into(), Value::Null);
        capability
    }

    pub fn thermostat_power(on_value: Value) -> Self {
        let mut capability = Self::new(Kind::ThermostatPower { on_value });
        capability.data.insert("systemMode".into(), Value::Null);
        capability
    }

    /// `power` is the index of the sibling [`Capability::thermostat_power`]
    /// whose on-value tracks the last non-off mode.
    pub fn thermostat_mode(modes: &[Value], power: Option<usize>) -> Self {
        let value = modes.first().cloned().unwrap_or(Value::Null);
        let mut capability = Self::new(Kind::ThermostatMode {
            value: value.clone(),
            power,
        });

        let modes: Vec<Value> = modes
            .iter()
            .filter(|mode| {
                ["auto", "cool", "heat", "dry", "fan"]
                    .contains(&mode.as_str().unwrap_or_default())
            })
            .map(|mode| {
                json!({ "value": if mode == "fan" { json!("fan_only") } else { mode.clone() } })
            })
            .collect();

        capability.parameters.insert("instance".into(), json!("thermostat"));
        capability.parameters.insert("modes".into(), json!(modes));
        capability.data.insert("systemMode".into(), value);
        capability
    }

    pub fn temperature(options: &Map<String, Value>) -> Self {
        let option = options
            .get("targetTemperature")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut capability = Self::new(Kind::Temperature);
        capability.parameters.insert("instance".into(), json!("temperature"));
        capability.parameters.insert(
            "range".into(),
            json!({
                "min": option.get("min").and_then(Value::as_f64).unwrap_or(0.0),
                "max": option.get("max").and_then(Value::as_f64).unwrap_or(0.0),
                "precision": option.get("step").and_then(Value::as_f64).unwrap_or(1.0),
            }),
        );
        capability
            .parameters
            .insert("unit".into(), json!("unit.temperature.celsius"));
        capability.data.insert("targetTemperature".into(), Value::Null);
        capability
    }

    pub fn fan_mode(modes: &[Value]) -> Self {
        let mut capability = Self::new(Kind::FanMode);
        capability.parameters.insert("instance".into(), json!("fan_speed"));
        capability.parameters.insert(
            "modes".into(),
            json!(mode_list(modes, &["min", "low", "medium", "high", "max", "auto"])),
        );
        capability.data.insert("fanMode".into(), Value::Null);
        capability
    }

    pub fn heat_mode(modes: &[Value]) -> Self {
        let mut capability = Self::new(Kind::HeatMode);
        capability.parameters.insert("instance".into(), json!("heat"));
        capability.parameters.insert(
            "modes".into(),
            json!(mode_list(modes, &["min", "normal", "turbo", "max", "auto"])),
        );
        capability.data.insert("heatMode".into(), Value::Null);
        capability
    }

    pub fn swing_mode(modes: &[Value]) -> Self {
        let mut capability = Self::new(Kind::SwingMode);
        capability.parameters.insert("instance".into(), json!("swing"));
        capability.parameters.insert(
            "modes".into(),
            json!(mode_list(modes, &["stationary", "horizontal", "vertical"])),
        );
        capability.data.insert("swingMode".into(), Value::Null);
        capability
    }

    /// Voice-assistant capability URI.
    pub fn wire_type(&self) -> &'static str {
        match self.kind {
            Kind::Switch | Kind::Curtain | Kind::ThermostatPower { .. } => {
                "devices.capabilities.on_off"
            }
            Kind::Brightness | Kind::Open | Kind::Temperature => "devices.capabilities.range",
            Kind::Color { .. } => "devices.capabilities.color_setting",
            Kind::ThermostatMode { .. } | Kind::FanMode | Kind::HeatMode | Kind::SwingMode => {
                "devices.capabilities.mode"
            }
        }
    }

    /// Current voice-assistant state object.
    ///
    /// Mutable: Color tracks the last reported color mode and ThermostatMode
    /// remembers the last non-off mode (mirrored onto the linked power
    /// capability by [`crate::device::Endpoint::capability_state`]).
    pub fn state(&mut self) -> Value {
        let data = &self.data;

        match &mut self.kind {
            Kind::Switch => json!({ "instance": "on", "value": data.get("status").and_then(Value::as_str) == Some("on") }),
            Kind::Brightness => json!({
                "instance": "brightness",
                "value": (data.get("level").and_then(Value::as_f64).unwrap_or(0.0) / 2.55).round() as i64,
            }),
            Kind::Color { color_mode } => {
                if let Some(mode) = data.get("colorMode") {
                    *color_mode = loose_bool(mode).unwrap_or(false);
                }

                if *color_mode {
                    let list = data.get("color").and_then(Value::as_array);
                    let component = |index: usize| {
                        list.and_then(|list| list.get(index))
                            .and_then(Value::as_i64)
                            .unwrap_or(0)
                    };
                    let mut value = component(0) << 16 | component(1) << 8 | component(2);

                    for (display, canonical) in PALETTE {
                        if distance(parse_rgb(canonical), parse_rgb(value)) < 20.0 {
                            value = display;
                            break;
                        }
                    }

                    json!({ "instance": "rgb", "value": value })
                } else {
                    let mireds = data.get("colorTemperature").and_then(Value::as_f64).unwrap_or(0.0);
                    let value = if mireds != 0.0 { (1e6 / mireds).round() as i64 } else { 5600 };
                    json!({ "instance": "temperature_k", "value": value })
                }
            }
            Kind::Curtain => json!({ "instance": "on", "value": data.get("cover").and_then(Value::as_str) == Some("open") }),
            Kind::Open => json!({
                "instance": "open",
                "value": data.get("position").and_then(Value::as_i64).unwrap_or(0),
            }),
            Kind::ThermostatPower { .. } => {
                json!({ "instance": "on", "value": data_str(data, "systemMode") != "off" })
            }
            Kind::ThermostatMode { value, .. } => {
                let mode = data.get("systemMode").and_then(Value::as_str).unwrap_or_default();

                if mode != "off" && !mode.is_empty() {
                    *value = json!(mode);
                }

                let reported = if *value == json!("fan") { json!("fan_only") } else { value.clone() };
                json!({ "instance": "thermostat", "value": reported })
            }
            Kind::Temperature => json!({
                "instance": "temperature",
                "value": data.get("targetTemperature").and_then(Value::as_f64).unwrap_or(0.0),
            }),
            Kind::FanMode => json!({ "instance": "fan_speed", "value": data_str(data, "fanMode") }),
            Kind::HeatMode => json!({ "instance": "heat", "value": data_str(data, "heatMode") }),
            Kind::SwingMode => json!({ "instance": "swing", "value": data_str(data, "swingMode") }),
        }
    }

    /// Translate an incoming action state into the hub-native patch to
    /// publish. Unknown or missing fields degrade to the type's zero value,
    /// matching the hubs' own tolerance.
    pub fn action(&mut self, state: &Value) -> Map<String, Value> {
        let value = || state.get("value").cloned().unwrap_or(Value::Null);
        let relative = state.get("relative").and_then(Value::as_bool).unwrap_or(false);
        let data = &self.data;
        let mut patch = Map::new();

        match &mut self.kind {
            Kind::Switch => {
                patch.insert(
                    "status".into(),
                    json!(if value().as_bool().unwrap_or(false) { "on" } else { "off" }),
                );
            }
            Kind::Brightness => {
                let mut level = value().as_f64().unwrap_or(0.0) * 2.55;

                if relative {
                    level += data_f64(data, "level");
                }

                patch.insert("level".into(), json!(level.clamp(2.55, 255.0).round() as i64));
            }
            Kind::Color { color_mode } => {
                *color_mode = state.get("instance").and_then(Value::as_str) == Some("rgb");

                if *color_mode {
                    let mut rgb = value().as_i64().unwrap_or(0);

                    if let Some((_, canonical)) =
                        PALETTE.iter().find(|(display, _)| *display == rgb)
                    {
                        rgb = *canonical;
                    }

                    let (r, g, b) = parse_rgb(rgb);
                    patch.insert("color".into(), json!([r, g, b]));
                } else {
                    let kelvin = value().as_f64().unwrap_or(0.0);
                    let mut mireds = if kelvin != 0.0 { 1e6 / kelvin } else { 0.0 };

                    if relative {
                        mireds += data_f64(data, "colorTemperature");
                    }

                    patch.insert("colorTemperature".into(), json!(mireds.round() as i64));
                }
            }
            Kind::Curtain => {
                patch.insert(
                    "cover".into(),
                    json!(if value().as_bool().unwrap_or(false) { "open" } else { "close" }),
                );
            }
            Kind::Open => {
                let mut position = value().as_i64().unwrap_or(0);

                if relative {
                    position += data_f64(data, "position") as i64;
                }

                patch.insert("position".into(), json!(position.clamp(0, 100)));
            }
            Kind::ThermostatPower { on_value } => {
                patch.insert(
                    "systemMode".into(),
                    if value().as_bool().unwrap_or(false) {
                        on_value.clone()
                    } else {
                        json!("off")
                    },
                );
            }
            Kind::ThermostatMode { .. } => {
                let mode = value();
                patch.insert(
                    "systemMode".into(),
                    if mode == json!("fan_only") { json!("fan") } else { mode },
                );
            }
            Kind::Temperature => {
                let mut target = value().as_f64().unwrap_or(0.0);

                if relative {
                    target += data_f64(data, "targetTemperature");
                }

                patch.insert("targetTemperature".into(), json!(target));
            }
            Kind::FanMode => {
                patch.insert("fanMode".into(), value());
            }
            Kind::HeatMode => {
                patch.insert("heatMode".into(), value());
            }
            Kind::SwingMode => {
                patch.insert("swingMode".into(), value());
            }
        }

        patch
    }

    /// For ThermostatMode: the linked power index and the mode it should
    /// switch back on to. Read after [`Self::state`].
    pub(crate) fn thermostat_link(&self) -> Option<(usize, Value)> {
        match &self.kind {
            Kind::ThermostatMode {
                value,
                power: Some(power),
            } => Some((*power, value.clone())),
            _ => None,
        }
    }

    /// For ThermostatPower: update the mode restored by `action(on)`.
    pub(crate) fn set_on_value(&mut self, value: Value) {
        if let Kind::ThermostatPower { on_value } = &mut self.kind {
            *on_value = value;
        }
    }
}

fn data_str<'a>(data: &'a Map<String, Value>, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn data_f64(data: &Map<String, Value>, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn parse_rgb(value: i64) -> (i64, i64, i64) {
    (value >> 16 & 0xff, value >> 8 & 0xff, value & 0xff)
}

fn distance(a: (i64, i64, i64), b: (i64, i64, i64)) -> f64 {
    (((a.0 - b.0).pow(2) + (a.1 - b.1).pow(2) + (a.2 - b.2).pow(2)) as f64).sqrt()
}

/// Hub booleans arrive as real booleans, numbers, or strings depending on
/// the service.
fn loose_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().unwrap_or(0.0) != 0.0),
        Value::String(s) => Some(!s.is_empty() && s != "0" && s != "false"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_round_trip() {
        let mut switch = Capability::switch();
        assert_eq!(switch.state(), json!({ "instance": "on", "value": false }));

        switch.data.insert("status".into(), json!("on"));
        assert_eq!(switch.state(), json!({ "instance": "on", "value": true }));

        let patch = switch.action(&json!({ "instance": "on", "value": false }));
        assert_eq!(patch.get("status"), Some(&json!("off")));
    }

    #[test]
    fn brightness_scales_and_clamps() {
        let mut brightness = Capability::brightness();
        brightness.data.insert("level".into(), json!(128));
        assert_eq!(
            brightness.state(),
            json!({ "instance": "brightness", "value": 50 })
        );

        let patch = brightness.action(&json!({ "value": 50 }));
        assert_eq!(patch.get("level"), Some(&json!(128)));

        let patch = brightness.action(&json!({ "value": 0 }));
        assert_eq!(patch.get("level"), Some(&json!(3)));

        let patch = brightness.action(&json!({ "value": 200 }));
        assert_eq!(patch.get("level"), Some(&json!(255)));

        // Relative adds onto the current hub level
        let patch = brightness.action(&json!({ "value": 10, "relative": true }));
        assert_eq!(patch.get("level"), Some(&json!(154)));
    }

    fn light_options(features: &[&str]) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("light".into(), json!(features));
        options
    }

    #[test]
    fn color_snaps_to_palette() {
        let mut color = Capability::color(&light_options(&["color"]));
        color.data.insert("colorMode".into(), json!(true));
        color.data.insert("color".into(), json!([255, 1, 2]));

        assert_eq!(color.state(), json!({ "instance": "rgb", "value": 16714250 }));

        // Driving the palette entry maps back to the canonical triple
        let patch = color.action(&json!({ "instance": "rgb", "value": 16714250 }));
        assert_eq!(patch.get("color"), Some(&json!([255, 0, 0])));

        // The snap is stable when the canonical value is reapplied
        color.data.insert("color".into(), json!([255, 0, 0]));
        assert_eq!(color.state(), json!({ "instance": "rgb", "value": 16714250 }));
    }

    #[test]
    fn color_temperature_defaults_and_converts() {
        let mut options = light_options(&["colorTemperature"]);
        options.insert("colorTemperature".into(), json!({ "min": 150, "max": 500 }));

        let mut color = Capability::color(&options);

        // 1e6 / 500 = 2000 K → rung below is 1500; 1e6 / 150 ≈ 6667 K → rung above is 7500
        assert_eq!(
            color.parameters.get("temperature_k"),
            Some(&json!({ "min": 1500, "max": 7500 }))
        );

        assert_eq!(
            color.state(),
            json!({ "instance": "temperature_k", "value": 5600 })
        );

        color.data.insert("colorTemperature".into(), json!(250));
        assert_eq!(
            color.state(),
            json!({ "instance": "temperature_k", "value": 4000 })
        );

        let patch = color.action(&json!({ "instance": "temperature_k", "value": 4000 }));
        assert_eq!(patch.get("colorTemperature"), Some(&json!(250)));
    }

    #[test]
    fn thermostat_mode_tracks_last_on_value() {
        let modes = [json!("heat"), json!("cool")];
        let mut power = Capability::thermostat_power(json!("heat"));
        let mut mode = Capability::thermostat_mode(&modes, Some(0));

        mode.data.insert("systemMode".into(), json!("cool"));
        assert_eq!(
            mode.state(),
            json!({ "instance": "thermostat", "value": "cool" })
        );

        let (index, value) = mode.thermostat_link().unwrap();
        assert_eq!(index, 0);
        power.set_on_value(value);

        let patch = power.action(&json!({ "value": true }));
        assert_eq!(patch.get("systemMode"), Some(&json!("cool")));

        let patch = power.action(&json!({ "value": false }));
        assert_eq!(patch.get("systemMode"), Some(&json!("off")));
    }

    #[test]
    fn thermostat_mode_maps_fan_to_fan_only() {
        let modes = [json!("fan"), json!("cool")];
        let mut mode = Capability::thermostat_mode(&modes, None);

        assert_eq!(
            mode.parameters.get("modes"),
            Some(&json!([{ "value": "fan_only" }, { "value": "cool" }]))
        );

        assert_eq!(
            mode.state(),
            json!({ "instance": "thermostat", "value": "fan_only" })
        );

        let patch = mode.action(&json!({ "value": "fan_only" }));
        assert_eq!(patch.get("systemMode"), Some(&json!("fan")));
    }

    #[test]
    fn fan_mode_filters_unknown_modes() {
        let fan = Capability::fan_mode(&[json!("low"), json!("warp"), json!("high")]);
        assert_eq!(
            fan.parameters.get("modes"),
            Some(&json!([{ "value": "low" }, { "value": "high" }]))
        );
    }

    #[test]
    fn open_clamps_relative_positions() {
        let mut open = Capability::open();
        open.data.insert("position".into(), json!(90));

        let patch = open.action(&json!({ "value": 20, "relative": true }));
        assert_eq!(patch.get("position"), Some(&json!(100)));

        let patch = open.action(&json!({ "value": -100, "relative": true }));
        assert_eq!(patch.get("position"), Some(&json!(0)));
    }
}
