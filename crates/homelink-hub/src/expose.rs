//! Expose translator — maps a hub's generic expose tags and option map onto
//! concrete capabilities, properties, and a device type.
//!
//! Rules run in a fixed order and are additive. The first rule that assigns a
//! type wins; an endpoint left without a type gets neither capabilities nor
//! mode/battery extras and is skipped by discovery.

use crate::capability::Capability;
use crate::device::Endpoint;
use crate::property::Property;
use serde_json::Value;

fn option_str<'a>(endpoint: &'a Endpoint, key: &str) -> &'a str {
    endpoint
        .options
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn option_enum(endpoint: &Endpoint, key: &str) -> Vec<Value> {
    let option = endpoint.options.get(key).and_then(Value::as_object);

    // Older hub firmware published the event list as `trigger`
    option
        .and_then(|map| map.get("enum").or_else(|| map.get("trigger")))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn has(endpoint: &Endpoint, expose: &str) -> bool {
    endpoint.exposes.iter().any(|e| e == expose)
}

/// Populate `endpoint` from its exposes and options.
pub fn parse_exposes(endpoint: &mut Endpoint) {
    // basic

    if has(endpoint, "switch") {
        endpoint.set_type(if option_str(endpoint, "switch") == "outlet" {
            "devices.types.socket"
        } else {
            "devices.types.switch"
        });
        endpoint.capabilities.push(Capability::switch());
    }

    if has(endpoint, "lock") {
        endpoint.set_type(if option_str(endpoint, "lock") == "valve" {
            "devices.types.openable.valve"
        } else {
            "devices.types.openable.door_lock"
        });
        endpoint.capabilities.push(Capability::switch());
    }

    if has(endpoint, "light") {
        let light = endpoint
            .options
            .get("light")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        endpoint.set_type("devices.types.light");
        endpoint.capabilities.push(Capability::switch());

        if light.contains(&Value::from("level")) {
            endpoint.capabilities.push(Capability::brightness());
        }

        if light.contains(&Value::from("color")) || light.contains(&Value::from("colorTemperature"))
        {
            endpoint.capabilities.push(Capability::color(&endpoint.options));
        }
    }

    if has(endpoint, "cover") {
        endpoint.set_type("devices.types.openable.curtain");
        endpoint.capabilities.push(Capability::curtain());
        endpoint.capabilities.push(Capability::open());
    }

    if has(endpoint, "thermostat") {
        let mut modes = endpoint
            .options
            .get("systemMode")
            .and_then(Value::as_object)
            .and_then(|map| map.get("enum"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut power = None;

        endpoint.set_type("devices.types.thermostat");

        if modes.contains(&Value::from("off")) {
            modes.retain(|mode| mode.as_str() != Some("off"));
            endpoint
                .capabilities
                .push(Capability::thermostat_power(
                    modes.first().cloned().unwrap_or(Value::Null),
                ));
            power = Some(endpoint.capabilities.len() - 1);
        }

        if !modes.is_empty() {
            endpoint
                .capabilities
                .push(Capability::thermostat_mode(&modes, power));
        }

        endpoint
            .capabilities
            .push(Capability::temperature(&endpoint.options));
        endpoint
            .properties
            .insert("temperature".into(), Property::temperature());
    }

    // event

    if has(endpoint, "action") {
        let actions = option_enum(endpoint, "action");

        if ["singleClick", "doubleClick", "hold"]
            .iter()
            .any(|click| actions.contains(&Value::from(*click)))
        {
            endpoint.set_type("devices.types.sensor.button");
            endpoint
                .properties
                .insert("action".into(), Property::button(&actions));
        }
    }

    if has(endpoint, "contact") {
        endpoint.set_type("devices.types.sensor.open");
        endpoint
            .properties
            .insert("contact".into(), Property::binary("open", "opened", "closed"));
    }

    if has(endpoint, "gas") {
        endpoint.set_type("devices.types.sensor.gas");
        endpoint
            .properties
            .insert("gas".into(), Property::binary("gas", "detected", "not_detected"));
    }

    if has(endpoint, "occupancy") {
        endpoint.set_type("devices.types.sensor.motion");
        endpoint.properties.insert(
            "occupancy".into(),
            Property::binary("motion", "detected", "not_detected"),
        );
    }

    if has(endpoint, "smoke") {
        endpoint.set_type("devices.types.sensor.smoke");
        endpoint.properties.insert(
            "smoke".into(),
            Property::binary("smoke", "detected", "not_detected"),
        );
    }

    if has(endpoint, "waterLeak") {
        endpoint.set_type("devices.types.sensor.water_leak");
        endpoint.properties.insert(
            "waterLeak".into(),
            Property::binary("water_leak", "leak", "dry"),
        );
    }

    if has(endpoint, "vibration") {
        endpoint.set_type("devices.types.sensor.vibration");
        endpoint
            .properties
            .insert("event".into(), Property::vibration());
    }

    // climate

    let diagnostic = endpoint
        .options
        .get("temperature")
        .and_then(Value::as_object)
        .and_then(|map| map.get("diagnostic"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if has(endpoint, "temperature") && !diagnostic {
        endpoint.set_type("devices.types.sensor.climate");
        endpoint
            .properties
            .insert("temperature".into(), Property::temperature());
    }

    for (expose, property) in [
        ("pressure", Property::pressure as fn() -> Property),
        ("humidity", Property::humidity),
        ("co2", Property::co2),
        ("pm1", Property::pm1),
        ("pm10", Property::pm10),
        ("pm25", Property::pm25),
        ("voc", Property::voc),
    ] {
        if has(endpoint, expose) {
            endpoint.set_type("devices.types.sensor.climate");
            endpoint.properties.insert(expose.into(), property());
        }
    }

    // illumination

    if has(endpoint, "illuminance") {
        endpoint.set_type("devices.types.sensor.illumination");
        endpoint
            .properties
            .insert("illuminance".into(), Property::illuminance());
    }

    // water meter

    if has(endpoint, "volume") {
        endpoint.set_type("devices.types.smart_meter");
        endpoint.properties.insert("volume".into(), Property::volume());
    }

    // electricity

    for (expose, property) in [
        ("energy", Property::energy as fn() -> Property),
        ("voltage", Property::voltage),
        ("current", Property::current),
        ("power", Property::power),
    ] {
        if has(endpoint, expose) {
            endpoint.set_type("devices.types.smart_meter.electricity");
            endpoint.properties.insert(expose.into(), property());
        }
    }

    // other

    if endpoint.device_type().is_empty() {
        return;
    }

    if has(endpoint, "fanMode") {
        let modes = option_enum(endpoint, "fanMode");
        endpoint.capabilities.push(Capability::fan_mode(&modes));
    }

    if has(endpoint, "heatMode") {
        let modes = option_enum(endpoint, "heatMode");
        endpoint.capabilities.push(Capability::heat_mode(&modes));
    }

    if has(endpoint, "swingMode") {
        let modes = option_enum(endpoint, "swingMode");
        endpoint.capabilities.push(Capability::swing_mode(&modes));
    }

    if has(endpoint, "battery") {
        endpoint
            .properties
            .insert("battery".into(), Property::battery());
    } else if has(endpoint, "batteryLow") {
        endpoint.properties.insert(
            "batteryLow".into(),
            Property::binary("battery_level", "low", "normal"),
        );
    }
}
