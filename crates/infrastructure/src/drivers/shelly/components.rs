use std::collections::BTreeMap;

use domain::error::Result;
use domain::{DomainError, PushEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `Shelly.GetDeviceInfo`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub model: String,
    #[serde(rename = "gen", default)]
    pub generation: u8,
    #[serde(default)]
    pub fw_id: String,
    #[serde(default)]
    pub ver: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub auth_en: bool,
    #[serde(default)]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub discoverable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyCounter {
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub by_minute: Vec<f64>,
    #[serde(default)]
    pub minute_ts: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    #[serde(rename = "tC", default)]
    pub celsius: Option<f64>,
    #[serde(rename = "tF", default)]
    pub fahrenheit: Option<f64>,
}

/// `switch:N` status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchStatus {
    pub id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aenergy: Option<EnergyCounter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Temperature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// `input:N` status; `state` is null for inputs in button mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputStatus {
    pub id: u8,
    #[serde(default)]
    pub state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKey {
    Switch(u8),
    Input(u8),
}

impl ComponentKey {
    /// `switch:0`, `input:2`; anything else is not tracked
    pub fn parse(key: &str) -> Option<Self> {
        let (kind, index) = key.split_once(':')?;
        let index = index.parse().ok()?;
        match kind {
            "switch" => Some(Self::Switch(index)),
            "input" => Some(Self::Input(index)),
            _ => None,
        }
    }
}

/// Switch and input sections of a status document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellyStatus {
    pub switches: BTreeMap<u8, SwitchStatus>,
    pub inputs: BTreeMap<u8, InputStatus>,
}

impl ShellyStatus {
    /// Parse a full `Shelly.GetStatus` result
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut status = Self::default();
        status.apply(value, true)?;
        Ok(status)
    }

    /// Merge a (possibly partial) status document.
    ///
    /// Known components are patched field by field. Unknown components are
    /// added only when `insert` is set, which is the case for full status.
    pub fn apply(&mut self, value: &Value, insert: bool) -> Result<()> {
        let Some(sections) = value.as_object() else {
            return Err(DomainError::Protocol("status is not an object".to_string()));
        };
        for (key, patch) in sections {
            match ComponentKey::parse(key) {
                Some(ComponentKey::Switch(id)) => {
                    patch_component(&mut self.switches, id, patch, insert, |id| SwitchStatus {
                        id,
                        ..Default::default()
                    })?
                }
                Some(ComponentKey::Input(id)) => {
                    patch_component(&mut self.inputs, id, patch, insert, |id| InputStatus {
                        id,
                        ..Default::default()
                    })?
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn patch_component<T>(
    components: &mut BTreeMap<u8, T>,
    id: u8,
    patch: &Value,
    insert: bool,
    empty: impl FnOnce(u8) -> T,
) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let current = match components.remove(&id) {
        Some(current) => current,
        None if insert => empty(id),
        None => return Ok(()),
    };
    let mut merged = serde_json::to_value(&current)
        .map_err(|e| DomainError::Protocol(format!("failed to encode status: {}", e)))?;
    merge_json(&mut merged, patch);

    let updated = match serde_json::from_value(merged) {
        Ok(updated) => updated,
        Err(e) => {
            components.insert(id, current);
            return Err(DomainError::Protocol(format!(
                "invalid status patch for component {}: {}",
                id, e
            )));
        }
    };
    components.insert(id, updated);
    Ok(())
}

/// Recursive object merge; non-object values replace
pub fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentEvent {
    pub component: String,
    #[serde(default)]
    pub id: Option<u8>,
    pub event: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyEventParams {
    #[serde(default)]
    pub events: Vec<ComponentEvent>,
}

impl ComponentEvent {
    /// Input index and press kind, when this is a button press on an input
    pub fn input_press(&self) -> Option<(u8, PushEvent)> {
        let Some(ComponentKey::Input(id)) = ComponentKey::parse(&self.component) else {
            return None;
        };
        let event = match self.event.as_str() {
            "single_push" => PushEvent::Single,
            "double_push" => PushEvent::Double,
            "long_push" => PushEvent::Long,
            _ => return None,
        };
        Some((id, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_status() {
        let status = ShellyStatus::from_value(&json!({
            "ble": {},
            "input:0": { "id": 0, "state": false },
            "switch:0": {
                "id": 0, "source": "init", "output": true, "apower": 12.5, "voltage": 231.2,
                "aenergy": { "total": 1.5, "by_minute": [0.1, 0.2, 0.3], "minute_ts": 1700000000 },
                "temperature": { "tC": 41.2, "tF": 106.2 }
            },
            "switch:1": { "id": 1, "output": false },
            "sys": { "mac": "A8032AB12345" }
        }))
        .unwrap();

        assert_eq!(status.switches.len(), 2);
        assert_eq!(status.inputs.len(), 1);
        let sw = &status.switches[&0];
        assert!(sw.output);
        assert_eq!(sw.apower, Some(12.5));
        assert_eq!(sw.temperature.as_ref().unwrap().celsius, Some(41.2));
        assert_eq!(status.inputs[&0].state, Some(false));
    }

    #[test]
    fn test_partial_patch_keeps_other_fields() {
        let mut status = ShellyStatus::from_value(&json!({
            "switch:0": { "id": 0, "output": false, "apower": 0.0, "aenergy": { "total": 3.0 } }
        }))
        .unwrap();

        status
            .apply(
                &json!({ "ts": 1.0, "switch:0": { "output": true, "aenergy": { "by_minute": [1.0] } } }),
                false,
            )
            .unwrap();

        let sw = &status.switches[&0];
        assert!(sw.output);
        assert_eq!(sw.apower, Some(0.0));
        let energy = sw.aenergy.as_ref().unwrap();
        assert_eq!(energy.total, 3.0);
        assert_eq!(energy.by_minute, vec![1.0]);
    }

    #[test]
    fn test_partial_patch_ignores_unknown_components() {
        let mut status = ShellyStatus::default();
        status.apply(&json!({ "switch:3": { "output": true } }), false).unwrap();
        assert!(status.switches.is_empty());
    }

    #[test]
    fn test_bad_patch_keeps_previous_state() {
        let mut status = ShellyStatus::from_value(&json!({ "switch:0": { "id": 0, "output": true } })).unwrap();
        assert!(status.apply(&json!({ "switch:0": { "output": "yes" } }), false).is_err());
        assert!(status.switches[&0].output);
    }

    #[test]
    fn test_device_info_gen_field() {
        let info: DeviceInfo = serde_json::from_value(json!({
            "id": "shellypro4pm-a8032ab12345", "mac": "A8032AB12345", "model": "SPSW-004PE16EU",
            "gen": 2, "fw_id": "20231107-164738/1.0.8-g", "ver": "1.0.8", "app": "Pro4PM",
            "auth_en": false, "auth_domain": null
        }))
        .unwrap();
        assert_eq!(info.generation, 2);
        assert_eq!(info.app, "Pro4PM");
    }

    #[test]
    fn test_input_press_events() {
        let params: NotifyEventParams = serde_json::from_value(json!({
            "ts": 1.0,
            "events": [
                { "component": "input:1", "id": 1, "event": "double_push", "ts": 1.0 },
                { "component": "input:0", "id": 0, "event": "btn_down", "ts": 1.0 },
                { "component": "switch:0", "id": 0, "event": "single_push", "ts": 1.0 }
            ]
        }))
        .unwrap();

        let presses: Vec<_> = params.events.iter().filter_map(|e| e.input_press()).collect();
        assert_eq!(presses, vec![(1, PushEvent::Double)]);
    }
}
