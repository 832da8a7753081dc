mod config;
mod status;

pub use config::{
    ButtonConfig, MotionSensorConfig, OnOffConfig, ShutterConfig, SwitchConfig, ThermostatConfig,
    ThermostatMode,
};
pub use status::{DeviceKind, DeviceStatus, device_id};

use serde::{Deserialize, Serialize};

use crate::driver::PushEvent;
use crate::pin::Pin;

/// What a controller has to do to drive a controllable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Level change of a switch; the press kind is irrelevant
    Switch,
    #[default]
    Single,
    Double,
    Long,
}

impl EventKind {
    /// Press kind this descriptor reacts to on a button
    pub fn push_event(&self) -> Option<PushEvent> {
        match self {
            Self::Switch => None,
            Self::Single => Some(PushEvent::Single),
            Self::Double => Some(PushEvent::Double),
            Self::Long => Some(PushEvent::Long),
        }
    }
}

impl From<PushEvent> for EventKind {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::Single => Self::Single,
            PushEvent::Double => Self::Double,
            PushEvent::Long => Self::Long,
        }
    }
}

/// Reference from a controllable to the switch or button driving it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllingDevice {
    pub pin: Pin,
    /// Defaults to the controllable's own driver
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub event: EventKind,
}

impl ControllingDevice {
    pub fn new(pin: Pin) -> Self {
        Self {
            pin,
            driver: None,
            event: EventKind::default(),
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    /// Driver the controller lives on, falling back to `own_driver`
    pub fn driver_or<'a>(&'a self, own_driver: &'a str) -> &'a str {
        self.driver.as_deref().unwrap_or(own_driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_controlling_device_defaults() {
        let dev: ControllingDevice = serde_json::from_value(json!({ "pin": 3 })).unwrap();
        assert_eq!(dev.pin, 3);
        assert_eq!(dev.driver, None);
        assert_eq!(dev.event, EventKind::Single);
        assert_eq!(dev.driver_or("mcpio"), "mcpio");
    }

    #[test]
    fn test_controlling_device_explicit() {
        let dev: ControllingDevice = serde_json::from_value(json!({
            "pin": 7,
            "driver": "shelly",
            "event": "switch"
        }))
        .unwrap();
        assert_eq!(dev.driver_or("mcpio"), "shelly");
        assert_eq!(dev.event, EventKind::Switch);
        assert_eq!(dev.event.push_event(), None);
    }

    #[test]
    fn test_event_kind_from_push() {
        assert_eq!(EventKind::from(PushEvent::Long), EventKind::Long);
        assert_eq!(EventKind::Double.push_event(), Some(PushEvent::Double));
    }
}
