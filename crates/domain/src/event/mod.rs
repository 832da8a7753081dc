use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;
use crate::driver::PushEvent;

/// State changes of logical devices, broadcast to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StateChange {
    /// Light, outlet or switch changed level
    Power {
        device: String,
        kind: DeviceKind,
        on: bool,
        timestamp: DateTime<Utc>,
    },

    /// Button was pressed
    Pressed {
        device: String,
        event: PushEvent,
        timestamp: DateTime<Utc>,
    },

    /// Thermostat switched heating or cooling
    Thermostat {
        device: String,
        heating: bool,
        cooling: bool,
        current_temperature: f64,
        timestamp: DateTime<Utc>,
    },

    Motion {
        device: String,
        detected: bool,
        timestamp: DateTime<Utc>,
    },

    /// Shutter position in percent, 100 fully open
    Position {
        device: String,
        position: u8,
        moving: bool,
        timestamp: DateTime<Utc>,
    },
}

impl StateChange {
    pub fn power(device: impl Into<String>, kind: DeviceKind, on: bool) -> Self {
        Self::Power {
            device: device.into(),
            kind,
            on,
            timestamp: Utc::now(),
        }
    }

    pub fn pressed(device: impl Into<String>, event: PushEvent) -> Self {
        Self::Pressed {
            device: device.into(),
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn thermostat(
        device: impl Into<String>,
        heating: bool,
        cooling: bool,
        current_temperature: f64,
    ) -> Self {
        Self::Thermostat {
            device: device.into(),
            heating,
            cooling,
            current_temperature,
            timestamp: Utc::now(),
        }
    }

    pub fn motion(device: impl Into<String>, detected: bool) -> Self {
        Self::Motion {
            device: device.into(),
            detected,
            timestamp: Utc::now(),
        }
    }

    pub fn position(device: impl Into<String>, position: u8, moving: bool) -> Self {
        Self::Position {
            device: device.into(),
            position,
            moving,
            timestamp: Utc::now(),
        }
    }

    pub fn device(&self) -> &str {
        match self {
            Self::Power { device, .. } => device,
            Self::Pressed { device, .. } => device,
            Self::Thermostat { device, .. } => device,
            Self::Motion { device, .. } => device,
            Self::Position { device, .. } => device,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Power { timestamp, .. } => *timestamp,
            Self::Pressed { timestamp, .. } => *timestamp,
            Self::Thermostat { timestamp, .. } => *timestamp,
            Self::Motion { timestamp, .. } => *timestamp,
            Self::Position { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::Power { .. } => "Power",
            Self::Pressed { .. } => "Pressed",
            Self::Thermostat { .. } => "Thermostat",
            Self::Motion { .. } => "Motion",
            Self::Position { .. } => "Position",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_power_event_serialization() {
        let event = StateChange::power("kitchen", DeviceKind::Light, true);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], json!("Power"));
        assert_eq!(value["device"], json!("kitchen"));
        assert_eq!(value["kind"], json!("light"));
        assert_eq!(value["on"], json!(true));
    }

    #[test]
    fn test_accessors() {
        let event = StateChange::pressed("hall button", PushEvent::Double);
        assert_eq!(event.device(), "hall button");
        assert_eq!(event.event_type(), "Pressed");
        assert!(event.timestamp() <= Utc::now());
    }
}
