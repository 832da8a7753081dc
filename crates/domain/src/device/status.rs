use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Outlet,
    Switch,
    Button,
    Thermostat,
    MotionSensor,
    Shutter,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Outlet => "outlet",
            Self::Switch => "switch",
            Self::Button => "button",
            Self::Thermostat => "thermostat",
            Self::MotionSensor => "motion_sensor",
            Self::Shutter => "shutter",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one logical device for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: u64,
    pub name: String,
    pub kind: DeviceKind,
    pub on: bool,
    /// Last sync or write failed
    pub fault: bool,
}

/// Stable numeric identity of a logical device.
///
/// FNV-1a over `kind:driver:pin`, so the id survives restarts and
/// reordering of the configuration.
pub fn device_id(kind: DeviceKind, driver: &str, pin: Pin) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let key = format!("{}:{}:{}", kind, driver.to_ascii_lowercase(), pin);
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}
