use serde::{Deserialize, Serialize};

use super::ControllingDevice;
use crate::pin::Pin;

/// Light or outlet: one output, optionally driven by controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnOffConfig {
    pub name: String,
    pub driver: String,
    pub pin: Pin,
    #[serde(default)]
    pub control_by: Vec<ControllingDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    pub driver: String,
    pub pin: Pin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub name: String,
    pub driver: String,
    pub pin: Pin,
}

/// Presence detector wired to one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSensorConfig {
    pub name: String,
    pub driver: String,
    pub pin: Pin,
}

/// Shutter motor: one output powers the motor, the other picks the direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutterConfig {
    pub name: String,
    pub driver: String,
    pub power_pin: Pin,
    pub direction_pin: Pin,
    /// Full travel time, bottom to top
    #[serde(default = "default_movement_secs")]
    pub movement_secs: f64,
    #[serde(default)]
    pub invert_power: bool,
    #[serde(default)]
    pub invert_direction: bool,
    #[serde(default)]
    pub control_by: Vec<ControllingDevice>,
}

/// Requested thermostat operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatMode {
    #[default]
    Off,
    Heat,
    Cool,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub name: String,
    pub driver: String,
    pub heat_pin: Pin,
    #[serde(default)]
    pub cool_pin: Option<Pin>,
    pub sensor_id: String,
    #[serde(default)]
    pub cooling_enabled: bool,
    /// Mode at startup
    #[serde(default)]
    pub mode: ThermostatMode,
    #[serde(default = "default_target_temperature")]
    pub target_temperature: f64,
    #[serde(default = "default_threshold")]
    pub heating_threshold: f64,
    #[serde(default = "default_threshold")]
    pub cooling_threshold: f64,
    #[serde(default)]
    pub min_temperature: f64,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub control_by: Vec<ControllingDevice>,
}

impl ThermostatConfig {
    /// Output pins the thermostat drives; the cool pin only when cooling is on
    pub fn output_pins(&self) -> Vec<Pin> {
        let mut pins = vec![self.heat_pin];
        if let Some(cool) = self.cool_pin.filter(|_| self.cooling_enabled) {
            pins.push(cool);
        }
        pins
    }
}

fn default_movement_secs() -> f64 {
    30.0
}

fn default_target_temperature() -> f64 {
    21.0
}

fn default_threshold() -> f64 {
    0.4
}

fn default_max_temperature() -> f64 {
    50.0
}

fn default_step() -> f64 {
    0.5
}
