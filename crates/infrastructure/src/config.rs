use config::{Config, ConfigError, Environment, File};
use domain::device::{
    ButtonConfig, MotionSensorConfig, OnOffConfig, ShutterConfig, SwitchConfig, ThermostatConfig,
};
use serde::Deserialize;

use crate::drivers::{
    GpioConfig, GrentonConfig, Mcp23017Config, MockConfig, RemoteIoConfig, RemoteIoSlaveConfig,
    ShellyConfig,
};
use crate::sensors::MockSensorConfig;

/// Per-kind driver sections; gpio and mock are always registered
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriversConfig {
    pub gpio: GpioConfig,
    pub mock: MockConfig,
    pub mcpio: Option<Mcp23017Config>,
    pub grenton: Option<GrentonConfig>,
    pub remoteio: Vec<RemoteIoConfig>,
    pub remoteio_slave: Option<RemoteIoSlaveConfig>,
    pub shelly: Option<ShellyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub lights: Vec<OnOffConfig>,
    #[serde(default)]
    pub outlets: Vec<OnOffConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
    #[serde(default)]
    pub buttons: Vec<ButtonConfig>,
    #[serde(default)]
    pub thermostats: Vec<ThermostatConfig>,
    #[serde(default)]
    pub motion_sensors: Vec<MotionSensorConfig>,
    #[serde(default)]
    pub shutters: Vec<ShutterConfig>,
    #[serde(default)]
    pub drivers: DriversConfig,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_sensors_sync_interval")]
    pub sensors_sync_interval_secs: u64,
    #[serde(default)]
    pub mock_sensors: Vec<MockSensorConfig>,
}

fn default_sync_interval() -> u64 {
    250
}

fn default_sensors_sync_interval() -> u64 {
    120
}

impl HubConfig {
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Required, so the hub never starts without devices
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(true))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Environment variables (e.g. SWHUB__SYNC_INTERVAL_MS=500)
            .add_source(Environment::with_prefix("SWHUB").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that need the whole document
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval_ms == 0 || self.sensors_sync_interval_secs == 0 {
            return Err(ConfigError::Message(
                "sync intervals must be greater than zero".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        let all_names = self
            .lights
            .iter()
            .chain(&self.outlets)
            .map(|d| d.name.as_str())
            .chain(self.switches.iter().map(|d| d.name.as_str()))
            .chain(self.buttons.iter().map(|d| d.name.as_str()))
            .chain(self.thermostats.iter().map(|d| d.name.as_str()))
            .chain(self.motion_sensors.iter().map(|d| d.name.as_str()))
            .chain(self.shutters.iter().map(|d| d.name.as_str()));
        for name in all_names {
            if name.trim().is_empty() {
                return Err(ConfigError::Message("device with empty name".to_string()));
            }
            if !names.insert(name) {
                return Err(ConfigError::Message(format!("device name {} used twice", name)));
            }
        }

        for thermostat in &self.thermostats {
            if thermostat.cooling_enabled && thermostat.cool_pin.is_none() {
                return Err(ConfigError::Message(format!(
                    "thermostat {} enables cooling without a cool_pin",
                    thermostat.name
                )));
            }
            if matches!(
                thermostat.min_temperature.partial_cmp(&thermostat.max_temperature),
                None | Some(std::cmp::Ordering::Greater)
            ) {
                return Err(ConfigError::Message(format!(
                    "thermostat {} needs min_temperature at or below max_temperature",
                    thermostat.name
                )));
            }
        }

        for shutter in &self.shutters {
            if shutter.power_pin == shutter.direction_pin {
                return Err(ConfigError::Message(format!(
                    "shutter {} uses pin {} for both power and direction",
                    shutter.name, shutter.power_pin
                )));
            }
            if !(shutter.movement_secs.is_finite() && shutter.movement_secs > 0.0) {
                return Err(ConfigError::Message(format!(
                    "shutter {} needs a positive movement_secs",
                    shutter.name
                )));
            }
        }
        Ok(())
    }
}
