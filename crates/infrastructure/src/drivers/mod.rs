mod bank;
pub mod gpio;
pub mod grenton;
pub mod mcp23017;
mod memory;
pub mod mock;
mod pin_table;
pub mod remote_io;
pub mod remote_io_slave;
pub mod shelly;

pub use bank::{BankIoDriver, BankOpener, BankOptions, MemoryBank, PinBank};
pub use gpio::{GpioConfig, GpioIoDriver, gpio_driver};
pub use grenton::{GrentonConfig, GrentonIoDriver};
pub use mcp23017::{Mcp23017Config, Mcp23017IoDriver, mcp23017_driver};
pub use memory::MemoryInput;
pub use mock::{MockConfig, MockIoDriver};
pub use remote_io::{RemoteIoConfig, RemoteIoDriver};
pub use remote_io_slave::{RemoteIoSlaveConfig, RemoteIoSlaveDriver};
pub use shelly::{ShellyConfig, ShellyDriver};

use std::collections::BTreeMap;

use domain::error::Result;
use domain::{DomainError, DriverKind, IoDriver};
use tracing::debug;

use crate::config::DriversConfig;

/// Builds a fresh, not yet set up driver
pub type DriverConstructor = Box<dyn Fn() -> Result<Box<dyn IoDriver>> + Send + Sync>;

/// Box a plain driver builder as a [`DriverConstructor`]
pub fn constructor<D, F>(build: F) -> DriverConstructor
where
    D: IoDriver + 'static,
    F: Fn() -> D + Send + Sync + 'static,
{
    Box::new(move || Ok(Box::new(build()) as Box<dyn IoDriver>))
}

/// Name to constructor table, resolved once at startup.
///
/// Names are matched case-insensitively.
#[derive(Default)]
pub struct DriverRegistry {
    entries: BTreeMap<String, (DriverKind, DriverConstructor)>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, kind: DriverKind, constructor: DriverConstructor) -> Result<()> {
        let key = name.to_lowercase();
        if self.entries.contains_key(&key) {
            return Err(DomainError::InvalidConfiguration(format!(
                "driver {} registered twice",
                name
            )));
        }
        debug!(driver = %key, %kind, "Driver registered");
        self.entries.insert(key, (kind, constructor));
        Ok(())
    }

    /// gpio and mock are always available; the rest only when configured
    pub fn from_config(config: &DriversConfig) -> Result<Self> {
        let mut registry = Self::new();

        let gpio = config.gpio.clone();
        registry.register(
            DriverKind::Gpio.as_str(),
            DriverKind::Gpio,
            constructor(move || gpio_driver(gpio.clone())),
        )?;

        let mock = config.mock.clone();
        let mock_name = mock
            .name
            .clone()
            .unwrap_or_else(|| DriverKind::Mock.as_str().to_string());
        registry.register(
            &mock_name,
            DriverKind::Mock,
            constructor(move || MockIoDriver::new(mock.clone())),
        )?;

        if let Some(mcpio) = config.mcpio.clone() {
            registry.register(
                DriverKind::Mcp23017.as_str(),
                DriverKind::Mcp23017,
                constructor(move || mcp23017_driver(mcpio.clone())),
            )?;
        }

        if let Some(grenton) = config.grenton.clone() {
            registry.register(
                DriverKind::Grenton.as_str(),
                DriverKind::Grenton,
                constructor(move || GrentonIoDriver::new(grenton.clone())),
            )?;
        }

        for remote in &config.remoteio {
            let name = remote
                .name
                .clone()
                .unwrap_or_else(|| DriverKind::RemoteIo.as_str().to_string());
            let remote = remote.clone();
            registry.register(
                &name,
                DriverKind::RemoteIo,
                constructor(move || RemoteIoDriver::new(remote.clone())),
            )?;
        }

        if let Some(slave) = config.remoteio_slave.clone() {
            registry.register(
                DriverKind::RemoteIoSlave.as_str(),
                DriverKind::RemoteIoSlave,
                constructor(move || RemoteIoSlaveDriver::new(slave.clone())),
            )?;
        }

        if let Some(shelly) = config.shelly.clone() {
            registry.register(
                DriverKind::Shelly.as_str(),
                DriverKind::Shelly,
                constructor(move || ShellyDriver::new(shelly.clone())),
            )?;
        }

        Ok(registry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    pub fn kind(&self, name: &str) -> Option<DriverKind> {
        self.entries.get(&name.to_lowercase()).map(|(kind, _)| *kind)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Construct a new instance of the named driver
    pub fn create(&self, name: &str) -> Result<Box<dyn IoDriver>> {
        let (kind, build) = self
            .entries
            .get(&name.to_lowercase())
            .ok_or_else(|| DomainError::DriverNotFound(name.to_string()))?;
        build().map_err(|e| e.context(format!("constructing {} driver {}", kind, name)))
    }
}
