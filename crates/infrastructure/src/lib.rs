//! Infrastructure layer - hardware and network drivers, configuration

pub mod config;
pub mod drivers;
pub mod sensors;

pub use config::{DriversConfig, HubConfig};
pub use drivers::DriverRegistry;
pub use sensors::MockSensorDriver;
