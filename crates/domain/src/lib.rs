//! Domain layer - the pin and capability model shared by every driver
//!
//! This crate contains:
//! - Pins and pin directions
//! - The driver contract (`IoDriver`, `DigitalInput`, `DigitalOutput`)
//! - Driver kinds and the driver lifecycle state machine
//! - Logical device vocabulary (controller descriptors, configs, status)
//! - State change events and the sensor contract
//!
//! No hardware, network or runtime dependencies live here.

pub mod device;
pub mod driver;
pub mod error;
pub mod event;
pub mod pin;
pub mod sensor;

pub use device::{ControllingDevice, DeviceKind, DeviceStatus, EventKind, ThermostatMode};
pub use driver::{
    DigitalInput, DigitalOutput, DriverKind, DriverState, EventListener, IoDriver, PushEvent,
};
pub use error::DomainError;
pub use event::StateChange;
pub use pin::{Pin, PinDirection};
pub use sensor::{SensorDriver, TemperatureSensor};
