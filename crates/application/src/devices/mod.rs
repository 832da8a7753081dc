//! Logical devices: what the hub configures, wires and syncs

mod button;
mod motion_sensor;
mod on_off;
mod shutter;
mod switch;
mod thermostat;

pub use button::ButtonDevice;
pub use motion_sensor::MotionSensorDevice;
pub use on_off::OnOffDevice;
pub use shutter::ShutterDevice;
pub use switch::SwitchDevice;
pub use thermostat::{ThermostatDevice, heating_cooling_demand};

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::error::Result;
use domain::{ControllingDevice, DeviceKind, DeviceStatus, DomainError, IoDriver, Pin, StateChange};
use tokio::sync::broadcast;

/// Where devices publish their state changes
pub type Events = broadcast::Sender<StateChange>;

#[async_trait]
pub trait LogicalDevice: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// Name of the driver owning this device's pins
    fn driver(&self) -> &str;

    fn inputs(&self) -> Vec<Pin> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<Pin> {
        Vec::new()
    }

    /// Fetch pin handles from a ready driver
    fn init(&self, driver: &dyn IoDriver) -> Result<()>;

    async fn sync(&self) -> Result<()>;

    fn status(&self) -> DeviceStatus;
}

/// Device a switch or button can drive
#[async_trait]
pub trait Controllable: LogicalDevice {
    fn controllers(&self) -> &[ControllingDevice];

    async fn set_value(&self, on: bool) -> Result<()>;

    async fn toggle(&self) -> Result<()>;
}

/// `driver` must be the one the device is configured for, and ready
fn check_driver(device: &str, expected: &str, driver: &dyn IoDriver) -> Result<()> {
    if !driver.name().eq_ignore_ascii_case(expected) {
        return Err(DomainError::InvalidConfiguration(format!(
            "device {} expects driver {}, got {}",
            device,
            expected,
            driver.name()
        )));
    }
    if !driver.is_ready() {
        return Err(DomainError::DriverNotReady {
            driver: driver.name().to_string(),
        });
    }
    Ok(())
}

/// Pin handle filled in by `init`
struct Handle<T: ?Sized> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for Handle<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T: ?Sized> Handle<T> {
    fn set(&self, handle: Arc<T>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn get(&self, device: &str) -> Result<Arc<T>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DomainError::DriverError(format!("device {} is not initialized", device)))
    }

    fn is_set(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDriver;
    use super::*;

    #[test]
    fn test_check_driver() {
        let mut driver = FakeDriver::new("MCPIO");
        driver.ready = false;

        assert!(matches!(
            check_driver("kitchen", "gpio", &driver),
            Err(DomainError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            check_driver("kitchen", "mcpio", &driver),
            Err(DomainError::DriverNotReady { .. })
        ));
    }
}
