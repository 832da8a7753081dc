use std::sync::Arc;

use domain::error::Result;
use domain::{DomainError, DriverState, Pin, PinDirection};

/// Handles owned by one driver for one direction, in request order
pub struct PinTable<T: ?Sized> {
    direction: PinDirection,
    entries: Vec<(Pin, Arc<T>)>,
}

impl<T: ?Sized> PinTable<T> {
    pub fn new(direction: PinDirection) -> Self {
        Self {
            direction,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, pin: Pin, handle: Arc<T>) {
        self.entries.push((pin, handle));
    }

    pub fn get(&self, driver: &str, pin: Pin) -> Result<Arc<T>> {
        self.entries
            .iter()
            .find(|(p, _)| *p == pin)
            .map(|(_, handle)| handle.clone())
            .ok_or_else(|| DomainError::PinNotFound {
                driver: driver.to_string(),
                direction: self.direction,
                pin,
            })
    }

    pub fn pins(&self) -> Vec<Pin> {
        self.entries.iter().map(|(pin, _)| *pin).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter().map(|(_, handle)| handle)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Fails with `DriverNotReady` unless `ready`
pub fn ensure_ready(driver: &str, ready: bool) -> Result<()> {
    if ready {
        Ok(())
    } else {
        Err(DomainError::DriverNotReady {
            driver: driver.to_string(),
        })
    }
}

/// `setup` is allowed once, on a freshly constructed driver
pub fn begin_setup(driver: &str, state: DriverState) -> Result<()> {
    match state {
        DriverState::Uninitialized => Ok(()),
        DriverState::Closed => Err(DomainError::DriverError(format!(
            "driver {} is closed",
            driver
        ))),
        _ => Err(DomainError::DriverError(format!(
            "driver {} is already set up",
            driver
        ))),
    }
}
