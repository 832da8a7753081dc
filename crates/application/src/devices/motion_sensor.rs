use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use domain::device::{MotionSensorConfig, device_id};
use domain::error::Result;
use domain::{DeviceKind, DeviceStatus, DigitalInput, IoDriver, Pin, StateChange};
use tracing::debug;

use super::{Events, Handle, LogicalDevice, check_driver};

/// Presence detector: reports its input level on every change
pub struct MotionSensorDevice {
    config: MotionSensorConfig,
    input: Handle<dyn DigitalInput>,
    detected: Mutex<Option<bool>>,
    fault: AtomicBool,
    events: Events,
}

impl MotionSensorDevice {
    pub fn new(config: MotionSensorConfig, events: Events) -> Self {
        Self {
            config,
            input: Handle::default(),
            detected: Mutex::new(None),
            // Faulty until the first good read
            fault: AtomicBool::new(true),
            events,
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(false)
    }
}

#[async_trait]
impl LogicalDevice for MotionSensorDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::MotionSensor
    }

    fn driver(&self) -> &str {
        &self.config.driver
    }

    fn inputs(&self) -> Vec<Pin> {
        vec![self.config.pin]
    }

    fn init(&self, driver: &dyn IoDriver) -> Result<()> {
        check_driver(&self.config.name, &self.config.driver, driver)?;
        self.input.set(driver.input(self.config.pin)?);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        let input = self.input.get(&self.config.name)?;
        let detected = match input.state().await {
            Ok(detected) => detected,
            Err(e) => {
                self.fault.store(true, Ordering::SeqCst);
                return Err(e.context(format!("motion sensor {} read", self.config.name)));
            }
        };
        self.fault.store(false, Ordering::SeqCst);

        let previous = self
            .detected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(detected);
        if previous != Some(detected) {
            debug!(sensor = %self.config.name, detected, "motion changed");
            let _ = self
                .events
                .send(StateChange::motion(&self.config.name, detected));
        }
        Ok(())
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: device_id(DeviceKind::MotionSensor, &self.config.driver, self.config.pin),
            name: self.config.name.clone(),
            kind: DeviceKind::MotionSensor,
            on: self.is_detected(),
            fault: self.fault.load(Ordering::SeqCst),
        }
    }
}
