use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use domain::device::{SwitchConfig, device_id};
use domain::error::Result;
use domain::{DeviceKind, DeviceStatus, DigitalInput, IoDriver, Pin, StateChange};
use tracing::{debug, warn};

use super::{Controllable, Events, Handle, LogicalDevice, check_driver};

/// Maintained wall switch: its level is copied onto every target
pub struct SwitchDevice {
    config: SwitchConfig,
    input: Handle<dyn DigitalInput>,
    level: Mutex<Option<bool>>,
    targets: RwLock<Vec<Arc<dyn Controllable>>>,
    fault: AtomicBool,
    events: Events,
}

impl SwitchDevice {
    pub fn new(config: SwitchConfig, events: Events) -> Self {
        Self {
            config,
            input: Handle::default(),
            level: Mutex::new(None),
            targets: RwLock::new(Vec::new()),
            fault: AtomicBool::new(false),
            events,
        }
    }

    pub fn pin(&self) -> Pin {
        self.config.pin
    }

    pub fn add_target(&self, target: Arc<dyn Controllable>) {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target);
    }

    pub fn target_count(&self) -> usize {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn level(&self) -> Option<bool> {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LogicalDevice for SwitchDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Switch
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
        let on = match input.state().await {
            Ok(on) => on,
            Err(e) => {
                self.fault.store(true, Ordering::SeqCst);
                return Err(e.context(format!("switch {} read", self.config.name)));
            }
        };
        self.fault.store(false, Ordering::SeqCst);

        let previous = self
            .level
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(on);
        if previous == Some(on) {
            return Ok(());
        }

        debug!(switch = %self.config.name, on, "switch changed");
        let _ = self
            .events
            .send(StateChange::power(&self.config.name, DeviceKind::Switch, on));

        let targets = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for target in targets {
            if let Err(e) = target.set_value(on).await {
                warn!(
                    switch = %self.config.name,
                    target = %target.name(),
                    error = %e,
                    "failed to apply switch level"
                );
            }
        }
        Ok(())
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: device_id(DeviceKind::Switch, &self.config.driver, self.config.pin),
            name: self.config.name.clone(),
            kind: DeviceKind::Switch,
            on: self.level().unwrap_or(false),
            fault: self.fault.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{FakeDriver, Level, driver_with_output, events};
    use super::super::OnOffDevice;
    use super::*;
    use domain::DigitalOutput;
    use domain::device::OnOffConfig;

    fn switch_driver(input: Arc<Level>) -> FakeDriver {
        FakeDriver::new("mcpio").with_input(input)
    }

    #[tokio::test]
    async fn test_level_is_copied_to_targets() {
        let (tx, mut rx) = events();
        let input = Arc::new(Level::default());
        let relay = Arc::new(Level::default());

        let light = Arc::new(OnOffDevice::light(
            OnOffConfig {
                name: "hall".into(),
                driver: "mcpio".into(),
                pin: 8,
                control_by: vec![],
            },
            tx.clone(),
        ));
        light
            .init(&driver_with_output("mcpio", relay.clone()))
            .unwrap();

        let switch = SwitchDevice::new(
            SwitchConfig {
                name: "hall switch".into(),
                driver: "mcpio".into(),
                pin: 1,
            },
            tx,
        );
        switch.init(&switch_driver(input.clone())).unwrap();
        switch.add_target(light.clone());

        // First sync always reports the level, even when low
        switch.sync().await.unwrap();
        assert!(!relay.get());
        assert!(matches!(
            rx.try_recv().unwrap(),
            StateChange::Power { kind: DeviceKind::Switch, on: false, .. }
        ));

        // Unchanged level does nothing
        switch.sync().await.unwrap();
        assert!(rx.try_recv().is_err());

        DigitalOutput::set(input.as_ref(), true).await.unwrap();
        switch.sync().await.unwrap();
        assert!(relay.get());
        assert!(light.is_on());
        assert!(switch.status().on);
    }
}
