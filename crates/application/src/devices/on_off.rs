use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::device::{OnOffConfig, device_id};
use domain::error::Result;
use domain::{
    ControllingDevice, DeviceKind, DeviceStatus, DigitalOutput, IoDriver, Pin, StateChange,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Controllable, Events, Handle, LogicalDevice, check_driver};

/// Light or outlet: a single output holding the desired state
pub struct OnOffDevice {
    kind: DeviceKind,
    config: OnOffConfig,
    output: Handle<dyn DigitalOutput>,
    on: AtomicBool,
    fault: AtomicBool,
    write: Mutex<()>,
    events: Events,
}

impl OnOffDevice {
    pub fn new(kind: DeviceKind, config: OnOffConfig, events: Events) -> Self {
        Self {
            kind,
            config,
            output: Handle::default(),
            on: AtomicBool::new(false),
            fault: AtomicBool::new(false),
            write: Mutex::new(()),
            events,
        }
    }

    pub fn light(config: OnOffConfig, events: Events) -> Self {
        Self::new(DeviceKind::Light, config, events)
    }

    pub fn outlet(config: OnOffConfig, events: Events) -> Self {
        Self::new(DeviceKind::Outlet, config, events)
    }

    pub fn pin(&self) -> Pin {
        self.config.pin
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// Push the desired state to the output
    async fn write_output(&self) -> Result<()> {
        let output = self.output.get(&self.config.name)?;
        let _guard = self.write.lock().await;
        let on = self.is_on();
        let result = output.set(on).await;
        self.fault.store(result.is_err(), Ordering::SeqCst);
        result.map_err(|e| e.context(format!("{} {} set {}", self.kind, self.config.name, on)))
    }

    fn announce(&self, on: bool) {
        debug!(device = %self.config.name, kind = %self.kind, on, "power changed");
        let _ = self
            .events
            .send(StateChange::power(&self.config.name, self.kind, on));
    }
}

#[async_trait]
impl LogicalDevice for OnOffDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn driver(&self) -> &str {
        &self.config.driver
    }

    fn outputs(&self) -> Vec<Pin> {
        vec![self.config.pin]
    }

    fn init(&self, driver: &dyn IoDriver) -> Result<()> {
        check_driver(&self.config.name, &self.config.driver, driver)?;
        let output = driver.output(self.config.pin)?;
        self.output.set(output);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        self.write_output().await
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: device_id(self.kind, &self.config.driver, self.config.pin),
            name: self.config.name.clone(),
            kind: self.kind,
            on: self.is_on(),
            fault: self.fault.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Controllable for OnOffDevice {
    fn controllers(&self) -> &[ControllingDevice] {
        &self.config.control_by
    }

    async fn set_value(&self, on: bool) -> Result<()> {
        let changed = self.on.swap(on, Ordering::SeqCst) != on;
        let result = self.write_output().await;
        if changed {
            self.announce(on);
        }
        result
    }

    async fn toggle(&self) -> Result<()> {
        let on = !self.on.fetch_xor(true, Ordering::SeqCst);
        let result = self.write_output().await;
        self.announce(on);
        result
    }
}
