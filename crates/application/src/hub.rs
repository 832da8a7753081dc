use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use domain::{DeviceKind, DeviceStatus, IoDriver, Pin, SensorDriver, StateChange};
use infrastructure::{DriverRegistry, HubConfig, MockSensorDriver};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::devices::{
    ButtonDevice, Controllable, LogicalDevice, MotionSensorDevice, OnOffDevice, ShutterDevice,
    SwitchDevice, ThermostatDevice,
};

const EVENT_CAPACITY: usize = 256;

/// Pins requested from one driver, in first-seen order
#[derive(Debug, Default)]
struct PinRequest {
    name: String,
    inputs: Vec<Pin>,
    outputs: Vec<Pin>,
}

impl PinRequest {
    fn add(&mut self, inputs: Vec<Pin>, outputs: Vec<Pin>) {
        for pin in inputs {
            if !self.inputs.contains(&pin) {
                self.inputs.push(pin);
            }
        }
        for pin in outputs {
            if !self.outputs.contains(&pin) {
                self.outputs.push(pin);
            }
        }
    }
}

/// Per-driver pin report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoStatus {
    pub driver: String,
    pub inputs: Vec<Pin>,
    pub outputs: Vec<Pin>,
}

/// Owns the drivers and logical devices and keeps them in sync
pub struct Hub {
    switches: Vec<Arc<SwitchDevice>>,
    buttons: Vec<Arc<ButtonDevice>>,
    motion_sensors: Vec<Arc<MotionSensorDevice>>,
    lights: Vec<Arc<OnOffDevice>>,
    outlets: Vec<Arc<OnOffDevice>>,
    shutters: Vec<Arc<ShutterDevice>>,
    thermostats: Vec<Arc<ThermostatDevice>>,
    registry: DriverRegistry,
    /// Set up drivers keyed by lowercase name
    drivers: BTreeMap<String, Box<dyn IoDriver>>,
    sensor_drivers: Vec<Arc<dyn SensorDriver>>,
    events: broadcast::Sender<StateChange>,
    sync_interval: Duration,
    sensors_sync_interval: Duration,
}

impl Hub {
    pub fn new(config: &HubConfig, registry: DriverRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            switches: config
                .switches
                .iter()
                .map(|c| Arc::new(SwitchDevice::new(c.clone(), events.clone())))
                .collect(),
            buttons: config
                .buttons
                .iter()
                .map(|c| ButtonDevice::new(c.clone(), events.clone()))
                .collect(),
            motion_sensors: config
                .motion_sensors
                .iter()
                .map(|c| Arc::new(MotionSensorDevice::new(c.clone(), events.clone())))
                .collect(),
            lights: config
                .lights
                .iter()
                .map(|c| Arc::new(OnOffDevice::light(c.clone(), events.clone())))
                .collect(),
            outlets: config
                .outlets
                .iter()
                .map(|c| Arc::new(OnOffDevice::outlet(c.clone(), events.clone())))
                .collect(),
            shutters: config
                .shutters
                .iter()
                .map(|c| Arc::new(ShutterDevice::new(c.clone(), events.clone())))
                .collect(),
            thermostats: config
                .thermostats
                .iter()
                .map(|c| Arc::new(ThermostatDevice::new(c.clone(), events.clone())))
                .collect(),
            registry,
            drivers: BTreeMap::new(),
            sensor_drivers: Vec::new(),
            events,
            sync_interval: Duration::from_millis(config.sync_interval_ms),
            sensors_sync_interval: Duration::from_secs(config.sensors_sync_interval_secs),
        }
    }

    /// Hub with the registry and mock sensors described by `config`
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let registry =
            DriverRegistry::from_config(&config.drivers).context("building driver registry")?;
        info!(drivers = ?registry.names(), "Drivers registered");
        let mut hub = Self::new(config, registry);
        if !config.mock_sensors.is_empty() {
            hub.add_sensor_driver(Arc::new(MockSensorDriver::new(&config.mock_sensors)));
        }
        Ok(hub)
    }

    pub fn add_sensor_driver(&mut self, driver: Arc<dyn SensorDriver>) {
        self.sensor_drivers.push(driver);
    }

    /// Run every startup step: drivers, handles, wiring and sensors
    pub async fn start(&mut self) -> Result<()> {
        self.init_drivers().await?;
        self.init_ios()?;
        self.match_controllers()?;
        self.match_sensors()?;

        for status in self.io_status() {
            info!(
                driver = %status.driver,
                inputs = ?status.inputs,
                outputs = ?status.outputs,
                "driver io"
            );
        }
        Ok(())
    }

    /// Devices in sync order
    fn devices(&self) -> Vec<Arc<dyn LogicalDevice>> {
        let mut devices: Vec<Arc<dyn LogicalDevice>> = Vec::new();
        devices.extend(self.switches.iter().map(|d| d.clone() as Arc<dyn LogicalDevice>));
        devices.extend(self.buttons.iter().map(|d| d.clone() as Arc<dyn LogicalDevice>));
        devices.extend(
            self.motion_sensors
                .iter()
                .map(|d| d.clone() as Arc<dyn LogicalDevice>),
        );
        devices.extend(self.lights.iter().map(|d| d.clone() as Arc<dyn LogicalDevice>));
        devices.extend(self.outlets.iter().map(|d| d.clone() as Arc<dyn LogicalDevice>));
        devices.extend(self.shutters.iter().map(|d| d.clone() as Arc<dyn LogicalDevice>));
        devices.extend(
            self.thermostats
                .iter()
                .map(|d| d.clone() as Arc<dyn LogicalDevice>),
        );
        devices
    }

    fn controllables(&self) -> Vec<Arc<dyn Controllable>> {
        let mut devices: Vec<Arc<dyn Controllable>> = Vec::new();
        devices.extend(self.lights.iter().map(|d| d.clone() as Arc<dyn Controllable>));
        devices.extend(self.outlets.iter().map(|d| d.clone() as Arc<dyn Controllable>));
        devices.extend(self.shutters.iter().map(|d| d.clone() as Arc<dyn Controllable>));
        devices.extend(
            self.thermostats
                .iter()
                .map(|d| d.clone() as Arc<dyn Controllable>),
        );
        devices
    }

    /// Construct and set up every driver the devices reference
    pub async fn init_drivers(&mut self) -> Result<()> {
        let mut requests: Vec<(String, PinRequest)> = Vec::new();
        for device in self.devices() {
            let key = device.driver().to_lowercase();
            let index = match requests.iter().position(|(k, _)| *k == key) {
                Some(index) => index,
                None => {
                    requests.push((
                        key,
                        PinRequest {
                            name: device.driver().to_string(),
                            ..PinRequest::default()
                        },
                    ));
                    requests.len() - 1
                }
            };
            requests[index].1.add(device.inputs(), device.outputs());
        }

        for (key, request) in requests {
            if self.drivers.contains_key(&key) {
                continue;
            }
            let mut driver = self
                .registry
                .create(&request.name)
                .with_context(|| format!("driver {} is not available", request.name))?;

            debug!(
                driver = %request.name,
                kind = ?self.registry.kind(&request.name),
                inputs = ?request.inputs,
                outputs = ?request.outputs,
                "setting up driver"
            );
            if let Err(e) = driver.setup(&request.inputs, &request.outputs).await {
                if let Err(close) = driver.close().await {
                    warn!(driver = %request.name, error = %close, "close after failed setup");
                }
                return Err(anyhow::Error::new(e).context(format!("setting up driver {}", request.name)));
            }
            info!(driver = %request.name, "✅ Driver ready");
            self.drivers.insert(key, driver);
        }
        Ok(())
    }

    fn find_driver(&self, name: &str) -> Option<&dyn IoDriver> {
        self.drivers.get(&name.to_lowercase()).map(|d| d.as_ref())
    }

    /// Hand every device its pin handles
    pub fn init_ios(&self) -> Result<()> {
        for device in self.devices() {
            let driver = self.find_driver(device.driver()).ok_or_else(|| {
                anyhow!(
                    "{} {} uses driver {} which was not set up",
                    device.kind(),
                    device.name(),
                    device.driver()
                )
            })?;
            device
                .init(driver)
                .with_context(|| format!("init {} {}", device.kind(), device.name()))?;
        }
        Ok(())
    }

    /// Register every controllable with the switch or button controlling it
    pub fn match_controllers(&self) -> Result<()> {
        for target in self.controllables() {
            for controller in target.controllers() {
                let driver = controller.driver_or(target.driver());
                if !self.registry.contains(driver) {
                    bail!(
                        "{} {} is controlled through unknown driver {}",
                        target.kind(),
                        target.name(),
                        driver
                    );
                }

                let switch = self.switches.iter().find(|s| {
                    s.pin() == controller.pin && s.driver().eq_ignore_ascii_case(driver)
                });
                let button = self.buttons.iter().find(|b| {
                    b.pin() == controller.pin && b.driver().eq_ignore_ascii_case(driver)
                });
                match (switch, button) {
                    (Some(switch), None) => {
                        debug!(switch = %switch.name(), target = %target.name(), "switch controls");
                        switch.add_target(target.clone());
                    }
                    (None, Some(button)) => {
                        debug!(
                            button = %button.name(),
                            target = %target.name(),
                            event = ?controller.event,
                            "button controls"
                        );
                        button.add_target(controller.event, target.clone());
                    }
                    (Some(switch), Some(button)) => bail!(
                        "{} {}: {} pin {} is both switch {} and button {}",
                        target.kind(),
                        target.name(),
                        driver,
                        controller.pin,
                        switch.name(),
                        button.name()
                    ),
                    (None, None) => bail!(
                        "{} {}: no switch or button on {} pin {}",
                        target.kind(),
                        target.name(),
                        driver,
                        controller.pin
                    ),
                }
            }
        }
        Ok(())
    }

    /// Attach every thermostat to its temperature sensor
    pub fn match_sensors(&self) -> Result<()> {
        for thermostat in &self.thermostats {
            let sensor = self
                .sensor_drivers
                .iter()
                .filter(|d| d.is_ready())
                .find_map(|d| d.find_temperature_sensor(thermostat.sensor_id()))
                .ok_or_else(|| {
                    anyhow!(
                        "thermostat {}: temperature sensor {} not found",
                        thermostat.name(),
                        thermostat.sensor_id()
                    )
                })?;
            thermostat.attach_sensor(sensor);
        }
        Ok(())
    }

    /// Sync every device once; returns how many failed
    pub async fn sync_all(&self) -> usize {
        let mut failed = 0;
        for device in self.devices() {
            if let Err(e) = device.sync().await {
                failed += 1;
                warn!(
                    device = %device.name(),
                    kind = %device.kind(),
                    driver = %device.driver(),
                    error = %e,
                    "sync failed"
                );
            }
        }
        failed
    }

    pub async fn sync_sensors(&self) {
        for driver in &self.sensor_drivers {
            if !driver.is_ready() {
                continue;
            }
            if let Err(e) = driver.sync().await {
                warn!(sensor_driver = %driver.name(), error = %e, "sensor sync failed");
            }
        }
    }

    /// Sync devices and sensors on their intervals until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut devices_tick = interval(self.sync_interval);
        devices_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sensors_tick = interval(self.sensors_sync_interval);
        sensors_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sync_interval = ?self.sync_interval,
            sensors_sync_interval = ?self.sensors_sync_interval,
            "🚀 Hub running"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Hub sync loop stopped");
                    break;
                }
                _ = devices_tick.tick() => {
                    self.sync_all().await;
                }
                _ = sensors_tick.tick() => {
                    self.sync_sensors().await;
                }
            }
        }
    }

    /// Close every driver once, reporting all failures together
    pub async fn close(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for (_, mut driver) in std::mem::take(&mut self.drivers) {
            match driver.close().await {
                Ok(()) => info!(driver = %driver.name(), "Driver closed"),
                Err(e) => {
                    error!(driver = %driver.name(), error = %e, "Driver close failed");
                    failures.push(format!("{}: {}", driver.name(), e));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("closing drivers failed: {}", failures.join("; ")))
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.devices().iter().map(|d| d.status()).collect()
    }

    pub fn status(&self, kind: DeviceKind, name: &str) -> Option<DeviceStatus> {
        self.devices()
            .iter()
            .find(|d| d.kind() == kind && d.name() == name)
            .map(|d| d.status())
    }

    pub fn io_status(&self) -> Vec<IoStatus> {
        self.drivers
            .values()
            .map(|driver| {
                let (inputs, outputs) = driver.all_io();
                IoStatus {
                    driver: driver.name().to_string(),
                    inputs,
                    outputs,
                }
            })
            .collect()
    }

    pub fn light(&self, name: &str) -> Option<Arc<OnOffDevice>> {
        self.lights.iter().find(|d| d.name() == name).cloned()
    }

    pub fn outlet(&self, name: &str) -> Option<Arc<OnOffDevice>> {
        self.outlets.iter().find(|d| d.name() == name).cloned()
    }

    pub fn thermostat(&self, name: &str) -> Option<Arc<ThermostatDevice>> {
        self.thermostats.iter().find(|d| d.name() == name).cloned()
    }

    pub fn shutter(&self, name: &str) -> Option<Arc<ShutterDevice>> {
        self.shutters.iter().find(|d| d.name() == name).cloned()
    }

    pub fn motion_sensor(&self, name: &str) -> Option<Arc<MotionSensorDevice>> {
        self.motion_sensors.iter().find(|d| d.name() == name).cloned()
    }
}
