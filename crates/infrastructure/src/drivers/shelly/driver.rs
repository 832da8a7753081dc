use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::error::Result;
use domain::pin::validate_pins;
use domain::{
    DigitalInput, DigitalOutput, DomainError, DriverKind, DriverState, EventListener, IoDriver, Pin,
    PinDirection,
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device::{InputListeners, ShellyDevice};
use super::discovery::{candidate_hosts, probe_all};
use crate::drivers::pin_table::{PinTable, begin_setup, ensure_ready};

const HEALTH_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Output pin bound to `switch:N` of one device
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShellyOutputMapping {
    pub pin: Pin,
    pub device_id: String,
    #[serde(default)]
    pub switch: u8,
}

/// Input pin bound to `input:N` of one device
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShellyInputMapping {
    pub pin: Pin,
    pub device_id: String,
    #[serde(default)]
    pub input: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellyConfig {
    pub origin: Option<String>,
    pub ip_start: Option<String>,
    pub ip_end: Option<String>,
    pub ip_cidr: Option<String>,
    pub hosts: Vec<String>,
    pub outputs: Vec<ShellyOutputMapping>,
    pub inputs: Vec<ShellyInputMapping>,
    pub health_interval_ms: u64,
    /// Unhealthy observations tolerated before re-discovery; 0 disables it
    pub unhealthy_limit: u32,
    pub freshness_secs: u64,
    pub refresh_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub discover_timeout_secs: u64,
    pub probe_concurrency: usize,
}

impl Default for ShellyConfig {
    fn default() -> Self {
        Self {
            origin: None,
            ip_start: None,
            ip_end: None,
            ip_cidr: None,
            hosts: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            health_interval_ms: 2000,
            unhealthy_limit: 5,
            freshness_secs: 900,
            refresh_interval_secs: 60,
            probe_timeout_ms: 400,
            discover_timeout_secs: 20,
            probe_concurrency: 32,
        }
    }
}

impl ShellyConfig {
    fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(1))
    }

    fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn discover_timeout(&self) -> Duration {
        Duration::from_secs(self.discover_timeout_secs)
    }
}

/// Device pool and health bookkeeping shared with handles and the health task
struct ShellyCore {
    name: String,
    config: ShellyConfig,
    devices: RwLock<BTreeMap<String, Arc<ShellyDevice>>>,
    state: Mutex<DriverState>,
    unhealthy_count: AtomicU32,
    listeners: Arc<InputListeners>,
    discovery: tokio::sync::Mutex<()>,
}

impl ShellyCore {
    fn state(&self) -> DriverState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: DriverState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(driver = %self.name, from = ?*state, to = ?next, "Driver state change");
            *state = next;
        }
    }

    /// Apply a transition unless the driver was closed meanwhile
    fn transition(&self, step: impl FnOnce(&DriverState) -> std::result::Result<DriverState, &'static str>) {
        let current = self.state();
        if current.is_closed() {
            return;
        }
        match step(&current) {
            Ok(next) => self.set_state(next),
            Err(reason) => debug!(driver = %self.name, state = ?current, reason, "State transition skipped"),
        }
    }

    fn device(&self, id: &str) -> Option<Arc<ShellyDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn devices(&self) -> Vec<Arc<ShellyDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// One probe and connect pass; returns how many devices were (re)discovered
    async fn discover(&self) -> Result<usize> {
        let _pass = self.discovery.lock().await;
        let config = &self.config;

        let candidates = candidate_hosts(
            config.ip_start.as_deref(),
            config.ip_end.as_deref(),
            config.ip_cidr.as_deref(),
            &config.hosts,
        )?;
        let found = probe_all(&candidates, config.probe_timeout(), config.probe_concurrency).await?;

        let healthy: HashSet<String> = self
            .devices()
            .iter()
            .filter(|device| device.is_healthy())
            .map(|device| device.host().to_string())
            .collect();

        let mut discovered = 0;
        for host in found.iter().filter(|host| !healthy.contains(host.as_str())) {
            let connect = ShellyDevice::discover(
                host,
                config.origin.as_deref(),
                config.freshness(),
                self.listeners.clone(),
            );
            let device = match tokio::time::timeout(config.discover_timeout(), connect).await {
                Ok(Ok(device)) => device,
                Ok(Err(e)) => {
                    warn!(driver = %self.name, host = %host, error = %e, "Skipping device");
                    continue;
                }
                Err(_) => {
                    warn!(driver = %self.name, host = %host, timeout = ?config.discover_timeout(), "Device discovery timed out");
                    continue;
                }
            };

            device.start(config.refresh_interval());
            info!(driver = %self.name, "Discovered {}", device);
            let previous = self
                .devices
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(device.id().to_string(), device);
            if let Some(previous) = previous {
                previous.close().await;
            }
            discovered += 1;
        }
        Ok(discovered)
    }

    fn check_outputs(&self, mappings: &[&ShellyOutputMapping]) -> Result<()> {
        for mapping in mappings {
            let device = self.device(&mapping.device_id).ok_or_else(|| {
                DomainError::DriverError(format!("device {} not discovered", mapping.device_id))
            })?;
            if !device.has_switch(mapping.switch) {
                return Err(DomainError::DriverError(format!(
                    "device {} has no switch:{}",
                    mapping.device_id, mapping.switch
                ))
                .context(format!("output pin {}", mapping.pin)));
            }
        }
        Ok(())
    }

    fn check_inputs(&self, mappings: &[&ShellyInputMapping]) -> Result<()> {
        for mapping in mappings {
            let device = self.device(&mapping.device_id).ok_or_else(|| {
                DomainError::DriverError(format!("device {} not discovered", mapping.device_id))
            })?;
            if !device.has_input(mapping.input) {
                return Err(DomainError::DriverError(format!(
                    "device {} has no input:{}",
                    mapping.device_id, mapping.input
                ))
                .context(format!("input pin {}", mapping.pin)));
            }
        }
        Ok(())
    }

    /// Ids of devices referenced by pin mappings
    fn mapped_ids(&self) -> HashSet<&str> {
        self.config
            .outputs
            .iter()
            .map(|m| m.device_id.as_str())
            .chain(self.config.inputs.iter().map(|m| m.device_id.as_str()))
            .collect()
    }

    async fn check_health(&self) -> bool {
        if !self.state().is_ready() {
            return false;
        }

        let devices = self.devices();
        let mut unhealthy: u32 = 0;
        for device in &devices {
            if let Err(e) = device.health_check() {
                warn!(driver = %self.name, error = %e, "Unhealthy device");
                unhealthy += 1;
            }
        }
        for id in self.mapped_ids() {
            if !devices.iter().any(|device| device.id() == id) {
                warn!(driver = %self.name, device_id = id, "Mapped device missing from pool");
                unhealthy += 1;
            }
        }

        if unhealthy == 0 {
            if self.state() == DriverState::Degraded {
                info!(driver = %self.name, "All devices healthy again");
                self.transition(DriverState::to_ready);
            }
            return true;
        }

        self.transition(DriverState::to_degraded);
        let count = self.unhealthy_count.fetch_add(unhealthy, Ordering::SeqCst) + unhealthy;
        let limit = self.config.unhealthy_limit;
        if limit == 0 || count <= limit {
            return false;
        }

        warn!(driver = %self.name, count, limit, "Unhealthy limit exceeded, re-discovering");
        self.transition(DriverState::to_discovering);
        match self.discover().await {
            Ok(discovered) => {
                self.unhealthy_count.store(0, Ordering::SeqCst);
                info!(driver = %self.name, discovered, "Re-discovery finished");
                self.transition(DriverState::to_ready);
            }
            Err(e) => {
                error!(driver = %self.name, error = %e, "Re-discovery failed");
                if self.state() == DriverState::Discovering {
                    self.set_state(DriverState::Degraded);
                }
            }
        }
        false
    }

    async fn close_devices(&self) {
        let devices: Vec<_> = std::mem::take(&mut *self.devices.write().unwrap_or_else(PoisonError::into_inner))
            .into_values()
            .collect();
        for device in devices {
            device.close().await;
        }
    }
}

/// Gen2 Shelly relays discovered on the local network
pub struct ShellyDriver {
    core: Arc<ShellyCore>,
    inputs: PinTable<ShellyInput>,
    outputs: PinTable<ShellyOutput>,
    cancel: CancellationToken,
    health: Option<JoinHandle<()>>,
}

impl ShellyDriver {
    pub fn new(config: ShellyConfig) -> Self {
        Self {
            core: Arc::new(ShellyCore {
                name: DriverKind::Shelly.as_str().to_string(),
                config,
                devices: RwLock::new(BTreeMap::new()),
                state: Mutex::new(DriverState::default()),
                unhealthy_count: AtomicU32::new(0),
                listeners: Arc::new(InputListeners::default()),
                discovery: tokio::sync::Mutex::new(()),
            }),
            inputs: PinTable::new(PinDirection::Input),
            outputs: PinTable::new(PinDirection::Output),
            cancel: CancellationToken::new(),
            health: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.core.state()
    }

    pub fn devices(&self) -> Vec<Arc<ShellyDevice>> {
        self.core.devices()
    }

    pub fn device(&self, id: &str) -> Option<Arc<ShellyDevice>> {
        self.core.device(id)
    }

    pub fn unhealthy_count(&self) -> u32 {
        self.core.unhealthy_count.load(Ordering::SeqCst)
    }

    /// Run one discovery pass outside the health loop
    pub async fn discover(&self) -> Result<usize> {
        self.core.discover().await
    }

    /// One health tick; true when every device is healthy
    pub async fn check_health(&self) -> bool {
        self.core.check_health().await
    }

    fn output_mapping(&self, pin: Pin) -> Result<&ShellyOutputMapping> {
        self.core.config.outputs.iter().find(|m| m.pin == pin).ok_or_else(|| {
            DomainError::PinNotFound {
                driver: self.core.name.clone(),
                direction: PinDirection::Output,
                pin,
            }
            .context("no shelly output mapping")
        })
    }

    fn input_mapping(&self, pin: Pin) -> Result<&ShellyInputMapping> {
        self.core.config.inputs.iter().find(|m| m.pin == pin).ok_or_else(|| {
            DomainError::PinNotFound {
                driver: self.core.name.clone(),
                direction: PinDirection::Input,
                pin,
            }
            .context("no shelly input mapping")
        })
    }

    fn spawn_health_loop(&mut self) {
        let core = self.core.clone();
        let cancel = self.cancel.clone();
        let interval = core.config.health_interval();
        self.health = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = async {
                        ticker.tick().await;
                        core.check_health().await;
                    } => {}
                }
            }
            debug!(driver = %core.name, "Health monitor stopped");
        }));
    }
}

#[async_trait]
impl IoDriver for ShellyDriver {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn is_ready(&self) -> bool {
        self.core.state().is_ready()
    }

    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        let name = self.core.name.clone();
        begin_setup(&name, self.core.state())?;
        validate_pins(&name, PinDirection::Input, inputs, None)?;
        validate_pins(&name, PinDirection::Output, outputs, None)?;

        let input_maps = inputs
            .iter()
            .map(|&pin| self.input_mapping(pin))
            .collect::<Result<Vec<_>>>()?;
        let output_maps = outputs
            .iter()
            .map(|&pin| self.output_mapping(pin))
            .collect::<Result<Vec<_>>>()?;

        self.core.transition(DriverState::to_discovering);
        let discovered = self.core.discover().await.and_then(|discovered| {
            self.core.check_inputs(&input_maps)?;
            self.core.check_outputs(&output_maps)?;
            Ok(discovered)
        });
        let discovered = match discovered {
            Ok(discovered) => discovered,
            Err(e) => {
                self.core.close_devices().await;
                self.core.transition(DriverState::to_uninitialized);
                return Err(e.context(format!("{} discovery", name)));
            }
        };

        let input_handles: Vec<_> = input_maps
            .iter()
            .map(|m| {
                (
                    m.pin,
                    Arc::new(ShellyInput {
                        core: self.core.clone(),
                        pin: m.pin,
                        device_id: m.device_id.clone(),
                        input: m.input,
                    }),
                )
            })
            .collect();
        let output_handles: Vec<_> = output_maps
            .iter()
            .map(|m| {
                (
                    m.pin,
                    Arc::new(ShellyOutput {
                        core: self.core.clone(),
                        pin: m.pin,
                        device_id: m.device_id.clone(),
                        switch: m.switch,
                    }),
                )
            })
            .collect();
        for (pin, handle) in input_handles {
            self.inputs.push(pin, handle);
        }
        for (pin, handle) in output_handles {
            self.outputs.push(pin, handle);
        }

        self.core.transition(DriverState::to_ready);
        self.spawn_health_loop();
        info!(driver = %name, devices = discovered, ?inputs, ?outputs, "Shelly driver ready");
        Ok(())
    }

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>> {
        ensure_ready(&self.core.name, self.is_ready())?;
        Ok(self.inputs.get(&self.core.name, pin)?)
    }

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
        ensure_ready(&self.core.name, self.is_ready())?;
        Ok(self.outputs.get(&self.core.name, pin)?)
    }

    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
        (self.inputs.pins(), self.outputs.pins())
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(mut health) = self.health.take() {
            if tokio::time::timeout(HEALTH_STOP_TIMEOUT, &mut health).await.is_err() {
                health.abort();
            }
        }
        self.core.close_devices().await;
        self.inputs.clear();
        self.outputs.clear();
        self.core.set_state(DriverState::Closed);
        Ok(())
    }
}

impl Drop for ShellyDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolves its device at call time so re-discovery is picked up
struct ShellyOutput {
    core: Arc<ShellyCore>,
    pin: Pin,
    device_id: String,
    switch: u8,
}

impl ShellyOutput {
    fn device(&self) -> Result<Arc<ShellyDevice>> {
        healthy_device(&self.core, &self.device_id)
            .map_err(|e| e.context(format!("shelly output {}", self.pin)))
    }
}

#[async_trait]
impl DigitalOutput for ShellyOutput {
    async fn state(&self) -> Result<bool> {
        let device = self.device()?;
        device.switch_output(self.switch).ok_or_else(|| {
            DomainError::Protocol(format!("device {} has no switch:{}", self.device_id, self.switch))
        })
    }

    async fn set(&self, state: bool) -> Result<()> {
        let device = self.device()?;
        device.set_switch(self.switch, state).await
    }
}

struct ShellyInput {
    core: Arc<ShellyCore>,
    pin: Pin,
    device_id: String,
    input: u8,
}

#[async_trait]
impl DigitalInput for ShellyInput {
    async fn state(&self) -> Result<bool> {
        let device = healthy_device(&self.core, &self.device_id)
            .map_err(|e| e.context(format!("shelly input {}", self.pin)))?;
        match device.input_state(self.input) {
            Some(Some(state)) => Ok(state),
            Some(None) => Err(DomainError::Unsupported(format!(
                "input:{} of {} is a button and has no level",
                self.input, self.device_id
            ))),
            None => Err(DomainError::Protocol(format!(
                "device {} has no input:{}",
                self.device_id, self.input
            ))),
        }
    }

    fn subscribe(&self, listener: Arc<dyn EventListener>) -> Result<()> {
        self.core.listeners.subscribe(&self.device_id, self.input, listener);
        Ok(())
    }
}

fn healthy_device(core: &ShellyCore, device_id: &str) -> Result<Arc<ShellyDevice>> {
    let device = core.device(device_id).ok_or_else(|| DomainError::Unhealthy {
        device_id: device_id.to_string(),
        reason: "device not discovered".to_string(),
    })?;
    device.health_check()?;
    Ok(device)
}
