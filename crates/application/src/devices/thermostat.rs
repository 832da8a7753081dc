use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::device::{ThermostatConfig, ThermostatMode, device_id};
use domain::error::Result;
use domain::{
    ControllingDevice, DeviceKind, DeviceStatus, DigitalOutput, DomainError, IoDriver, Pin,
    StateChange, TemperatureSensor,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use super::{Controllable, Events, Handle, LogicalDevice, check_driver};

/// Heating and cooling demand for one reading
///
/// The thresholds form a hysteresis band around the target: a running output
/// keeps running until the temperature passes the target by its threshold.
pub fn heating_cooling_demand(
    config: &ThermostatConfig,
    mode: ThermostatMode,
    current: f64,
    target: f64,
    heating: bool,
    cooling: bool,
) -> (bool, bool) {
    let heat_offset = if heating {
        config.heating_threshold
    } else {
        -config.heating_threshold
    };
    let cool_offset = if cooling {
        -config.cooling_threshold
    } else {
        config.cooling_threshold
    };
    let heat = current < target + heat_offset;
    let cool = config.cooling_enabled && current > target + cool_offset;

    match mode {
        ThermostatMode::Off => (false, false),
        ThermostatMode::Heat => (heat, false),
        ThermostatMode::Cool => (false, cool),
        ThermostatMode::Auto if heat => (true, false),
        ThermostatMode::Auto => (false, cool),
    }
}

#[derive(Debug, Clone, Copy)]
struct Control {
    mode: ThermostatMode,
    /// Mode restored when switched back on
    resume: ThermostatMode,
    target: f64,
    current: Option<f64>,
    heating: bool,
    cooling: bool,
}

pub struct ThermostatDevice {
    config: ThermostatConfig,
    heat: Handle<dyn DigitalOutput>,
    cool: Handle<dyn DigitalOutput>,
    sensor: Mutex<Option<Arc<dyn TemperatureSensor>>>,
    control: Mutex<Control>,
    fault: AtomicBool,
    apply: AsyncMutex<()>,
    events: Events,
}

impl ThermostatDevice {
    pub fn new(config: ThermostatConfig, events: Events) -> Self {
        let mode = match config.mode {
            ThermostatMode::Cool | ThermostatMode::Auto if !config.cooling_enabled => {
                warn!(
                    thermostat = %config.name,
                    mode = ?config.mode,
                    "cooling disabled, starting in heat mode"
                );
                ThermostatMode::Heat
            }
            mode => mode,
        };
        let target = clamp_to_step(&config, config.target_temperature);
        Self {
            control: Mutex::new(Control {
                mode,
                resume: if mode == ThermostatMode::Off {
                    ThermostatMode::Heat
                } else {
                    mode
                },
                target,
                current: None,
                heating: false,
                cooling: false,
            }),
            config,
            heat: Handle::default(),
            cool: Handle::default(),
            sensor: Mutex::new(None),
            fault: AtomicBool::new(false),
            apply: AsyncMutex::new(()),
            events,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.config.sensor_id
    }

    pub fn attach_sensor(&self, sensor: Arc<dyn TemperatureSensor>) {
        *self.sensor.lock().unwrap_or_else(PoisonError::into_inner) = Some(sensor);
    }

    pub fn mode(&self) -> ThermostatMode {
        self.control().mode
    }

    pub fn target_temperature(&self) -> f64 {
        self.control().target
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.control().current
    }

    /// `(heating, cooling)` as last written
    pub fn outputs_state(&self) -> (bool, bool) {
        let control = self.control();
        (control.heating, control.cooling)
    }

    pub fn set_mode(&self, mode: ThermostatMode) -> Result<()> {
        if matches!(mode, ThermostatMode::Cool | ThermostatMode::Auto)
            && !self.config.cooling_enabled
        {
            return Err(DomainError::Unsupported(format!(
                "thermostat {} has cooling disabled",
                self.config.name
            )));
        }
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        control.mode = mode;
        if mode != ThermostatMode::Off {
            control.resume = mode;
        }
        Ok(())
    }

    /// Clamp to the configured range and snap to the step; returns the stored target
    pub fn set_target_temperature(&self, target: f64) -> f64 {
        let target = clamp_to_step(&self.config, target);
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target = target;
        target
    }

    fn control(&self) -> Control {
        *self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write(&self, handle: &Handle<dyn DigitalOutput>, on: bool, label: &str) -> Result<()> {
        let output = handle.get(&self.config.name)?;
        output
            .set(on)
            .await
            .map_err(|e| e.context(format!("thermostat {} {} output", self.config.name, label)))
    }

    async fn apply(&self) -> Result<()> {
        let _guard = self.apply.lock().await;

        let sensor = self
            .sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                DomainError::SensorError(format!(
                    "thermostat {} has no sensor {}",
                    self.config.name, self.config.sensor_id
                ))
            })?;
        let current = sensor.temperature().await.map_err(|e| {
            self.fault.store(true, Ordering::SeqCst);
            e.context(format!("thermostat {} sensor", self.config.name))
        })?;

        let before = self.control();
        let (heat, cool) = heating_cooling_demand(
            &self.config,
            before.mode,
            current,
            before.target,
            before.heating,
            before.cooling,
        );

        // Switch off before switching on so both never run together
        let mut writes = vec![(&self.heat, heat, "heat")];
        if self.cool.is_set() {
            writes.push((&self.cool, cool, "cool"));
        }
        writes.sort_by_key(|(_, on, _)| *on);
        let mut result = Ok(());
        for (handle, on, label) in writes {
            if let Err(e) = self.write(handle, on, label).await {
                result = Err(e);
                break;
            }
        }
        self.fault.store(result.is_err(), Ordering::SeqCst);
        result?;

        {
            let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
            control.current = Some(current);
            control.heating = heat;
            control.cooling = cool;
        }
        if heat != before.heating || cool != before.cooling || before.current.is_none() {
            debug!(
                thermostat = %self.config.name,
                current,
                target = before.target,
                heat,
                cool,
                "thermostat outputs changed"
            );
            let _ = self.events.send(StateChange::thermostat(
                &self.config.name,
                heat,
                cool,
                current,
            ));
        }
        Ok(())
    }
}

fn clamp_to_step(config: &ThermostatConfig, target: f64) -> f64 {
    let (min, max) = (config.min_temperature, config.max_temperature);
    // Unordered bounds leave the target as requested
    if !matches!(
        min.partial_cmp(&max),
        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
    ) {
        return target;
    }
    let clamped = target.clamp(min, max);
    if config.step.is_nan() || config.step <= 0.0 {
        return clamped;
    }
    let stepped = ((clamped - config.min_temperature) / config.step).round() * config.step
        + config.min_temperature;
    stepped.min(config.max_temperature)
}

#[async_trait]
impl LogicalDevice for ThermostatDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Thermostat
    }

    fn driver(&self) -> &str {
        &self.config.driver
    }

    fn outputs(&self) -> Vec<Pin> {
        self.config.output_pins()
    }

    fn init(&self, driver: &dyn IoDriver) -> Result<()> {
        check_driver(&self.config.name, &self.config.driver, driver)?;
        self.heat.set(driver.output(self.config.heat_pin)?);
        if let Some(pin) = self.config.cool_pin.filter(|_| self.config.cooling_enabled) {
            self.cool.set(driver.output(pin)?);
        }
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        self.apply().await
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: device_id(DeviceKind::Thermostat, &self.config.driver, self.config.heat_pin),
            name: self.config.name.clone(),
            kind: DeviceKind::Thermostat,
            on: self.mode() != ThermostatMode::Off,
            fault: self.fault.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Controllable for ThermostatDevice {
    fn controllers(&self) -> &[ControllingDevice] {
        &self.config.control_by
    }

    /// On resumes the last active mode, off stops both outputs
    async fn set_value(&self, on: bool) -> Result<()> {
        let mode = if on {
            self.control().resume
        } else {
            ThermostatMode::Off
        };
        self.set_mode(mode)?;
        let _ = self.events.send(StateChange::power(
            &self.config.name,
            DeviceKind::Thermostat,
            on,
        ));
        self.apply().await
    }

    async fn toggle(&self) -> Result<()> {
        self.set_value(self.mode() == ThermostatMode::Off).await
    }
}
