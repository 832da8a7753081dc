use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::error::Result;
use domain::pin::validate_pins;
use domain::{
    DigitalInput, DigitalOutput, DomainError, DriverKind, DriverState, IoDriver, Pin,
    PinDirection,
};
use tracing::{info, warn};

use super::pin_table::{PinTable, begin_setup, ensure_ready};

/// Raw access to a bank of digital lines (a GPIO chip, a port expander)
///
/// Levels are raw: polarity inversion is applied by [`BankIoDriver`].
pub trait PinBank: Send + 'static {
    /// Input with pull-up enabled
    fn configure_input(&mut self, pin: Pin) -> Result<()>;

    /// Output, initially low
    fn configure_output(&mut self, pin: Pin) -> Result<()>;

    fn read(&mut self, pin: Pin) -> Result<bool>;

    fn write(&mut self, pin: Pin, level: bool) -> Result<()>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type BankOpener<B> = Box<dyn Fn() -> Result<B> + Send + Sync>;

/// Settings shared by every bank-backed driver
#[derive(Debug, Clone)]
pub struct BankOptions {
    pub name: String,
    pub kind: DriverKind,
    pub max_pin: Option<Pin>,
    pub invert_inputs: bool,
    pub invert_outputs: bool,
}

/// `IoDriver` over any [`PinBank`]
///
/// The bank is opened in `setup`, so constructing the driver never touches
/// hardware.
pub struct BankIoDriver<B: PinBank> {
    options: BankOptions,
    open: BankOpener<B>,
    bank: Option<Arc<Mutex<B>>>,
    inputs: PinTable<BankInput<B>>,
    outputs: PinTable<BankOutput<B>>,
    state: DriverState,
}

impl<B: PinBank> BankIoDriver<B> {
    pub fn new(options: BankOptions, open: BankOpener<B>) -> Self {
        Self {
            options,
            open,
            bank: None,
            inputs: PinTable::new(PinDirection::Input),
            outputs: PinTable::new(PinDirection::Output),
            state: DriverState::default(),
        }
    }

    pub fn kind(&self) -> DriverKind {
        self.options.kind
    }

    fn configure(bank: &Mutex<B>, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        let mut guard = lock(bank)?;
        for &pin in inputs {
            guard.configure_input(pin)?;
        }
        for &pin in outputs {
            guard.configure_output(pin)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<B: PinBank> IoDriver for BankIoDriver<B> {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        let name = self.options.name.clone();
        begin_setup(&name, self.state)?;
        validate_pins(&name, PinDirection::Input, inputs, self.options.max_pin)?;
        validate_pins(&name, PinDirection::Output, outputs, self.options.max_pin)?;
        if let Some(&pin) = inputs.iter().find(|pin| outputs.contains(pin)) {
            return Err(DomainError::InvalidDriverConfig(format!(
                "driver {}: pin {} requested as both input and output",
                name, pin
            )));
        }

        let bank = Arc::new(Mutex::new((self.open)()?));
        if let Err(e) = Self::configure(&bank, inputs, outputs) {
            if let Err(release_err) = lock(&bank).and_then(|mut b| b.release()) {
                warn!(driver = %name, error = %release_err, "Failed to release pin bank after setup error");
            }
            return Err(e);
        }

        for &pin in inputs {
            self.inputs.push(
                pin,
                Arc::new(BankInput {
                    pin,
                    invert: self.options.invert_inputs,
                    bank: bank.clone(),
                }),
            );
        }
        for &pin in outputs {
            self.outputs.push(
                pin,
                Arc::new(BankOutput {
                    pin,
                    invert: self.options.invert_outputs,
                    bank: bank.clone(),
                }),
            );
        }

        self.bank = Some(bank);
        self.state = DriverState::Ready;
        info!(driver = %name, kind = %self.options.kind, ?inputs, ?outputs, "Pin bank ready");
        Ok(())
    }

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>> {
        ensure_ready(self.name(), self.is_ready())?;
        Ok(self.inputs.get(self.name(), pin)?)
    }

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
        ensure_ready(self.name(), self.is_ready())?;
        Ok(self.outputs.get(self.name(), pin)?)
    }

    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
        (self.inputs.pins(), self.outputs.pins())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = self.state.to_closed();
        let Some(bank) = self.bank.take() else {
            return Ok(());
        };

        let mut guard = lock(&bank)?;
        for pin in self.outputs.pins() {
            if let Err(e) = guard.write(pin, self.options.invert_outputs) {
                warn!(driver = %self.options.name, pin, error = %e, "Failed to switch output off");
            }
        }
        let released = guard.release();
        drop(guard);

        self.inputs.clear();
        self.outputs.clear();
        released
    }
}

fn lock<B>(bank: &Mutex<B>) -> Result<MutexGuard<'_, B>> {
    bank.lock()
        .map_err(|_| DomainError::DriverError("pin bank lock poisoned".to_string()))
}

struct BankInput<B> {
    pin: Pin,
    invert: bool,
    bank: Arc<Mutex<B>>,
}

#[async_trait]
impl<B: PinBank> DigitalInput for BankInput<B> {
    async fn state(&self) -> Result<bool> {
        let level = lock(&self.bank)?.read(self.pin)?;
        Ok(level ^ self.invert)
    }
}

struct BankOutput<B> {
    pin: Pin,
    invert: bool,
    bank: Arc<Mutex<B>>,
}

#[async_trait]
impl<B: PinBank> DigitalOutput for BankOutput<B> {
    async fn state(&self) -> Result<bool> {
        let level = lock(&self.bank)?.read(self.pin)?;
        Ok(level ^ self.invert)
    }

    async fn set(&self, state: bool) -> Result<()> {
        lock(&self.bank)?.write(self.pin, state ^ self.invert)
    }
}

/// Bank backed by a map of levels
///
/// Clones share the same levels, so a test can keep one clone to drive
/// inputs and inspect outputs. Inputs idle high (pull-up).
#[derive(Clone, Default)]
pub struct MemoryBank {
    levels: Arc<Mutex<HashMap<Pin, bool>>>,
    lines: Option<Pin>,
    released: Arc<AtomicBool>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only lines `0..lines` exist
    pub fn with_lines(mut self, lines: Pin) -> Self {
        self.lines = Some(lines);
        self
    }

    pub fn set_level(&self, pin: Pin, level: bool) {
        self.levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, level);
    }

    pub fn level(&self, pin: Pin) -> Option<bool> {
        self.levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .copied()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn check_line(&self, pin: Pin) -> Result<()> {
        match self.lines {
            Some(lines) if pin >= lines => Err(DomainError::DriverError(format!(
                "line {} does not exist",
                pin
            ))),
            _ => Ok(()),
        }
    }
}

impl PinBank for MemoryBank {
    fn configure_input(&mut self, pin: Pin) -> Result<()> {
        self.check_line(pin)?;
        self.levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pin)
            .or_insert(true);
        Ok(())
    }

    fn configure_output(&mut self, pin: Pin) -> Result<()> {
        self.check_line(pin)?;
        self.set_level(pin, false);
        Ok(())
    }

    fn read(&mut self, pin: Pin) -> Result<bool> {
        self.level(pin)
            .ok_or_else(|| DomainError::DriverError(format!("line {} not configured", pin)))
    }

    fn write(&mut self, pin: Pin, level: bool) -> Result<()> {
        self.check_line(pin)?;
        self.set_level(pin, level);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}
