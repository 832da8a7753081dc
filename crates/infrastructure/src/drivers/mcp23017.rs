use domain::error::Result;
use domain::{DomainError, DriverKind, Pin};
use serde::Deserialize;

use super::bank::{BankIoDriver, BankOptions, PinBank};

// Register addresses with IOCON.BANK = 0; port B follows port A.
const IODIRA: u8 = 0x00;
const GPPUA: u8 = 0x0C;
const GPIOA: u8 = 0x12;
const OLATA: u8 = 0x14;

const MAX_PIN: Pin = 15;

/// MCP23017 16-bit I2C port expander. Pins 0..=7 are A0..A7, 8..=15 are B0..B7.
#[derive(Debug, Clone, Deserialize)]
pub struct Mcp23017Config {
    #[serde(default = "default_bus")]
    pub bus: u8,
    #[serde(default = "default_address")]
    pub address: u16,
    #[serde(default)]
    pub invert_inputs: bool,
    #[serde(default)]
    pub invert_outputs: bool,
}

fn default_bus() -> u8 {
    1
}

fn default_address() -> u16 {
    0x20
}

impl Default for Mcp23017Config {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            address: default_address(),
            invert_inputs: false,
            invert_outputs: false,
        }
    }
}

/// Byte-wide register access on one I2C device
pub trait RegisterBus: Send + 'static {
    fn read_register(&mut self, register: u8) -> Result<u8>;

    fn write_register(&mut self, register: u8, value: u8) -> Result<()>;
}

pub struct Mcp23017Bank<R> {
    bus: R,
    iodir: u16,
    gppu: u16,
    olat: u16,
}

impl<R: RegisterBus> Mcp23017Bank<R> {
    /// Resets the chip to all inputs, no pull-ups, latches low
    pub fn new(bus: R) -> Result<Self> {
        let mut bank = Self {
            bus,
            iodir: 0xFFFF,
            gppu: 0,
            olat: 0,
        };
        bank.write_pair(OLATA, bank.olat)?;
        bank.write_pair(IODIRA, bank.iodir)?;
        bank.write_pair(GPPUA, bank.gppu)?;
        Ok(bank)
    }

    fn write_pair(&mut self, register_a: u8, value: u16) -> Result<()> {
        let [low, high] = value.to_le_bytes();
        self.bus.write_register(register_a, low)?;
        self.bus.write_register(register_a + 1, high)
    }

    fn is_output(&self, pin: Pin) -> bool {
        self.iodir & bit(pin) == 0
    }
}

fn bit(pin: Pin) -> u16 {
    1 << pin
}

fn port(pin: Pin) -> u8 {
    if pin < 8 { 0 } else { 1 }
}

fn check(pin: Pin) -> Result<()> {
    if pin > MAX_PIN {
        return Err(DomainError::DriverError(format!("mcp23017 has no pin {}", pin)));
    }
    Ok(())
}

impl<R: RegisterBus> PinBank for Mcp23017Bank<R> {
    fn configure_input(&mut self, pin: Pin) -> Result<()> {
        check(pin)?;
        self.iodir |= bit(pin);
        self.gppu |= bit(pin);
        self.write_pair(IODIRA, self.iodir)?;
        self.write_pair(GPPUA, self.gppu)
    }

    fn configure_output(&mut self, pin: Pin) -> Result<()> {
        check(pin)?;
        self.olat &= !bit(pin);
        self.write_pair(OLATA, self.olat)?;
        self.iodir &= !bit(pin);
        self.write_pair(IODIRA, self.iodir)
    }

    fn read(&mut self, pin: Pin) -> Result<bool> {
        check(pin)?;
        if self.is_output(pin) {
            return Ok(self.olat & bit(pin) != 0);
        }
        let value = self.bus.read_register(GPIOA + port(pin))?;
        Ok(value & (1 << (pin % 8)) != 0)
    }

    fn write(&mut self, pin: Pin, level: bool) -> Result<()> {
        check(pin)?;
        if !self.is_output(pin) {
            return Err(DomainError::DriverError(format!(
                "mcp23017 pin {} is not an output",
                pin
            )));
        }
        if level {
            self.olat |= bit(pin);
        } else {
            self.olat &= !bit(pin);
        }
        let [low, high] = self.olat.to_le_bytes();
        let value = if port(pin) == 0 { low } else { high };
        self.bus.write_register(OLATA + port(pin), value)
    }

    fn release(&mut self) -> Result<()> {
        self.olat = 0;
        self.write_pair(OLATA, self.olat)?;
        self.iodir = 0xFFFF;
        self.write_pair(IODIRA, self.iodir)
    }
}

pub type Mcp23017IoDriver = BankIoDriver<Mcp23017Bank<I2cBus>>;

pub fn mcp23017_driver(config: Mcp23017Config) -> Mcp23017IoDriver {
    let (bus, address) = (config.bus, config.address);
    BankIoDriver::new(
        BankOptions {
            name: DriverKind::Mcp23017.as_str().to_string(),
            kind: DriverKind::Mcp23017,
            max_pin: Some(MAX_PIN),
            invert_inputs: config.invert_inputs,
            invert_outputs: config.invert_outputs,
        },
        Box::new(move || Mcp23017Bank::new(I2cBus::open(bus, address)?)),
    )
}

#[cfg(target_os = "linux")]
pub struct I2cBus(rppal::i2c::I2c);

#[cfg(target_os = "linux")]
impl I2cBus {
    pub fn open(bus: u8, address: u16) -> Result<Self> {
        let mut i2c = rppal::i2c::I2c::with_bus(bus)
            .map_err(|e| DomainError::DriverError(format!("failed to open i2c bus {}: {}", bus, e)))?;
        i2c.set_slave_address(address).map_err(|e| {
            DomainError::DriverError(format!("failed to address i2c device {:#04x}: {}", address, e))
        })?;
        Ok(Self(i2c))
    }
}

#[cfg(target_os = "linux")]
impl RegisterBus for I2cBus {
    fn read_register(&mut self, register: u8) -> Result<u8> {
        self.0
            .smbus_read_byte(register)
            .map_err(|e| DomainError::DriverError(format!("i2c read {:#04x}: {}", register, e)))
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.0
            .smbus_write_byte(register, value)
            .map_err(|e| DomainError::DriverError(format!("i2c write {:#04x}: {}", register, e)))
    }
}

#[cfg(not(target_os = "linux"))]
pub struct I2cBus;

#[cfg(not(target_os = "linux"))]
impl I2cBus {
    pub fn open(_bus: u8, _address: u16) -> Result<Self> {
        Err(DomainError::Unsupported(
            "i2c is only available on Linux".to_string(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
impl RegisterBus for I2cBus {
    fn read_register(&mut self, _register: u8) -> Result<u8> {
        Err(DomainError::Unsupported("i2c".to_string()))
    }

    fn write_register(&mut self, _register: u8, _value: u8) -> Result<()> {
        Err(DomainError::Unsupported("i2c".to_string()))
    }
}
