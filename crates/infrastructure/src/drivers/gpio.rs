use domain::error::Result;
use domain::{DomainError, DriverKind, Pin};
use serde::Deserialize;

use super::bank::{BankIoDriver, BankOptions, PinBank};

/// Raspberry Pi GPIO, BCM numbering
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GpioConfig {
    #[serde(default)]
    pub invert_inputs: bool,
    #[serde(default)]
    pub invert_outputs: bool,
}

pub type GpioIoDriver = BankIoDriver<GpioBank>;

pub fn gpio_driver(config: GpioConfig) -> GpioIoDriver {
    BankIoDriver::new(
        BankOptions {
            name: DriverKind::Gpio.as_str().to_string(),
            kind: DriverKind::Gpio,
            max_pin: Some(Pin::from(u8::MAX)),
            invert_inputs: config.invert_inputs,
            invert_outputs: config.invert_outputs,
        },
        Box::new(GpioBank::open),
    )
}

fn line(pin: Pin) -> Result<u8> {
    u8::try_from(pin).map_err(|_| DomainError::DriverError(format!("gpio line {} out of range", pin)))
}

#[cfg(target_os = "linux")]
pub use linux::GpioBank;

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashMap;

    use rppal::gpio::{Gpio, InputPin, OutputPin};

    use super::*;

    pub struct GpioBank {
        gpio: Gpio,
        inputs: HashMap<Pin, InputPin>,
        outputs: HashMap<Pin, OutputPin>,
    }

    impl GpioBank {
        pub fn open() -> Result<Self> {
            let gpio = Gpio::new()
                .map_err(|e| DomainError::DriverError(format!("failed to open gpio: {}", e)))?;
            Ok(Self {
                gpio,
                inputs: HashMap::new(),
                outputs: HashMap::new(),
            })
        }

        fn claim(&self, pin: Pin) -> Result<rppal::gpio::Pin> {
            self.gpio
                .get(line(pin)?)
                .map_err(|e| DomainError::DriverError(format!("gpio line {}: {}", pin, e)))
        }
    }

    impl PinBank for GpioBank {
        fn configure_input(&mut self, pin: Pin) -> Result<()> {
            let input = self.claim(pin)?.into_input_pullup();
            self.inputs.insert(pin, input);
            Ok(())
        }

        fn configure_output(&mut self, pin: Pin) -> Result<()> {
            let output = self.claim(pin)?.into_output_low();
            self.outputs.insert(pin, output);
            Ok(())
        }

        fn read(&mut self, pin: Pin) -> Result<bool> {
            if let Some(input) = self.inputs.get(&pin) {
                return Ok(input.is_high());
            }
            self.outputs
                .get(&pin)
                .map(|output| output.is_set_high())
                .ok_or_else(|| DomainError::DriverError(format!("gpio line {} not configured", pin)))
        }

        fn write(&mut self, pin: Pin, level: bool) -> Result<()> {
            let output = self.outputs.get_mut(&pin).ok_or_else(|| {
                DomainError::DriverError(format!("gpio line {} is not an output", pin))
            })?;
            if level {
                output.set_high();
            } else {
                output.set_low();
            }
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.inputs.clear();
            self.outputs.clear();
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::GpioBank;

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    pub struct GpioBank;

    impl GpioBank {
        pub fn open() -> Result<Self> {
            Err(DomainError::Unsupported(
                "gpio is only available on Linux".to_string(),
            ))
        }
    }

    impl PinBank for GpioBank {
        fn configure_input(&mut self, pin: Pin) -> Result<()> {
            line(pin).map(|_| ())
        }

        fn configure_output(&mut self, pin: Pin) -> Result<()> {
            line(pin).map(|_| ())
        }

        fn read(&mut self, _pin: Pin) -> Result<bool> {
            Err(DomainError::Unsupported("gpio".to_string()))
        }

        fn write(&mut self, _pin: Pin, _level: bool) -> Result<()> {
            Err(DomainError::Unsupported("gpio".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::IoDriver;

    #[tokio::test]
    async fn test_gpio_rejects_lines_above_255() {
        let mut driver = gpio_driver(GpioConfig::default());
        let err = driver.setup(&[256], &[]).await.unwrap_err();
        assert!(matches!(err, DomainError::PinOutOfRange { pin: 256, .. }));
        assert_eq!(driver.name(), "gpio");
    }
}
