use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Identifies one line within a single driver's namespace.
pub type Pin = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    Input,
    Output,
}

impl PinDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for PinDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a pin request before any backend resource is touched.
///
/// Rejects pins above `max` (when the backend has a fixed range) and
/// duplicates within the list.
pub fn validate_pins(
    driver: &str,
    direction: PinDirection,
    pins: &[Pin],
    max: Option<Pin>,
) -> Result<()> {
    let mut seen = HashSet::with_capacity(pins.len());
    for &pin in pins {
        if let Some(max) = max.filter(|max| pin > *max) {
            return Err(DomainError::PinOutOfRange {
                driver: driver.to_string(),
                direction,
                pin,
                max,
            });
        }
        if !seen.insert(pin) {
            return Err(DomainError::DuplicatePin {
                driver: driver.to_string(),
                direction,
                pin,
            });
        }
    }
    Ok(())
}
