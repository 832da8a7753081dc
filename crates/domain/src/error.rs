use thiserror::Error;

use crate::pin::{Pin, PinDirection};

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Driver {driver} is not ready")]
    DriverNotReady { driver: String },

    #[error("Driver {driver}: {direction} pin {pin} not found")]
    PinNotFound {
        driver: String,
        direction: PinDirection,
        pin: Pin,
    },

    #[error("Driver {driver}: {direction} pin {pin} out of range (max {max})")]
    PinOutOfRange {
        driver: String,
        direction: PinDirection,
        pin: Pin,
        max: Pin,
    },

    #[error("Driver {driver}: duplicate {direction} pin {pin}")]
    DuplicatePin {
        driver: String,
        direction: PinDirection,
        pin: Pin,
    },

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Invalid driver configuration: {0}")]
    InvalidDriverConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Driver error: {0}")]
    DriverError(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Device {device_id} is not healthy: {reason}")]
    Unhealthy { device_id: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Sensor error: {0}")]
    SensorError(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<DomainError>,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<DomainError>),
}

fn join_errors(errors: &[DomainError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DomainError {
    /// Wrap the error with a short description of what was being attempted
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &DomainError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self.root(), Self::Unhealthy { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), Self::Unsupported(_))
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_root() {
        let err = DomainError::Unhealthy {
            device_id: "shellypro4pm-01".into(),
            reason: "stale".into(),
        }
        .context("set output 3")
        .context("light kitchen");

        assert!(err.is_unhealthy());
        assert_eq!(
            err.to_string(),
            "light kitchen: set output 3: Device shellypro4pm-01 is not healthy: stale"
        );
    }

    #[test]
    fn test_multiple_display() {
        let err = DomainError::Multiple(vec![
            DomainError::DriverError("a".into()),
            DomainError::DriverNotFound("b".into()),
        ]);
        assert_eq!(err.to_string(), "Driver error: a; Driver not found: b");
    }
}
