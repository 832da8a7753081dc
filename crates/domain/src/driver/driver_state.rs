use serde::{Deserialize, Serialize};

/// Lifecycle of a driver
///
/// Non-networked drivers only ever use `Uninitialized`, `Ready` and `Closed`.
/// Networked drivers additionally move through `Discovering` and `Degraded`
/// while they look for devices and recover from unhealthy ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DriverState {
    /// Constructed, `setup` not called or not yet successful
    #[default]
    Uninitialized,
    /// Looking for devices on the network
    Discovering,
    /// All requested pins are backed and usable
    Ready,
    /// Still serving pins, but some devices reported unhealthy
    Degraded,
    /// Resources released; terminal
    Closed,
}

impl DriverState {
    /// Pins can be handed out in this state
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn to_discovering(&self) -> Result<Self, &'static str> {
        match self {
            Self::Uninitialized | Self::Degraded => Ok(Self::Discovering),
            _ => Err("Can only discover from Uninitialized or Degraded state"),
        }
    }

    pub fn to_ready(&self) -> Result<Self, &'static str> {
        match self {
            Self::Uninitialized | Self::Discovering | Self::Degraded => Ok(Self::Ready),
            _ => Err("Can only become ready from Uninitialized, Discovering or Degraded state"),
        }
    }

    pub fn to_degraded(&self) -> Result<Self, &'static str> {
        match self {
            Self::Ready | Self::Degraded => Ok(Self::Degraded),
            _ => Err("Can only degrade from Ready state"),
        }
    }

    /// A failed setup returns the driver to its initial state
    pub fn to_uninitialized(&self) -> Result<Self, &'static str> {
        match self {
            Self::Closed => Err("Closed is terminal"),
            _ => Ok(Self::Uninitialized),
        }
    }

    pub fn to_closed(&self) -> Self {
        Self::Closed
    }
}
