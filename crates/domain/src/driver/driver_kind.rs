use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Hardware backend a driver talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    #[serde(rename = "gpio")]
    Gpio,
    #[serde(rename = "mcpio")]
    Mcp23017,
    #[serde(rename = "grenton")]
    Grenton,
    #[serde(rename = "mock")]
    Mock,
    #[serde(rename = "remoteio")]
    RemoteIo,
    #[serde(rename = "remoteio_slave")]
    RemoteIoSlave,
    #[serde(rename = "shelly")]
    Shelly,
}

impl DriverKind {
    pub const ALL: [DriverKind; 7] = [
        Self::Gpio,
        Self::Mcp23017,
        Self::Grenton,
        Self::Mock,
        Self::RemoteIo,
        Self::RemoteIoSlave,
        Self::Shelly,
    ];

    /// Registry name used when a driver is not given an explicit one
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpio => "gpio",
            Self::Mcp23017 => "mcpio",
            Self::Grenton => "grenton",
            Self::Mock => "mock",
            Self::RemoteIo => "remoteio",
            Self::RemoteIoSlave => "remoteio_slave",
            Self::Shelly => "shelly",
        }
    }

    /// Networked drivers talk to devices that can disappear at runtime
    pub fn is_networked(&self) -> bool {
        matches!(self, Self::Grenton | Self::RemoteIo | Self::Shelly)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| DomainError::DriverNotFound(s.to_string()))
    }
}
