use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Kind of press reported by a push-capable input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEvent {
    Single,
    Double,
    Long,
}

impl PushEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for PushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushEvent {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "double" => Ok(Self::Double),
            "long" => Ok(Self::Long),
            other => Err(DomainError::Protocol(format!("unknown push event: {}", other))),
        }
    }
}

/// Receives push events from an input
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn fire_event(&self, event: PushEvent);
}

/// Read handle for one input pin
#[async_trait]
pub trait DigitalInput: Send + Sync {
    /// Logical level, polarity already applied
    async fn state(&self) -> Result<bool>;

    /// Register for push events. Inputs that can only be polled refuse.
    fn subscribe(&self, _listener: Arc<dyn EventListener>) -> Result<()> {
        Err(DomainError::Unsupported(
            "input does not deliver push events".to_string(),
        ))
    }
}

/// Read/write handle for one output pin
#[async_trait]
pub trait DigitalOutput: Send + Sync {
    async fn state(&self) -> Result<bool>;

    async fn set(&self, state: bool) -> Result<()>;
}
