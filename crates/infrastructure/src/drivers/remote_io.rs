use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use domain::error::Result;
use domain::pin::validate_pins;
use domain::{
    DigitalInput, DigitalOutput, DomainError, DriverKind, DriverState, IoDriver, Pin,
    PinDirection,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::pin_table::{PinTable, begin_setup, ensure_ready};

pub const TOKEN_HEADER: &str = "remoteio-token";

const NET_CLIENT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_STATE_AGE: Duration = Duration::from_secs(5);

/// Pins a slave node offers (`GET /config`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfigBody {
    #[serde(default)]
    pub inputs: Vec<Pin>,
    #[serde(default)]
    pub outputs: Vec<Pin>,
}

/// Current levels on a slave node (`GET /state`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStateBody {
    #[serde(default)]
    pub inputs: BTreeMap<Pin, bool>,
    #[serde(default)]
    pub outputs: BTreeMap<Pin, bool>,
}

/// Output write (`POST /output`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetOutputBody {
    pub pin: Pin,
    pub state: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIoConfig {
    /// Registry name, `remoteio` when omitted
    #[serde(default)]
    pub name: Option<String>,
    /// Base url of the slave, e.g. `http://10.0.0.5:8090`
    pub host: String,
    pub token: String,
}

#[derive(Default)]
struct StateCache {
    body: RemoteStateBody,
    synced_at: Option<Instant>,
}

struct RemoteNode {
    client: reqwest::Client,
    base: String,
    token: String,
    cache: Mutex<StateCache>,
    refresh: tokio::sync::Mutex<()>,
}

impl RemoteNode {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn fetch_config(&self) -> Result<RemoteConfigBody> {
        let response = self
            .client
            .get(self.url("config"))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| DomainError::DriverError(format!("remoteio config request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(DomainError::DriverError(format!(
                "remoteio config request returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| DomainError::Protocol(format!("failed to decode remoteio config: {}", e)))
    }

    fn is_fresh(&self) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .synced_at
            .is_some_and(|at| at.elapsed() <= MAX_STATE_AGE)
    }

    /// Re-read `/state` unless another caller just did
    async fn ensure_fresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }
        let _refresh = self.refresh.lock().await;
        if self.is_fresh() {
            return Ok(());
        }

        let response = self
            .client
            .get(self.url("state"))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| DomainError::DriverError(format!("remoteio state request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(DomainError::DriverError(format!(
                "remoteio state request returned {}",
                response.status()
            )));
        }
        let body: RemoteStateBody = response
            .json()
            .await
            .map_err(|e| DomainError::Protocol(format!("failed to decode remoteio state: {}", e)))?;

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.body = body;
        cache.synced_at = Some(Instant::now());
        debug!(host = %self.base, "Remote state refreshed");
        Ok(())
    }

    async fn level(&self, direction: PinDirection, pin: Pin) -> Result<bool> {
        self.ensure_fresh()
            .await
            .map_err(|e| e.context(format!("remote {} pin {}", direction, pin)))?;

        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let levels = match direction {
            PinDirection::Input => &cache.body.inputs,
            PinDirection::Output => &cache.body.outputs,
        };
        levels.get(&pin).copied().ok_or_else(|| {
            DomainError::Protocol(format!("remote state has no {} pin {}", direction, pin))
        })
    }

    async fn set(&self, pin: Pin, state: bool) -> Result<()> {
        let response = self
            .client
            .post(self.url("output"))
            .header(TOKEN_HEADER, &self.token)
            .json(&SetOutputBody { pin, state })
            .send()
            .await
            .map_err(|e| DomainError::DriverError(format!("remoteio output request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(DomainError::DriverError(format!(
                "remoteio output {} request returned {}",
                pin,
                response.status()
            )));
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.body.outputs.insert(pin, state);
        Ok(())
    }
}

/// Client of a `remoteio_slave` running on another host
pub struct RemoteIoDriver {
    name: String,
    config: RemoteIoConfig,
    inputs: PinTable<RemotePin>,
    outputs: PinTable<RemotePin>,
    state: DriverState,
}

impl RemoteIoDriver {
    pub fn new(config: RemoteIoConfig) -> Self {
        Self {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| DriverKind::RemoteIo.as_str().to_string()),
            config,
            inputs: PinTable::new(PinDirection::Input),
            outputs: PinTable::new(PinDirection::Output),
            state: DriverState::default(),
        }
    }

    fn check_offered(&self, direction: PinDirection, requested: &[Pin], offered: &[Pin]) -> Result<()> {
        match requested.iter().find(|pin| !offered.contains(pin)) {
            Some(&pin) => Err(DomainError::PinNotFound {
                driver: self.name.clone(),
                direction,
                pin,
            }
            .context("pin not offered by the remote node")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IoDriver for RemoteIoDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        begin_setup(&self.name, self.state)?;
        validate_pins(&self.name, PinDirection::Input, inputs, None)?;
        validate_pins(&self.name, PinDirection::Output, outputs, None)?;

        let client = reqwest::Client::builder()
            .timeout(NET_CLIENT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| DomainError::DriverError(format!("failed to build http client: {}", e)))?;
        let node = Arc::new(RemoteNode {
            client,
            base: self.config.host.trim_end_matches('/').to_string(),
            token: self.config.token.clone(),
            cache: Mutex::new(StateCache::default()),
            refresh: tokio::sync::Mutex::new(()),
        });

        let offered = node.fetch_config().await?;
        if offered.inputs.is_empty() && offered.outputs.is_empty() {
            return Err(DomainError::DriverError(format!(
                "remote node {} offers no pins",
                node.base
            )));
        }
        self.check_offered(PinDirection::Input, inputs, &offered.inputs)?;
        self.check_offered(PinDirection::Output, outputs, &offered.outputs)?;

        for &pin in inputs {
            self.inputs.push(
                pin,
                Arc::new(RemotePin {
                    pin,
                    direction: PinDirection::Input,
                    node: node.clone(),
                }),
            );
        }
        for &pin in outputs {
            self.outputs.push(
                pin,
                Arc::new(RemotePin {
                    pin,
                    direction: PinDirection::Output,
                    node: node.clone(),
                }),
            );
        }
        self.state = DriverState::Ready;
        info!(driver = %self.name, host = %node.base, ?inputs, ?outputs, "Remote io ready");
        Ok(())
    }

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>> {
        ensure_ready(&self.name, self.is_ready())?;
        Ok(self.inputs.get(&self.name, pin)?)
    }

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
        ensure_ready(&self.name, self.is_ready())?;
        Ok(self.outputs.get(&self.name, pin)?)
    }

    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
        (self.inputs.pins(), self.outputs.pins())
    }

    async fn close(&mut self) -> Result<()> {
        self.inputs.clear();
        self.outputs.clear();
        self.state = self.state.to_closed();
        Ok(())
    }
}

struct RemotePin {
    pin: Pin,
    direction: PinDirection,
    node: Arc<RemoteNode>,
}

#[async_trait]
impl DigitalInput for RemotePin {
    async fn state(&self) -> Result<bool> {
        self.node.level(self.direction, self.pin).await
    }
}

#[async_trait]
impl DigitalOutput for RemotePin {
    async fn state(&self) -> Result<bool> {
        self.node.level(self.direction, self.pin).await
    }

    async fn set(&self, state: bool) -> Result<()> {
        self.node.set(self.pin, state).await
    }
}
