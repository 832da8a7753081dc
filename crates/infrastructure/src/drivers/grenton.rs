use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use domain::error::Result;
use domain::pin::validate_pins;
use domain::{
    DigitalInput, DigitalOutput, DomainError, DriverKind, DriverState, IoDriver, Pin,
    PinDirection,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::pin_table::{PinTable, begin_setup, ensure_ready};

const NET_CLIENT_TIMEOUT: Duration = Duration::from_millis(4500);
const MAX_OBJECT_ID: Pin = 9999;

#[derive(Debug, Clone, Deserialize)]
pub struct GrentonConfig {
    /// Base url of the gateway, e.g. `http://192.168.1.20`
    pub gate_address: String,
    pub clu_id: u32,
    #[serde(default = "default_object_freshness_ms")]
    pub object_freshness_ms: u64,
}

fn default_object_freshness_ms() -> u64 {
    20_000
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GrentonObject {
    kind: &'static str,
    clu: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmd: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    light: Option<LightState>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LightState {
    state: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GrentonObjectState {
    id: String,
    #[serde(default)]
    light: Option<LightState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ObjectState {
    state: bool,
    refreshed_at: Option<Instant>,
}

/// Connection to one gateway; every request goes through `gate`
struct GrentonGate {
    client: reqwest::Client,
    read_url: String,
    set_url: String,
    clu: String,
    freshness: Duration,
    id_pattern: Regex,
    pins: Vec<Pin>,
    gate: tokio::sync::Mutex<()>,
    objects: Mutex<HashMap<Pin, ObjectState>>,
}

impl GrentonGate {
    fn object(&self, pin: Pin) -> GrentonObject {
        GrentonObject {
            kind: "Light",
            clu: self.clu.clone(),
            id: format!("DOU{:04}", pin),
            cmd: None,
            light: None,
        }
    }

    fn cached(&self, pin: Pin) -> ObjectState {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .copied()
            .unwrap_or_default()
    }

    fn is_stale(&self, pin: Pin) -> bool {
        match self.cached(pin).refreshed_at {
            Some(at) => at.elapsed() > self.freshness,
            None => true,
        }
    }

    /// Read every output in one batch. Fails unless all of them came back.
    async fn refresh(&self) -> Result<()> {
        let _gate = self.gate.lock().await;

        let query: Vec<GrentonObject> = self.pins.iter().map(|&pin| self.object(pin)).collect();
        let response = self
            .client
            .post(&self.read_url)
            .json(&query)
            .send()
            .await
            .map_err(|e| DomainError::DriverError(format!("grenton read request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::DriverError(format!(
                "grenton gate returned {}: {}",
                status, body
            )));
        }

        let states: Vec<GrentonObjectState> = response.json().await.map_err(|e| {
            DomainError::Protocol(format!("failed to decode grenton response: {}", e))
        })?;

        let now = Instant::now();
        let mut refreshed = Vec::with_capacity(states.len());
        {
            let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
            for obj in states {
                let pin = self.parse_id(&obj.id)?;
                let Some(light) = obj.light else {
                    continue;
                };
                if self.pins.contains(&pin) {
                    objects.insert(
                        pin,
                        ObjectState {
                            state: light.state,
                            refreshed_at: Some(now),
                        },
                    );
                    refreshed.push(pin);
                }
            }
        }

        if let Some(missing) = self.pins.iter().find(|pin| !refreshed.contains(pin)) {
            return Err(DomainError::DriverError(format!(
                "grenton output {} was not refreshed",
                missing
            )));
        }
        debug!(clu = %self.clu, count = refreshed.len(), "Grenton objects refreshed");
        Ok(())
    }

    async fn set(&self, pin: Pin, state: bool) -> Result<()> {
        let _gate = self.gate.lock().await;

        let mut object = self.object(pin);
        object.cmd = Some("SET");
        object.light = Some(LightState { state });

        let response = self
            .client
            .post(&self.set_url)
            .json(&object)
            .send()
            .await
            .map_err(|e| DomainError::DriverError(format!("grenton set request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(DomainError::DriverError(format!(
                "grenton gate rejected SET on {} with {}",
                object.id,
                response.status()
            )));
        }

        // The write is not read back; keep the refresh time so staleness still triggers a real read.
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.entry(pin).or_default().state = state;
        Ok(())
    }

    fn parse_id(&self, id: &str) -> Result<Pin> {
        self.id_pattern
            .captures(id)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<Pin>().ok())
            .ok_or_else(|| DomainError::Protocol(format!("unexpected grenton object id: {}", id)))
    }
}

/// Outputs of a Grenton CLU reached through its HTTP gateway
pub struct GrentonIoDriver {
    config: GrentonConfig,
    outputs: PinTable<GrentonOutput>,
    state: DriverState,
}

impl GrentonIoDriver {
    pub fn new(config: GrentonConfig) -> Self {
        Self {
            config,
            outputs: PinTable::new(PinDirection::Output),
            state: DriverState::default(),
        }
    }

    fn build_gate(&self, outputs: &[Pin]) -> Result<GrentonGate> {
        let client = reqwest::Client::builder()
            .timeout(NET_CLIENT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| DomainError::DriverError(format!("failed to build http client: {}", e)))?;
        let base = self.config.gate_address.trim_end_matches('/');
        let id_pattern = Regex::new(r"^DOU(\d{1,4})$")
            .map_err(|e| DomainError::DriverError(e.to_string()))?;

        Ok(GrentonGate {
            client,
            read_url: format!("{}/multi/read/", base),
            set_url: format!("{}/homebridge", base),
            clu: format!("CLU_{:08x}", self.config.clu_id),
            freshness: Duration::from_millis(self.config.object_freshness_ms),
            id_pattern,
            pins: outputs.to_vec(),
            gate: tokio::sync::Mutex::new(()),
            objects: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl IoDriver for GrentonIoDriver {
    fn name(&self) -> &str {
        DriverKind::Grenton.as_str()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        begin_setup(self.name(), self.state)?;
        if !inputs.is_empty() {
            return Err(DomainError::InvalidDriverConfig(
                "grenton does not support inputs".to_string(),
            ));
        }
        if outputs.is_empty() {
            return Err(DomainError::InvalidDriverConfig(
                "grenton setup called without outputs".to_string(),
            ));
        }
        validate_pins(self.name(), PinDirection::Output, outputs, Some(MAX_OBJECT_ID))?;

        let gate = Arc::new(self.build_gate(outputs)?);
        gate.refresh()
            .await
            .map_err(|e| e.context("initial grenton refresh"))?;

        for &pin in outputs {
            self.outputs.push(
                pin,
                Arc::new(GrentonOutput {
                    pin,
                    gate: gate.clone(),
                }),
            );
        }
        self.state = DriverState::Ready;
        info!(clu = %gate.clu, ?outputs, "Grenton gateway ready");
        Ok(())
    }

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>> {
        ensure_ready(self.name(), self.is_ready())?;
        Err(DomainError::PinNotFound {
            driver: self.name().to_string(),
            direction: PinDirection::Input,
            pin,
        })
    }

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
        ensure_ready(self.name(), self.is_ready())?;
        Ok(self.outputs.get(self.name(), pin)?)
    }

    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
        (Vec::new(), self.outputs.pins())
    }

    async fn close(&mut self) -> Result<()> {
        self.outputs.clear();
        self.state = self.state.to_closed();
        Ok(())
    }
}

struct GrentonOutput {
    pin: Pin,
    gate: Arc<GrentonGate>,
}

#[async_trait]
impl DigitalOutput for GrentonOutput {
    async fn state(&self) -> Result<bool> {
        if self.gate.is_stale(self.pin) {
            self.gate
                .refresh()
                .await
                .map_err(|e| e.context("failed to refresh grenton state"))?;
        }
        Ok(self.gate.cached(self.pin).state)
    }

    async fn set(&self, state: bool) -> Result<()> {
        if self.state().await? == state {
            return Ok(());
        }
        self.gate.set(self.pin, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_objects() {
        let driver = GrentonIoDriver::new(GrentonConfig {
            gate_address: "http://gate/".to_string(),
            clu_id: 0x0d1c_f087,
            object_freshness_ms: 20_000,
        });
        let gate = driver.build_gate(&[302]).unwrap();

        assert_eq!(gate.read_url, "http://gate/multi/read/");
        assert_eq!(gate.set_url, "http://gate/homebridge");

        let query = serde_json::to_value(gate.object(302)).unwrap();
        assert_eq!(
            query,
            serde_json::json!({ "Kind": "Light", "Clu": "CLU_0d1cf087", "Id": "DOU0302" })
        );
        assert_eq!(gate.parse_id("DOU0302").unwrap(), 302);
        assert!(gate.parse_id("DIN0302").is_err());
    }

    #[tokio::test]
    async fn test_rejects_inputs_and_empty_outputs() {
        let mut driver = GrentonIoDriver::new(GrentonConfig {
            gate_address: "http://127.0.0.1:9".to_string(),
            clu_id: 1,
            object_freshness_ms: 20_000,
        });
        assert!(driver.setup(&[1], &[2]).await.is_err());
        assert!(driver.setup(&[], &[]).await.is_err());
        assert!(!driver.is_ready());
    }
}
