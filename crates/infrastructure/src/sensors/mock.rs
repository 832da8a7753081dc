use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::error::Result;
use domain::{DomainError, SensorDriver, TemperatureSensor};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MockSensorConfig {
    pub id: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    21.0
}

/// Temperature sensor whose reading is set by hand
pub struct MockTemperatureSensor {
    id: String,
    reading: Mutex<Option<f64>>,
}

impl MockTemperatureSensor {
    pub fn new(id: &str, temperature: f64) -> Self {
        Self {
            id: id.to_string(),
            reading: Mutex::new(Some(temperature)),
        }
    }

    pub fn set_temperature(&self, temperature: f64) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Some(temperature);
    }

    /// Subsequent reads fail until a temperature is set again
    pub fn clear(&self) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl TemperatureSensor for MockTemperatureSensor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn temperature(&self) -> Result<f64> {
        let reading = *self.reading.lock().unwrap_or_else(PoisonError::into_inner);
        reading.ok_or_else(|| DomainError::SensorError(format!("sensor {} has no reading", self.id)))
    }
}

pub struct MockSensorDriver {
    sensors: Vec<Arc<MockTemperatureSensor>>,
    syncs: AtomicU64,
}

impl MockSensorDriver {
    pub fn new(configs: &[MockSensorConfig]) -> Self {
        Self {
            sensors: configs
                .iter()
                .map(|c| Arc::new(MockTemperatureSensor::new(&c.id, c.temperature)))
                .collect(),
            syncs: AtomicU64::new(0),
        }
    }

    pub fn sensor(&self, id: &str) -> Option<Arc<MockTemperatureSensor>> {
        self.sensors.iter().find(|s| s.id == id).cloned()
    }

    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorDriver for MockSensorDriver {
    fn name(&self) -> &str {
        "mock_sensors"
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn sync(&self) -> Result<()> {
        let count = self.syncs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sensors = self.sensors.len(), count, "Mock sensors synced");
        Ok(())
    }

    fn find_temperature_sensor(&self, id: &str) -> Option<Arc<dyn TemperatureSensor>> {
        self.sensor(id).map(|s| s as Arc<dyn TemperatureSensor>)
    }
}
