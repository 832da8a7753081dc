use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Temperature reading as last synchronized by its sensor driver
#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    fn id(&self) -> &str;

    /// Degrees Celsius
    async fn temperature(&self) -> Result<f64>;
}

/// Source of sensors, synchronized on its own (slower) schedule
#[async_trait]
pub trait SensorDriver: Send + Sync {
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool;

    async fn sync(&self) -> Result<()>;

    fn find_temperature_sensor(&self, id: &str) -> Option<Arc<dyn TemperatureSensor>>;
}
