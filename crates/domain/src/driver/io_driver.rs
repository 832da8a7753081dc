use std::sync::Arc;

use async_trait::async_trait;

use super::digital::{DigitalInput, DigitalOutput};
use crate::error::Result;
use crate::pin::Pin;

/// Capability provider every hardware backend implements
///
/// A driver is constructed empty, then `setup` allocates exactly the
/// requested pins. Handles are only handed out while the driver is ready.
/// `close` is best effort, idempotent and safe after a failed `setup`.
#[async_trait]
pub trait IoDriver: Send + Sync {
    /// Registry name, unique within one hub
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool;

    /// Allocate backend resources for the given pins.
    ///
    /// Fails as a whole if any pin cannot be honored; on failure the driver
    /// stays not ready.
    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()>;

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>>;

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>>;

    /// Pins allocated by `setup`, in request order: `(inputs, outputs)`
    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>);

    async fn close(&mut self) -> Result<()>;
}
