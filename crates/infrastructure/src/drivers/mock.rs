use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::error::Result;
use domain::pin::validate_pins;
use domain::{DigitalInput, DigitalOutput, DriverKind, DriverState, IoDriver, Pin, PinDirection};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use super::memory::MemoryInput;
use super::pin_table::{PinTable, begin_setup, ensure_ready};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Log every output change at info level
    #[serde(default)]
    pub log_changes: bool,
}

/// In-memory driver for tests and dry runs
///
/// Never fails on `state` or `set`. Output changes can be observed through
/// an unbounded channel of `(pin, state)`; inputs can be driven with
/// [`MemoryInput::set_state`] and [`MemoryInput::press`].
pub struct MockIoDriver {
    name: String,
    log_changes: bool,
    observer: Option<mpsc::UnboundedSender<(Pin, bool)>>,
    inputs: PinTable<MemoryInput>,
    outputs: PinTable<MockOutput>,
    state: DriverState,
}

impl MockIoDriver {
    pub fn new(config: MockConfig) -> Self {
        Self {
            name: config
                .name
                .unwrap_or_else(|| DriverKind::Mock.as_str().to_string()),
            log_changes: config.log_changes,
            observer: None,
            inputs: PinTable::new(PinDirection::Input),
            outputs: PinTable::new(PinDirection::Output),
            state: DriverState::default(),
        }
    }

    /// Report every output change on `observer`
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<(Pin, bool)>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Concrete input handle, for driving the input from tests
    pub fn mock_input(&self, pin: Pin) -> Result<Arc<MemoryInput>> {
        ensure_ready(&self.name, self.is_ready())?;
        self.inputs.get(&self.name, pin)
    }
}

#[async_trait]
impl IoDriver for MockIoDriver {
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

        for &pin in inputs {
            self.inputs.push(pin, Arc::new(MemoryInput::new(pin)));
        }
        for &pin in outputs {
            self.outputs.push(
                pin,
                Arc::new(MockOutput {
                    driver: self.name.clone(),
                    pin,
                    state: AtomicBool::new(false),
                    log_changes: self.log_changes,
                    observer: self.observer.clone(),
                }),
            );
        }

        self.state = DriverState::Ready;
        info!(driver = %self.name, ?inputs, ?outputs, "Mock driver ready");
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
        for output in self.outputs.handles() {
            output.state.store(false, Ordering::SeqCst);
        }
        self.inputs.clear();
        self.outputs.clear();
        self.state = self.state.to_closed();
        Ok(())
    }
}

struct MockOutput {
    driver: String,
    pin: Pin,
    state: AtomicBool,
    log_changes: bool,
    observer: Option<mpsc::UnboundedSender<(Pin, bool)>>,
}

#[async_trait]
impl DigitalOutput for MockOutput {
    async fn state(&self) -> Result<bool> {
        Ok(self.state.load(Ordering::SeqCst))
    }

    async fn set(&self, state: bool) -> Result<()> {
        let previous = self.state.swap(state, Ordering::SeqCst);
        if previous != state {
            if self.log_changes {
                info!(driver = %self.driver, pin = self.pin, state, "Mock output changed");
            }
            if let Some(observer) = &self.observer {
                // A dropped receiver only means nobody is watching anymore
                let _ = observer.send((self.pin, state));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainError, EventListener, PushEvent};

    struct Counter(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl EventListener for Counter {
        async fn fire_event(&self, _event: PushEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_not_ready_before_setup() {
        let driver = MockIoDriver::new(MockConfig::default());
        assert!(!driver.is_ready());
        assert!(matches!(
            driver.output(1),
            Err(DomainError::DriverNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_round_trip_boolean_sequence() {
        let mut driver = MockIoDriver::new(MockConfig::default());
        driver.setup(&[], &[7]).await.unwrap();
        let output = driver.output(7).unwrap();

        for state in [true, true, false, true, false, false, true] {
            output.set(state).await.unwrap();
            assert_eq!(output.state().await.unwrap(), state);
        }
    }

    #[tokio::test]
    async fn test_observer_sees_changes_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = MockIoDriver::new(MockConfig::default()).with_observer(tx);
        driver.setup(&[], &[3]).await.unwrap();
        let output = driver.output(3).unwrap();

        output.set(true).await.unwrap();
        output.set(true).await.unwrap();
        output.set(false).await.unwrap();

        assert_eq!(rx.recv().await, Some((3, true)));
        assert_eq!(rx.recv().await, Some((3, false)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejects_duplicate_pins() {
        let mut driver = MockIoDriver::new(MockConfig::default());
        let err = driver.setup(&[1, 1], &[]).await.unwrap_err();
        assert!(matches!(err, DomainError::DuplicatePin { pin: 1, .. }));
        assert!(!driver.is_ready());
    }

    #[tokio::test]
    async fn test_press_reaches_subscribers() {
        let mut driver = MockIoDriver::new(MockConfig::default());
        driver.setup(&[5], &[]).await.unwrap();

        let counter = Arc::new(Counter(Default::default()));
        driver.input(5).unwrap().subscribe(counter.clone()).unwrap();

        let input = driver.mock_input(5).unwrap();
        input.press(PushEvent::Single).await;
        input.press(PushEvent::Long).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_gates_access() {
        let mut driver = MockIoDriver::new(MockConfig::default());
        driver.setup(&[1], &[2]).await.unwrap();
        let output = driver.output(2).unwrap();
        output.set(true).await.unwrap();

        driver.close().await.unwrap();
        driver.close().await.unwrap();

        assert!(!output.state().await.unwrap());
        assert!(!driver.is_ready());
        assert!(driver.input(1).is_err());
        assert_eq!(driver.all_io(), (vec![], vec![]));
    }
}
