use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::{Controllable, Hub};
use async_trait::async_trait;
use domain::error::Result;
use domain::{
    DeviceKind, DigitalInput, DigitalOutput, DomainError, DriverKind, IoDriver, Pin, PinDirection,
    PushEvent, StateChange,
};
use infrastructure::drivers::{MemoryInput, constructor};
use infrastructure::sensors::MockSensorDriver;
use infrastructure::{DriverRegistry, HubConfig};
use serde_json::json;

/// Wiring shared between the test and the driver the hub builds
#[derive(Default)]
struct Bench {
    inputs: BTreeMap<Pin, Arc<MemoryInput>>,
    outputs: BTreeMap<Pin, Arc<Relay>>,
    /// Inputs whose reads always fail
    broken: Vec<Pin>,
}

impl Bench {
    fn new(inputs: &[Pin], outputs: &[Pin]) -> Arc<Self> {
        Self::with_broken_inputs(inputs, outputs, &[])
    }

    fn with_broken_inputs(inputs: &[Pin], outputs: &[Pin], broken: &[Pin]) -> Arc<Self> {
        Arc::new(Self {
            inputs: inputs
                .iter()
                .map(|&pin| (pin, Arc::new(MemoryInput::new(pin))))
                .collect(),
            outputs: outputs
                .iter()
                .map(|&pin| (pin, Arc::new(Relay::default())))
                .collect(),
            broken: broken.to_vec(),
        })
    }

    fn input(&self, pin: Pin) -> &MemoryInput {
        &self.inputs[&pin]
    }

    fn output(&self, pin: Pin) -> bool {
        self.outputs[&pin].0.load(Ordering::SeqCst)
    }

    /// Drop an output behind the hub's back
    fn reset(&self, pin: Pin) {
        self.outputs[&pin].0.store(false, Ordering::SeqCst);
    }
}

struct BrokenWire;

#[async_trait]
impl DigitalInput for BrokenWire {
    async fn state(&self) -> Result<bool> {
        Err(DomainError::DriverError("input wire cut".into()))
    }
}

#[derive(Default)]
struct Relay(AtomicBool);

#[async_trait]
impl DigitalOutput for Relay {
    async fn state(&self) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }

    async fn set(&self, state: bool) -> Result<()> {
        self.0.store(state, Ordering::SeqCst);
        Ok(())
    }
}

struct BenchDriver {
    bench: Arc<Bench>,
    ready: bool,
    io: (Vec<Pin>, Vec<Pin>),
}

#[async_trait]
impl IoDriver for BenchDriver {
    fn name(&self) -> &str {
        "bench"
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        self.io = (inputs.to_vec(), outputs.to_vec());
        self.ready = true;
        Ok(())
    }

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>> {
        if self.bench.broken.contains(&pin) {
            return Ok(Arc::new(BrokenWire) as Arc<dyn DigitalInput>);
        }
        self.bench
            .inputs
            .get(&pin)
            .map(|i| i.clone() as Arc<dyn DigitalInput>)
            .ok_or(DomainError::PinNotFound {
                driver: "bench".into(),
                direction: PinDirection::Input,
                pin,
            })
    }

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
        self.bench
            .outputs
            .get(&pin)
            .map(|o| o.clone() as Arc<dyn DigitalOutput>)
            .ok_or(DomainError::PinNotFound {
                driver: "bench".into(),
                direction: PinDirection::Output,
                pin,
            })
    }

    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
        self.io.clone()
    }

    async fn close(&mut self) -> Result<()> {
        self.ready = false;
        Ok(())
    }
}

fn registry(bench: Arc<Bench>) -> DriverRegistry {
    let mut registry = DriverRegistry::default();
    registry
        .register(
            "bench",
            DriverKind::Mock,
            constructor(move || BenchDriver {
                bench: bench.clone(),
                ready: false,
                io: (Vec::new(), Vec::new()),
            }),
        )
        .unwrap();
    registry
}

fn house() -> HubConfig {
    serde_json::from_value(json!({
        "switches": [{ "name": "hall switch", "driver": "bench", "pin": 1 }],
        "buttons": [{ "name": "door button", "driver": "bench", "pin": 3 }],
        "lights": [
            {
                "name": "hall",
                "driver": "bench",
                "pin": 2,
                "control_by": [{ "pin": 1 }]
            },
            {
                "name": "porch",
                "driver": "bench",
                "pin": 4,
                "control_by": [{ "pin": 3, "event": "double" }]
            }
        ],
        "thermostats": [{
            "name": "living room",
            "driver": "bench",
            "heat_pin": 5,
            "sensor_id": "living",
            "mode": "heat",
            "target_temperature": 21.0
        }],
        "mock_sensors": [{ "id": "living", "temperature": 19.0 }]
    }))
    .unwrap()
}

async fn started(bench: Arc<Bench>, sensors: Arc<MockSensorDriver>) -> Hub {
    let mut hub = Hub::new(&house(), registry(bench));
    hub.add_sensor_driver(sensors);
    hub.start().await.unwrap();
    hub
}

#[tokio::test]
async fn test_io_status_reports_union() {
    let bench = Bench::new(&[1, 3], &[2, 4, 5]);
    let sensors = Arc::new(MockSensorDriver::new(&house().mock_sensors));
    let mut hub = started(bench, sensors).await;

    let io = hub.io_status();
    assert_eq!(io.len(), 1);
    assert_eq!(io[0].inputs, vec![1, 3]);
    assert_eq!(io[0].outputs, vec![2, 4, 5]);
    hub.close().await.unwrap();
}

#[tokio::test]
async fn test_switch_drives_light() {
    let bench = Bench::new(&[1, 3], &[2, 4, 5]);
    let sensors = Arc::new(MockSensorDriver::new(&house().mock_sensors));
    let hub = started(bench.clone(), sensors).await;
    let mut events = hub.subscribe();

    assert_eq!(hub.sync_all().await, 0);
    assert!(!bench.output(2));

    bench.input(1).set_state(true);
    hub.sync_all().await;
    assert!(bench.output(2));
    assert!(hub.status(DeviceKind::Light, "hall").unwrap().on);

    let mut saw_light = false;
    while let Ok(event) = events.try_recv() {
        if let StateChange::Power { device, on: true, .. } = event {
            saw_light |= device == "hall";
        }
    }
    assert!(saw_light);
}

#[tokio::test]
async fn test_button_event_kind_dispatch() {
    let bench = Bench::new(&[1, 3], &[2, 4, 5]);
    let sensors = Arc::new(MockSensorDriver::new(&house().mock_sensors));
    let hub = started(bench.clone(), sensors).await;

    bench.input(3).press(PushEvent::Single).await;
    assert!(!hub.light("porch").unwrap().is_on());

    bench.input(3).press(PushEvent::Double).await;
    hub.sync_all().await;
    assert!(bench.output(4));

    bench.input(3).press(PushEvent::Double).await;
    hub.sync_all().await;
    assert!(!bench.output(4));
}

#[tokio::test]
async fn test_thermostat_follows_sensor() {
    let bench = Bench::new(&[1, 3], &[2, 4, 5]);
    let sensors = Arc::new(MockSensorDriver::new(&house().mock_sensors));
    let hub = started(bench.clone(), sensors.clone()).await;

    hub.sync_all().await;
    assert!(bench.output(5));

    sensors.sensor("living").unwrap().set_temperature(22.0);
    hub.sync_all().await;
    assert!(!bench.output(5));

    // A failing sensor is logged and flagged, never fatal
    sensors.sensor("living").unwrap().clear();
    assert_eq!(hub.sync_all().await, 1);
    assert!(hub.status(DeviceKind::Thermostat, "living room").unwrap().fault);
}

#[tokio::test]
async fn test_failing_switch_does_not_stop_later_devices() {
    let bench = Bench::with_broken_inputs(&[1, 3], &[2, 4, 5], &[1]);
    let sensors = Arc::new(MockSensorDriver::new(&house().mock_sensors));
    let hub = started(bench.clone(), sensors).await;

    hub.light("porch").unwrap().set_value(true).await.unwrap();
    bench.reset(4);

    // Only the switch fails; the lights and thermostat after it still sync
    assert_eq!(hub.sync_all().await, 1);
    assert!(hub.status(DeviceKind::Switch, "hall switch").unwrap().fault);
    assert!(bench.output(4));
    assert!(bench.output(5));
    assert!(!hub.status(DeviceKind::Light, "hall").unwrap().fault);
}

#[tokio::test]
async fn test_statuses_cover_every_device() {
    let bench = Bench::new(&[1, 3], &[2, 4, 5]);
    let sensors = Arc::new(MockSensorDriver::new(&house().mock_sensors));
    let mut hub = started(bench, sensors).await;

    let names: Vec<String> = hub.statuses().into_iter().map(|s| s.name).collect();
    assert_eq!(
        names,
        vec!["hall switch", "door button", "hall", "porch", "living room"]
    );

    hub.close().await.unwrap();
    // Second close finds nothing left to close
    hub.close().await.unwrap();
}
