use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use domain::device::{ShutterConfig, device_id};
use domain::error::Result;
use domain::{
    ControllingDevice, DeviceKind, DeviceStatus, DigitalOutput, IoDriver, Pin, StateChange,
};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Controllable, Events, Handle, LogicalDevice, check_driver};

pub const FULLY_OPEN: u8 = 100;
pub const CLOSED: u8 = 0;

/// Travel in progress
#[derive(Debug, Clone, Copy)]
struct Movement {
    target: u8,
    from: f64,
    started: Instant,
}

#[derive(Debug, Default)]
struct Travel {
    /// Percent open, 0 closed
    position: f64,
    movement: Option<Movement>,
    reported: Option<(u8, bool)>,
}

impl Travel {
    /// Advance the position to `now`, ending the movement once the target is reached
    fn advance(&mut self, now: Instant, movement_secs: f64) {
        let Some(movement) = self.movement else {
            return;
        };
        let travelled = now.duration_since(movement.started).as_secs_f64() / movement_secs * 100.0;
        let target = f64::from(movement.target);
        self.position = if target >= movement.from {
            (movement.from + travelled).min(target)
        } else {
            (movement.from - travelled).max(target)
        };
        if self.position == target {
            self.movement = None;
        }
    }

    fn percent(&self) -> u8 {
        self.position.round().clamp(0.0, 100.0) as u8
    }

    fn going_up(&self) -> bool {
        self.movement
            .map(|m| f64::from(m.target) > self.position)
            .unwrap_or(false)
    }
}

/// Roller shutter driven by a power output and a direction output
///
/// The position is estimated from the travel time; the shutter is
/// assumed closed at startup.
pub struct ShutterDevice {
    config: ShutterConfig,
    power: Handle<dyn DigitalOutput>,
    direction: Handle<dyn DigitalOutput>,
    travel: Mutex<Travel>,
    fault: AtomicBool,
    events: Events,
}

impl ShutterDevice {
    pub fn new(config: ShutterConfig, events: Events) -> Self {
        Self {
            config,
            power: Handle::default(),
            direction: Handle::default(),
            travel: Mutex::new(Travel::default()),
            fault: AtomicBool::new(false),
            events,
        }
    }

    fn travel(&self) -> std::sync::MutexGuard<'_, Travel> {
        self.travel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn position(&self) -> u8 {
        let mut travel = self.travel();
        travel.advance(Instant::now(), self.config.movement_secs);
        travel.percent()
    }

    pub fn is_moving(&self) -> bool {
        let mut travel = self.travel();
        travel.advance(Instant::now(), self.config.movement_secs);
        travel.movement.is_some()
    }

    /// Start travelling towards `target` percent; outputs follow on the next sync
    pub fn move_to(&self, target: u8) {
        let target = target.min(FULLY_OPEN);
        let now = Instant::now();
        let mut travel = self.travel();
        travel.advance(now, self.config.movement_secs);
        if f64::from(target) == travel.position {
            travel.movement = None;
            return;
        }
        info!(shutter = %self.config.name, from = travel.percent(), target, "shutter moving");
        travel.movement = Some(Movement {
            target,
            from: travel.position,
            started: now,
        });
    }

    /// Halt where the shutter currently is
    pub fn stop(&self) {
        let mut travel = self.travel();
        travel.advance(Instant::now(), self.config.movement_secs);
        if travel.movement.take().is_some() {
            info!(shutter = %self.config.name, position = travel.percent(), "shutter stopped");
        }
    }

    async fn write_outputs(&self) -> Result<()> {
        let power = self.power.get(&self.config.name)?;
        let direction = self.direction.get(&self.config.name)?;

        let (moving, up, position, changed) = {
            let mut travel = self.travel();
            travel.advance(Instant::now(), self.config.movement_secs);
            let state = (travel.percent(), travel.movement.is_some());
            let changed = travel.reported != Some(state);
            travel.reported = Some(state);
            (state.1, travel.going_up(), state.0, changed)
        };

        // Direction settles before the motor gets power
        let result = if moving {
            match direction.set(up != self.config.invert_direction).await {
                Ok(()) => power.set(!self.config.invert_power).await,
                Err(e) => Err(e),
            }
        } else {
            power.set(self.config.invert_power).await
        };
        self.fault.store(result.is_err(), Ordering::SeqCst);
        if changed {
            debug!(shutter = %self.config.name, position, moving, "position changed");
            let _ = self
                .events
                .send(StateChange::position(&self.config.name, position, moving));
        }
        result.map_err(|e| e.context(format!("shutter {} outputs", self.config.name)))
    }
}

#[async_trait]
impl LogicalDevice for ShutterDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Shutter
    }

    fn driver(&self) -> &str {
        &self.config.driver
    }

    fn outputs(&self) -> Vec<Pin> {
        vec![self.config.power_pin, self.config.direction_pin]
    }

    fn init(&self, driver: &dyn IoDriver) -> Result<()> {
        check_driver(&self.config.name, &self.config.driver, driver)?;
        self.power.set(driver.output(self.config.power_pin)?);
        self.direction.set(driver.output(self.config.direction_pin)?);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        self.write_outputs().await
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: device_id(DeviceKind::Shutter, &self.config.driver, self.config.power_pin),
            name: self.config.name.clone(),
            kind: DeviceKind::Shutter,
            on: self.position() > CLOSED,
            fault: self.fault.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Controllable for ShutterDevice {
    fn controllers(&self) -> &[ControllingDevice] {
        &self.config.control_by
    }

    async fn set_value(&self, on: bool) -> Result<()> {
        self.move_to(if on { FULLY_OPEN } else { CLOSED });
        self.write_outputs().await
    }

    /// Stops a moving shutter, otherwise sends it to the far end
    async fn toggle(&self) -> Result<()> {
        if self.is_moving() {
            self.stop();
        } else if self.position() >= FULLY_OPEN / 2 {
            self.move_to(CLOSED);
        } else {
            self.move_to(FULLY_OPEN);
        }
        self.write_outputs().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::testing::{FakeDriver, Level, events};
    use super::*;

    /// Driver handing out separate power and direction outputs
    struct TwoOutputs {
        inner: FakeDriver,
        direction: Arc<Level>,
    }

    #[async_trait]
    impl IoDriver for TwoOutputs {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn is_ready(&self) -> bool {
            self.inner.is_ready()
        }

        async fn setup(&mut self, _inputs: &[Pin], _outputs: &[Pin]) -> Result<()> {
            Ok(())
        }

        fn input(&self, pin: Pin) -> Result<Arc<dyn domain::DigitalInput>> {
            self.inner.input(pin)
        }

        fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
            match pin {
                7 => Ok(self.direction.clone() as Arc<dyn DigitalOutput>),
                _ => self.inner.output(pin),
            }
        }

        fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
            (Vec::new(), vec![6, 7])
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> ShutterConfig {
        ShutterConfig {
            name: "bedroom blind".into(),
            driver: "mock".into(),
            power_pin: 6,
            direction_pin: 7,
            movement_secs: 10.0,
            invert_power: false,
            invert_direction: false,
            control_by: Vec::new(),
        }
    }

    fn shutter(config: ShutterConfig) -> (ShutterDevice, Arc<Level>, Arc<Level>, Events) {
        let (tx, _) = events();
        let power = Arc::new(Level::default());
        let direction = Arc::new(Level::default());
        let device = ShutterDevice::new(config, tx.clone());
        device
            .init(&TwoOutputs {
                inner: FakeDriver::new("mock").with_output(power.clone()),
                direction: direction.clone(),
            })
            .unwrap();
        (device, power, direction, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_over_movement_time() {
        let (device, power, direction, tx) = shutter(config());
        let mut rx = tx.subscribe();

        device.set_value(true).await.unwrap();
        assert!(power.get());
        assert!(direction.get());
        assert!(matches!(
            rx.try_recv().unwrap(),
            StateChange::Position { position: 0, moving: true, .. }
        ));

        tokio::time::advance(Duration::from_secs(5)).await;
        device.sync().await.unwrap();
        assert_eq!(device.position(), 50);
        assert!(power.get());

        tokio::time::advance(Duration::from_secs(6)).await;
        device.sync().await.unwrap();
        assert_eq!(device.position(), FULLY_OPEN);
        assert!(!device.is_moving());
        assert!(!power.get());
        assert!(device.status().on);

        // Position 50 moving, then 100 stopped
        assert!(matches!(
            rx.try_recv().unwrap(),
            StateChange::Position { position: 50, moving: true, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            StateChange::Position { position: 100, moving: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_stops_then_reverses() {
        let (device, power, direction, _tx) = shutter(config());

        device.toggle().await.unwrap();
        assert!(device.is_moving());

        tokio::time::advance(Duration::from_secs(7)).await;
        device.toggle().await.unwrap();
        assert!(!device.is_moving());
        assert_eq!(device.position(), 70);
        assert!(!power.get());

        // Past half way, so the next toggle closes
        device.toggle().await.unwrap();
        assert!(power.get());
        assert!(!direction.get());

        tokio::time::advance(Duration::from_secs(10)).await;
        device.sync().await.unwrap();
        assert_eq!(device.position(), CLOSED);
        assert!(!device.status().on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverted_outputs() {
        let mut cfg = config();
        cfg.invert_power = true;
        cfg.invert_direction = true;
        let (device, power, direction, _tx) = shutter(cfg);

        device.sync().await.unwrap();
        assert!(power.get(), "inverted power idles high");

        device.move_to(40);
        device.sync().await.unwrap();
        assert!(!power.get());
        assert!(!direction.get(), "inverted up is low");
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_current_position_is_noop() {
        let (device, power, _direction, _tx) = shutter(config());

        device.move_to(CLOSED);
        assert!(!device.is_moving());
        device.set_value(false).await.unwrap();
        assert!(!power.get());
    }
}
