use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use domain::device::{ButtonConfig, device_id};
use domain::error::Result;
use domain::{
    DeviceKind, DeviceStatus, DigitalInput, EventKind, EventListener, IoDriver, Pin, PushEvent,
    StateChange,
};
use tracing::{debug, warn};

use super::{Controllable, Events, Handle, LogicalDevice, check_driver};

/// Momentary push button
///
/// When the input can push events the button subscribes to them and toggles
/// the targets registered for that press kind. Otherwise every sync polls the
/// level and a rising edge counts as a single press.
pub struct ButtonDevice {
    me: Weak<ButtonDevice>,
    config: ButtonConfig,
    input: Handle<dyn DigitalInput>,
    pushed: AtomicBool,
    level: Mutex<Option<bool>>,
    targets: RwLock<HashMap<EventKind, Vec<Arc<dyn Controllable>>>>,
    fault: AtomicBool,
    events: Events,
}

impl ButtonDevice {
    pub fn new(config: ButtonConfig, events: Events) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            input: Handle::default(),
            pushed: AtomicBool::new(false),
            level: Mutex::new(None),
            targets: RwLock::new(HashMap::new()),
            fault: AtomicBool::new(false),
            events,
        })
    }

    pub fn pin(&self) -> Pin {
        self.config.pin
    }

    /// Toggle `target` on presses of the given kind
    ///
    /// A `switch` descriptor has no press kind of its own and is treated as a single press.
    pub fn add_target(&self, event: EventKind, target: Arc<dyn Controllable>) {
        let event = match event {
            EventKind::Switch => EventKind::Single,
            other => other,
        };
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(target);
    }

    pub fn target_count(&self, event: EventKind) -> usize {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Whether presses arrive as pushed events rather than by polling
    pub fn is_push(&self) -> bool {
        self.pushed.load(Ordering::SeqCst)
    }

    /// Announce a press and toggle its targets
    pub async fn press(&self, event: PushEvent) {
        debug!(button = %self.config.name, %event, "button pressed");
        let _ = self
            .events
            .send(StateChange::pressed(&self.config.name, event));

        let targets = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&EventKind::from(event))
            .cloned()
            .unwrap_or_default();
        for target in targets {
            if let Err(e) = target.toggle().await {
                warn!(
                    button = %self.config.name,
                    target = %target.name(),
                    error = %e,
                    "failed to toggle target"
                );
            }
        }
    }

    fn swap_level(&self, on: bool) -> Option<bool> {
        self.level
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(on)
    }
}

#[async_trait]
impl EventListener for ButtonDevice {
    async fn fire_event(&self, event: PushEvent) {
        self.press(event).await;
    }
}

#[async_trait]
impl LogicalDevice for ButtonDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Button
    }

    fn driver(&self) -> &str {
        &self.config.driver
    }

    fn inputs(&self) -> Vec<Pin> {
        vec![self.config.pin]
    }

    fn init(&self, driver: &dyn IoDriver) -> Result<()> {
        check_driver(&self.config.name, &self.config.driver, driver)?;
        let input = driver.input(self.config.pin)?;

        let Some(me) = self.me.upgrade() else {
            return Err(domain::DomainError::DriverError(format!(
                "button {} dropped during init",
                self.config.name
            )));
        };
        match input.subscribe(me) {
            Ok(()) => {
                self.pushed.store(true, Ordering::SeqCst);
                debug!(button = %self.config.name, "subscribed to push events");
            }
            Err(e) if e.is_unsupported() => {
                self.pushed.store(false, Ordering::SeqCst);
                debug!(button = %self.config.name, "polling for presses");
            }
            Err(e) => return Err(e.context(format!("button {} subscribe", self.config.name))),
        }
        self.input.set(input);
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        if self.is_push() {
            return Ok(());
        }
        let input = self.input.get(&self.config.name)?;
        let on = match input.state().await {
            Ok(on) => on,
            Err(e) => {
                self.fault.store(true, Ordering::SeqCst);
                return Err(e.context(format!("button {} read", self.config.name)));
            }
        };
        self.fault.store(false, Ordering::SeqCst);

        if self.swap_level(on) == Some(false) && on {
            self.press(PushEvent::Single).await;
        }
        Ok(())
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            id: device_id(DeviceKind::Button, &self.config.driver, self.config.pin),
            name: self.config.name.clone(),
            kind: DeviceKind::Button,
            on: self
                .level
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or(false),
            fault: self.fault.load(Ordering::SeqCst),
        }
    }
}
