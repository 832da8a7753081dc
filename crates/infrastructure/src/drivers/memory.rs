use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::error::Result;
use domain::{DigitalInput, EventListener, Pin, PushEvent};

/// Input whose level and presses come from software rather than a wire
pub struct MemoryInput {
    pin: Pin,
    state: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl MemoryInput {
    pub fn new(pin: Pin) -> Self {
        Self {
            pin,
            state: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn set_state(&self, state: bool) {
        self.state.store(state, Ordering::SeqCst);
    }

    pub fn level(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Deliver a push event to every subscriber
    pub async fn press(&self, event: PushEvent) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.fire_event(event).await;
        }
    }
}

#[async_trait]
impl DigitalInput for MemoryInput {
    async fn state(&self) -> Result<bool> {
        Ok(self.level())
    }

    fn subscribe(&self, listener: Arc<dyn EventListener>) -> Result<()> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
        Ok(())
    }
}
