use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use domain::error::Result;
use domain::{DomainError, EventListener, PushEvent};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::components::{DeviceInfo, NotifyEventParams, ShellyStatus};
use super::rpc::{RpcClient, RpcMessage};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Push listeners per `(device id, input index)`.
///
/// Lives in the driver, so subscriptions survive a device being replaced by
/// a later discovery pass.
#[derive(Default)]
pub struct InputListeners {
    listeners: Mutex<HashMap<(String, u8), Vec<Arc<dyn EventListener>>>>,
}

impl InputListeners {
    pub fn subscribe(&self, device_id: &str, input: u8, listener: Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((device_id.to_string(), input))
            .or_default()
            .push(listener);
    }

    fn get(&self, device_id: &str, input: u8) -> Vec<Arc<dyn EventListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(device_id.to_string(), input))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    status: ShellyStatus,
    last_refreshed: Option<Instant>,
    last_set_error: Option<String>,
}

/// One discovered device and its live RPC connection
pub struct ShellyDevice {
    host: String,
    info: DeviceInfo,
    client: RpcClient,
    freshness: Duration,
    state: RwLock<DeviceState>,
    listeners: Arc<InputListeners>,
    cancel: CancellationToken,
}

impl ShellyDevice {
    /// Connect, read device info and full status
    pub async fn discover(
        host: &str,
        origin: Option<&str>,
        freshness: Duration,
        listeners: Arc<InputListeners>,
    ) -> Result<Arc<Self>> {
        let client = RpcClient::connect(host, origin).await?;

        let info = client
            .call("Shelly.GetDeviceInfo", None, CALL_TIMEOUT)
            .await
            .map_err(|e| e.context("Shelly.GetDeviceInfo"))?;
        let info: DeviceInfo = serde_json::from_value(info)
            .map_err(|e| DomainError::Protocol(format!("invalid device info: {}", e)))?;

        let status = client
            .call("Shelly.GetStatus", None, CALL_TIMEOUT)
            .await
            .map_err(|e| e.context("Shelly.GetStatus"))?;
        let status = ShellyStatus::from_value(&status)?;

        Ok(Arc::new(Self::new(
            host, info, client, status, freshness, listeners,
        )))
    }

    pub fn new(
        host: &str,
        info: DeviceInfo,
        client: RpcClient,
        status: ShellyStatus,
        freshness: Duration,
        listeners: Arc<InputListeners>,
    ) -> Self {
        Self {
            host: host.to_string(),
            info,
            client,
            freshness,
            state: RwLock::new(DeviceState {
                status,
                last_refreshed: Some(Instant::now()),
                last_set_error: None,
            }),
            listeners,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeviceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_switch(&self, id: u8) -> bool {
        self.read().status.switches.contains_key(&id)
    }

    pub fn has_input(&self, id: u8) -> bool {
        self.read().status.inputs.contains_key(&id)
    }

    pub fn switch_output(&self, id: u8) -> Option<bool> {
        self.read().status.switches.get(&id).map(|sw| sw.output)
    }

    pub fn input_state(&self, id: u8) -> Option<Option<bool>> {
        self.read().status.inputs.get(&id).map(|input| input.state)
    }

    pub fn apower(&self, id: u8) -> Option<f64> {
        self.read().status.switches.get(&id).and_then(|sw| sw.apower)
    }

    /// Healthy iff the last command succeeded and state is fresh
    pub fn health_check(&self) -> Result<()> {
        let unhealthy = |reason: String| DomainError::Unhealthy {
            device_id: self.info.id.clone(),
            reason,
        };

        if self.client.is_closed() {
            return Err(unhealthy("rpc connection closed".to_string()));
        }
        let state = self.read();
        if let Some(err) = &state.last_set_error {
            return Err(unhealthy(format!("last command failed: {}", err)));
        }
        match state.last_refreshed {
            Some(at) if at.elapsed() <= self.freshness => Ok(()),
            Some(at) => Err(unhealthy(format!(
                "state not refreshed for {:?}",
                at.elapsed()
            ))),
            None => Err(unhealthy("state never refreshed".to_string())),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_check().is_ok()
    }

    /// `Switch.Set`; failures are remembered and make the device unhealthy
    pub async fn set_switch(&self, id: u8, on: bool) -> Result<()> {
        let result = self
            .client
            .call("Switch.Set", Some(json!({ "id": id, "on": on })), CALL_TIMEOUT)
            .await;

        let mut state = self.write();
        match result {
            Ok(_) => {
                if let Some(sw) = state.status.switches.get_mut(&id) {
                    sw.output = on;
                }
                state.last_refreshed = Some(Instant::now());
                state.last_set_error = None;
                Ok(())
            }
            Err(e) => {
                state.last_set_error = Some(e.to_string());
                Err(e.context(format!("Switch.Set {} on {}", id, self.info.id)))
            }
        }
    }

    /// Explicit `Shelly.GetStatus` poll
    pub async fn refresh(&self) -> Result<()> {
        let status = self
            .client
            .call("Shelly.GetStatus", None, CALL_TIMEOUT)
            .await?;
        self.apply_status(&status, true)
    }

    fn apply_status(&self, status: &Value, full: bool) -> Result<()> {
        let mut state = self.write();
        state.status.apply(status, full)?;
        state.last_refreshed = Some(Instant::now());
        Ok(())
    }

    pub fn subscribe_input(&self, input: u8, listener: Arc<dyn EventListener>) {
        self.listeners.subscribe(&self.info.id, input, listener);
    }

    async fn handle_notification(&self, message: RpcMessage) {
        let method = message.method.as_deref().unwrap_or_default();
        let params = message.params.unwrap_or(Value::Null);
        match method {
            "NotifyStatus" | "NotifyFullStatus" => {
                if let Err(e) = self.apply_status(&params, method == "NotifyFullStatus") {
                    warn!(device_id = %self.info.id, error = %e, "Ignoring status notification");
                }
            }
            "NotifyEvent" => {
                let params: NotifyEventParams = match serde_json::from_value(params) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(device_id = %self.info.id, error = %e, "Ignoring event notification");
                        return;
                    }
                };
                for (input, event) in params.events.iter().filter_map(|e| e.input_press()) {
                    self.fire(input, event).await;
                }
            }
            other => debug!(device_id = %self.info.id, method = other, "Unhandled notification"),
        }
    }

    async fn fire(&self, input: u8, event: PushEvent) {
        let listeners = self.listeners.get(&self.info.id, input);
        debug!(device_id = %self.info.id, input, %event, listeners = listeners.len(), "Input push");
        for listener in listeners {
            listener.fire_event(event).await;
        }
    }

    /// Spawn the notification consumer.
    ///
    /// Applies pushed status, fires input events and polls the full status
    /// every `refresh_interval`. Ends on `close` or when the connection drops.
    pub fn start(self: &Arc<Self>, refresh_interval: Duration) -> JoinHandle<()> {
        let device = self.clone();
        let refresh_interval = refresh_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let Some(mut notifications) = device.client.take_notifications() else {
                warn!(device_id = %device.info.id, "Notification consumer already running");
                return;
            };
            let mut poll = tokio::time::interval_at(Instant::now() + refresh_interval, refresh_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = device.cancel.cancelled() => break,
                    message = notifications.recv() => match message {
                        Some(message) => device.handle_notification(message).await,
                        None => {
                            warn!(device_id = %device.info.id, "Device connection closed");
                            break;
                        }
                    },
                    _ = poll.tick() => {
                        if let Err(e) = device.refresh().await {
                            warn!(device_id = %device.info.id, error = %e, "Status poll failed");
                        }
                    }
                }
            }
            debug!(device_id = %device.info.id, "Notification consumer stopped");
        })
    }

    /// Stop the consumer and close the connection
    pub async fn close(&self) {
        self.cancel.cancel();
        self.client.close().await;
        info!(device_id = %self.info.id, host = %self.host, "Device closed");
    }
}

impl std::fmt::Display for ShellyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        write!(
            f,
            "{} ({} {}, fw {}) at {}: {} switch(es), {} input(s)",
            self.info.id,
            self.info.app,
            self.info.model,
            self.info.ver,
            self.host,
            state.status.switches.len(),
            state.status.inputs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;

    struct Presses(AtomicUsize);

    #[async_trait::async_trait]
    impl EventListener for Presses {
        async fn fire_event(&self, event: PushEvent) {
            assert_eq!(event, PushEvent::Long);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn device(freshness: Duration) -> (Arc<ShellyDevice>, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_ws, server_ws) = tokio::join!(
            WebSocketStream::from_raw_socket(client_io, Role::Client, None),
            WebSocketStream::from_raw_socket(server_io, Role::Server, None),
        );
        let status = ShellyStatus::from_value(&json!({
            "switch:0": { "id": 0, "output": false },
            "input:0": { "id": 0, "state": null }
        }))
        .unwrap();
        let info = DeviceInfo {
            id: "shellyplus1-a8032ab12345".to_string(),
            generation: 2,
            ..Default::default()
        };
        let device = ShellyDevice::new(
            "10.0.0.20",
            info,
            RpcClient::from_stream(client_ws),
            status,
            freshness,
            Arc::new(InputListeners::default()),
        );
        (Arc::new(device), server_ws)
    }

    async fn next_request(server: &mut WebSocketStream<DuplexStream>) -> Value {
        loop {
            if let Some(Ok(Message::Text(text))) = server.next().await {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_set_failure_makes_device_unhealthy() {
        let (device, mut server) = device(Duration::from_secs(900)).await;
        assert!(device.is_healthy());

        let set = {
            let device = device.clone();
            tokio::spawn(async move { device.set_switch(0, true).await })
        };
        let req = next_request(&mut server).await;
        assert_eq!(req["method"], "Switch.Set");
        assert_eq!(req["params"], json!({ "id": 0, "on": true }));
        server
            .send(Message::Text(
                json!({ "id": req["id"], "dst": req["src"], "error": { "code": -1, "message": "busy" } })
                    .to_string(),
            ))
            .await
            .unwrap();

        assert!(set.await.unwrap().is_err());
        assert!(device.health_check().unwrap_err().is_unhealthy());
        assert_eq!(device.switch_output(0), Some(false));
    }

    #[tokio::test]
    async fn test_set_success_updates_cached_output() {
        let (device, mut server) = device(Duration::from_secs(900)).await;
        let set = {
            let device = device.clone();
            tokio::spawn(async move { device.set_switch(0, true).await })
        };
        let req = next_request(&mut server).await;
        server
            .send(Message::Text(
                json!({ "id": req["id"], "dst": req["src"], "result": { "was_on": false } }).to_string(),
            ))
            .await
            .unwrap();

        set.await.unwrap().unwrap();
        assert_eq!(device.switch_output(0), Some(true));
        assert!(device.is_healthy());
    }

    #[tokio::test]
    async fn test_stale_state_is_unhealthy() {
        let (device, _server) = device(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let err = device.health_check().unwrap_err();
        assert!(err.is_unhealthy());
    }

    #[tokio::test]
    async fn test_consumer_applies_status_and_fires_events() {
        let (device, mut server) = device(Duration::from_secs(900)).await;
        let presses = Arc::new(Presses(AtomicUsize::new(0)));
        device.subscribe_input(0, presses.clone());
        let consumer = device.start(Duration::from_secs(3600));

        let dst = device.client.src().to_string();
        for body in [
            json!({ "src": "dev", "dst": dst, "method": "NotifyStatus", "params": { "switch:0": { "output": true } } }),
            json!({ "src": "dev", "dst": dst, "method": "NotifyEvent",
                    "params": { "events": [{ "component": "input:0", "id": 0, "event": "long_push" }] } }),
        ] {
            server.send(Message::Text(body.to_string())).await.unwrap();
        }

        for _ in 0..100 {
            if presses.0.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(device.switch_output(0), Some(true));
        assert_eq!(presses.0.load(Ordering::SeqCst), 1);

        device.close().await;
        consumer.await.unwrap();
        assert!(!device.is_healthy());
    }
}
