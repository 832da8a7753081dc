//! Fake network peers shared by the integration suites
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// State behind one fake Gen2 relay with a single switch and input
pub struct FakeShellyState {
    pub id: String,
    pub generation: u8,
    pub output: AtomicBool,
    pub input: Mutex<Option<bool>>,
    pub fail_set: AtomicBool,
    pub info_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub client_src: Mutex<Option<String>>,
    notifications: broadcast::Sender<Value>,
}

pub struct FakeShelly {
    pub addr: SocketAddr,
    pub state: Arc<FakeShellyState>,
    server: JoinHandle<()>,
}

impl FakeShelly {
    pub async fn start(id: &str, generation: u8) -> Self {
        let (notifications, _) = broadcast::channel(16);
        let state = Arc::new(FakeShellyState {
            id: id.to_string(),
            generation,
            output: AtomicBool::new(false),
            input: Mutex::new(Some(false)),
            fail_set: AtomicBool::new(false),
            info_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            client_src: Mutex::new(None),
            notifications,
        });

        let app = Router::new()
            .route("/shelly", get(shelly_info))
            .route("/rpc", get(rpc_upgrade))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, server }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn info_calls(&self) -> usize {
        self.state.info_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.state.set_calls.load(Ordering::SeqCst)
    }

    pub fn fail_set(&self, fail: bool) {
        self.state.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn output(&self) -> bool {
        self.state.output.load(Ordering::SeqCst)
    }

    /// Push a notification to every connected client
    pub fn notify(&self, method: &str, params: Value) {
        let dst = self.state.client_src.lock().unwrap().clone().unwrap_or_default();
        let _ = self.state.notifications.send(json!({
            "src": self.state.id,
            "dst": dst,
            "method": method,
            "params": params,
        }));
    }
}

impl Drop for FakeShelly {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn shelly_info(State(state): State<Arc<FakeShellyState>>) -> impl IntoResponse {
    Json(json!({
        "id": state.id,
        "mac": "A8032AB12345",
        "model": "SNSW-001X16EU",
        "gen": state.generation,
        "fw_id": "20230913-112003/v1.14.0-gcb84623",
        "ver": "1.14.0",
        "app": "Plus1",
        "auth_en": false,
        "auth_domain": null
    }))
}

async fn rpc_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<FakeShellyState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_rpc(socket, state))
}

async fn serve_rpc(mut socket: WebSocket, state: Arc<FakeShellyState>) {
    let mut notifications = state.notifications.subscribe();
    loop {
        let outgoing = tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(request) => respond(&state, &request),
                    Err(_) => continue,
                },
                Some(Ok(_)) => continue,
                _ => break,
            },
            notification = notifications.recv() => match notification {
                Ok(notification) => notification,
                Err(_) => continue,
            },
        };
        if socket.send(Message::Text(outgoing.to_string().into())).await.is_err() {
            break;
        }
    }
}

fn status(state: &FakeShellyState) -> Value {
    json!({
        "sys": { "uptime": 1200 },
        "switch:0": {
            "id": 0,
            "source": "init",
            "output": state.output.load(Ordering::SeqCst),
            "apower": 0.0,
            "voltage": 230.1,
            "aenergy": { "total": 12.5, "by_minute": [0.0, 0.0, 0.0], "minute_ts": 1700000000 },
            "temperature": { "tC": 41.2, "tF": 106.2 }
        },
        "input:0": { "id": 0, "state": *state.input.lock().unwrap() }
    })
}

fn respond(state: &FakeShellyState, request: &Value) -> Value {
    let src = request["src"].as_str().unwrap_or_default().to_string();
    *state.client_src.lock().unwrap() = Some(src.clone());

    let mut reply = json!({ "id": request["id"], "src": state.id, "dst": src });
    match request["method"].as_str().unwrap_or_default() {
        "Shelly.GetDeviceInfo" => {
            state.info_calls.fetch_add(1, Ordering::SeqCst);
            reply["result"] = json!({
                "id": state.id,
                "mac": "A8032AB12345",
                "model": "SNSW-001X16EU",
                "gen": state.generation,
                "ver": "1.14.0",
                "app": "Plus1"
            });
        }
        "Shelly.GetStatus" => reply["result"] = status(state),
        "Switch.Set" => {
            state.set_calls.fetch_add(1, Ordering::SeqCst);
            if state.fail_set.load(Ordering::SeqCst) {
                reply["error"] = json!({ "code": -103, "message": "simulated relay failure" });
            } else {
                let on = request["params"]["on"].as_bool().unwrap_or(false);
                let was_on = state.output.swap(on, Ordering::SeqCst);
                reply["result"] = json!({ "was_on": was_on });
            }
        }
        other => {
            reply["error"] = json!({ "code": 404, "message": format!("No handler for {}", other) });
        }
    }
    reply
}

/// An address nothing listens on
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
