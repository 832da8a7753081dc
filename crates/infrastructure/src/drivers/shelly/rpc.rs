//! JSON-RPC 2.0 over one WebSocket, as spoken by Gen2 Shelly devices
//!
//! A single reader task owns the read half. Callers register a oneshot in the
//! pending table before writing and wait on it; the reader completes it when
//! a message with the same `id` arrives. Messages without `id` are device
//! notifications and go to one consumer channel.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domain::DomainError;
use domain::error::Result;
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub src: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// Anything the device sends: a response (with `id`) or a notification
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub dst: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

impl RpcMessage {
    /// The `result` payload, or the device's error as a protocol error
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(DomainError::Protocol(format!(
                "rpc error {}: {}",
                err.code, err.message
            ))),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
type PendingTable = BTreeMap<u64, oneshot::Sender<Result<RpcMessage>>>;

/// Pending callers plus the closed flag, flipped under the same lock
#[derive(Default)]
struct Pending {
    table: PendingTable,
    closed: bool,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the pending entry when the waiting caller goes away
struct PendingGuard<'a> {
    id: u64,
    pending: &'a Mutex<Pending>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).table.remove(&self.id);
    }
}

pub struct RpcClient {
    src: String,
    next_id: AtomicU64,
    writer: tokio::sync::Mutex<WsSink>,
    pending: Arc<Mutex<Pending>>,
    notifications: Mutex<Option<mpsc::Receiver<RpcMessage>>>,
    reader: JoinHandle<()>,
    closing: AtomicBool,
}

impl RpcClient {
    /// Open `ws://{host}/rpc`, sending `origin` as the Origin header when given
    pub async fn connect(host: &str, origin: Option<&str>) -> Result<Self> {
        let url = format!("ws://{}/rpc", host);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| DomainError::InvalidDriverConfig(format!("bad rpc url {}: {}", url, e)))?;
        if let Some(origin) = origin {
            let value = HeaderValue::from_str(origin).map_err(|e| {
                DomainError::InvalidDriverConfig(format!("bad origin {}: {}", origin, e))
            })?;
            request.headers_mut().insert("Origin", value);
        }

        let (stream, _) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| DomainError::Timeout(format!("websocket handshake with {}", host)))?
            .map_err(|e| DomainError::DriverError(format!("websocket connect to {}: {}", host, e)))?;

        Ok(Self::from_stream(stream))
    }

    /// Wrap an established WebSocket and start the reader task
    pub fn from_stream<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let src = format!("swhub-{}", Uuid::new_v4().simple());
        let (sink, stream) = stream.split();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);

        let reader = tokio::spawn(read_loop(stream, src.clone(), pending.clone(), notify_tx));

        Self {
            src,
            next_id: AtomicU64::new(1),
            writer: tokio::sync::Mutex::new(Box::pin(sink)),
            pending,
            notifications: Mutex::new(Some(notify_rx)),
            reader,
            closing: AtomicBool::new(false),
        }
    }

    /// Identifier sent as `src`; the device answers with it as `dst`
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst) || lock(&self.pending).closed
    }

    /// Notification stream; only the first caller gets it
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<RpcMessage>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn request(&self, method: &str, params: Option<Value>) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            src: self.src.clone(),
            method: method.to_string(),
            params,
        }
    }

    async fn write(&self, request: &RpcRequest) -> Result<()> {
        let text = serde_json::to_string(request)
            .map_err(|e| DomainError::Protocol(format!("failed to encode rpc request: {}", e)))?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| DomainError::ConnectionClosed(format!("rpc write failed: {}", e)))
    }

    /// Fire and forget; any response is dropped by the reader
    pub async fn send_json(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(DomainError::ConnectionClosed(self.src.clone()));
        }
        self.write(&self.request(method, params)).await
    }

    /// Send and wait for the response with the same id.
    ///
    /// Dropping the returned future removes the pending entry.
    pub async fn send_json_await(&self, method: &str, params: Option<Value>) -> Result<RpcMessage> {
        let request = self.request(method, params);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed || self.closing.load(Ordering::SeqCst) {
                return Err(DomainError::ConnectionClosed(self.src.clone()));
            }
            pending.table.insert(request.id, tx);
        }
        let _guard = PendingGuard {
            id: request.id,
            pending: &self.pending,
        };

        self.write(&request).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(DomainError::ConnectionClosed(self.src.clone())),
        }
    }

    /// `send_json_await` with a deadline, returning the `result` payload
    pub async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let response = tokio::time::timeout(timeout, self.send_json_await(method, params))
            .await
            .map_err(|_| DomainError::Timeout(format!("rpc {} after {:?}", method, timeout)))??;
        response.into_result()
    }

    /// Close the socket; waiting callers observe a closed connection
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.writer.lock().await.close().await {
            debug!(src = %self.src, error = %e, "Error while closing rpc websocket");
        }
        self.reader.abort();
        fail_pending(&self.pending, None);
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        lock(&self.pending).table.len()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    src: String,
    pending: Arc<Mutex<Pending>>,
    notifications: mpsc::Sender<RpcMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let failure = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => dispatch(&text, &src, &pending, &notifications),
            Some(Ok(Message::Close(_))) | None => {
                break DomainError::ConnectionClosed("websocket closed by peer".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                break DomainError::ConnectionClosed(format!("websocket read failed: {}", e));
            }
        }
    };
    fail_pending(&pending, Some(failure));
}

fn dispatch(
    text: &str,
    src: &str,
    pending: &Mutex<Pending>,
    notifications: &mpsc::Sender<RpcMessage>,
) {
    let message: RpcMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(src, error = %e, "Dropping undecodable rpc message");
            return;
        }
    };

    match message.dst.as_deref() {
        Some(dst) if dst.eq_ignore_ascii_case(src) => {}
        other => {
            warn!(src, dst = ?other, "Dropping misrouted rpc message");
            return;
        }
    }

    let Some(id) = message.id else {
        if let Err(e) = notifications.try_send(message) {
            debug!(src, error = %e, "Notification not delivered");
        }
        return;
    };

    let waiter = lock(pending).table.remove(&id);
    match waiter {
        Some(tx) => {
            // The caller may have given up in the meantime
            let _ = tx.send(Ok(message));
        }
        None => debug!(src, id, "Dropping rpc response nobody waits for"),
    }
}

/// Mark the connection closed. `failure` goes to the lowest pending id; every
/// other waiter sees a plain closed connection.
fn fail_pending(pending: &Mutex<Pending>, failure: Option<DomainError>) {
    let mut failure = failure;
    let waiters = {
        let mut guard = lock(pending);
        guard.closed = true;
        std::mem::take(&mut guard.table)
    };
    for (_, tx) in waiters {
        let err = failure
            .take()
            .unwrap_or_else(|| DomainError::ConnectionClosed("rpc connection closed".to_string()));
        let _ = tx.send(Err(err));
    }
    if let Some(failure) = failure {
        warn!(error = %failure, "Rpc connection ended");
    }
}
