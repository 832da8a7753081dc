use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use domain::error::Result;
use domain::pin::validate_pins;
use domain::{
    DigitalInput, DigitalOutput, DomainError, DriverKind, DriverState, IoDriver, Pin,
    PinDirection, PushEvent,
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::memory::MemoryInput;
use super::pin_table::{PinTable, begin_setup, ensure_ready};
use super::remote_io::{RemoteConfigBody, RemoteStateBody, SetOutputBody, TOKEN_HEADER};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIoSlaveConfig {
    /// Listen address, e.g. `0.0.0.0:8090`
    pub listen: String,
    pub token: String,
}

/// Exposes in-memory pins over HTTP to a remote `remoteio` master
pub struct RemoteIoSlaveDriver {
    config: RemoteIoSlaveConfig,
    inputs: PinTable<MemoryInput>,
    outputs: PinTable<SlaveOutput>,
    state: DriverState,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl RemoteIoSlaveDriver {
    pub fn new(config: RemoteIoSlaveConfig) -> Self {
        Self {
            config,
            inputs: PinTable::new(PinDirection::Input),
            outputs: PinTable::new(PinDirection::Output),
            state: DriverState::default(),
            local_addr: None,
            shutdown: CancellationToken::new(),
            server: None,
        }
    }

    /// Address the server actually bound, once set up
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Concrete input handle, for setting the level a master reads
    pub fn memory_input(&self, pin: Pin) -> Result<Arc<MemoryInput>> {
        ensure_ready(self.name(), self.is_ready())?;
        self.inputs.get(self.name(), pin)
    }
}

#[async_trait]
impl IoDriver for RemoteIoSlaveDriver {
    fn name(&self) -> &str {
        DriverKind::RemoteIoSlave.as_str()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    async fn setup(&mut self, inputs: &[Pin], outputs: &[Pin]) -> Result<()> {
        begin_setup(self.name(), self.state)?;
        validate_pins(self.name(), PinDirection::Input, inputs, None)?;
        validate_pins(self.name(), PinDirection::Output, outputs, None)?;

        let listener = tokio::net::TcpListener::bind(&self.config.listen)
            .await
            .map_err(|e| {
                DomainError::DriverError(format!("failed to bind {}: {}", self.config.listen, e))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DomainError::DriverError(e.to_string()))?;

        let shared = SlaveState {
            token: Arc::from(self.config.token.as_str()),
            inputs: inputs
                .iter()
                .map(|&pin| (pin, Arc::new(MemoryInput::new(pin))))
                .collect::<Vec<_>>()
                .into(),
            outputs: outputs
                .iter()
                .map(|&pin| (pin, Arc::new(SlaveOutput::default())))
                .collect::<Vec<_>>()
                .into(),
        };
        for (pin, input) in shared.inputs.iter() {
            self.inputs.push(*pin, input.clone());
        }
        for (pin, output) in shared.outputs.iter() {
            self.outputs.push(*pin, output.clone());
        }

        let router = create_router(shared);
        let shutdown = self.shutdown.clone();
        self.server = Some(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "Remote io slave server stopped");
            }
        }));

        self.local_addr = Some(local_addr);
        self.state = DriverState::Ready;
        info!(%local_addr, ?inputs, ?outputs, "Remote io slave listening");
        Ok(())
    }

    fn input(&self, pin: Pin) -> Result<Arc<dyn DigitalInput>> {
        ensure_ready(self.name(), self.is_ready())?;
        Ok(self.inputs.get(self.name(), pin)?)
    }

    fn output(&self, pin: Pin) -> Result<Arc<dyn DigitalOutput>> {
        ensure_ready(self.name(), self.is_ready())?;
        Ok(self.outputs.get(self.name(), pin)?)
    }

    fn all_io(&self) -> (Vec<Pin>, Vec<Pin>) {
        (self.inputs.pins(), self.outputs.pins())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = self.state.to_closed();
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await.is_err() {
                warn!("Remote io slave server did not stop in time");
            }
        }
        for output in self.outputs.handles() {
            output.0.store(false, Ordering::SeqCst);
        }
        self.inputs.clear();
        self.outputs.clear();
        Ok(())
    }
}

#[derive(Default)]
struct SlaveOutput(AtomicBool);

#[async_trait]
impl DigitalOutput for SlaveOutput {
    async fn state(&self) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }

    async fn set(&self, state: bool) -> Result<()> {
        self.0.store(state, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
struct SlaveState {
    token: Arc<str>,
    inputs: Arc<[(Pin, Arc<MemoryInput>)]>,
    outputs: Arc<[(Pin, Arc<SlaveOutput>)]>,
}

impl SlaveState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|token| token.eq_ignore_ascii_case(&self.token))
    }

    fn input(&self, pin: Pin) -> Option<&Arc<MemoryInput>> {
        self.inputs.iter().find(|(p, _)| *p == pin).map(|(_, i)| i)
    }

    fn output(&self, pin: Pin) -> Option<&Arc<SlaveOutput>> {
        self.outputs.iter().find(|(p, _)| *p == pin).map(|(_, o)| o)
    }
}

fn create_router(state: SlaveState) -> Router {
    Router::new()
        .route("/push/{pin}/event/{event}/token/{token}", get(handle_push))
        .route("/config", get(get_config))
        .route("/state", get(get_state))
        .route("/output", post(set_output))
        .with_state(state)
}

async fn handle_push(
    State(state): State<SlaveState>,
    Path((pin, event, token)): Path<(String, String, String)>,
) -> impl IntoResponse {
    if !token.eq_ignore_ascii_case(&state.token) {
        return (StatusCode::UNAUTHORIZED, "token mismatch").into_response();
    }
    let Some(input) = pin.parse::<Pin>().ok().and_then(|pin| state.input(pin)) else {
        return (StatusCode::NOT_FOUND, "pin not found").into_response();
    };
    let Ok(event) = event.parse::<PushEvent>() else {
        return (StatusCode::BAD_REQUEST, "unrecognized push event type").into_response();
    };

    debug!(pin = input.pin(), %event, "Remote push event");
    input.press(event).await;
    StatusCode::OK.into_response()
}

async fn get_config(State(state): State<SlaveState>, headers: HeaderMap) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(RemoteConfigBody {
        inputs: state.inputs.iter().map(|(pin, _)| *pin).collect(),
        outputs: state.outputs.iter().map(|(pin, _)| *pin).collect(),
    })
    .into_response()
}

async fn get_state(State(state): State<SlaveState>, headers: HeaderMap) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(RemoteStateBody {
        inputs: state
            .inputs
            .iter()
            .map(|(pin, input)| (*pin, input.level()))
            .collect(),
        outputs: state
            .outputs
            .iter()
            .map(|(pin, output)| (*pin, output.0.load(Ordering::SeqCst)))
            .collect(),
    })
    .into_response()
}

async fn set_output(
    State(state): State<SlaveState>,
    headers: HeaderMap,
    Json(body): Json<SetOutputBody>,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.output(body.pin) {
        Some(output) => {
            output.0.store(body.state, Ordering::SeqCst);
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, "pin not found").into_response(),
    }
}
