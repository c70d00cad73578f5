//! HTTP adapter: a single `axum` ingest route. Each valid request body is
//! one envelope; selected headers and the peer address are captured.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{on, MethodFilter};
use axum::Router;
use gateway_bus::EventBus;
use gateway_protocol::{Envelope, Protocol};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::common::{publish_with_auto_parse, Adapter, AdapterError, AdapterStats, AdapterStatsSnapshot, AutoParse};

#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub name: String,
    pub bind_address: String,
    pub path: String,
    pub method: Method,
    pub data_source_id: String,
    /// Headers to capture onto the envelope (case-insensitive names).
    pub captured_headers: Vec<String>,
    pub auto_parse: AutoParse,
}

struct HandlerState {
    bus: EventBus,
    config: HttpAdapterConfig,
    stats: Arc<AdapterStats>,
}

pub struct HttpAdapter {
    config: HttpAdapterConfig,
    bus: EventBus,
    stats: Arc<AdapterStats>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig, bus: EventBus) -> Self {
        HttpAdapter { config, bus, stats: Arc::new(AdapterStats::default()), running: AtomicBool::new(false), cancel: Mutex::new(None) }
    }
}

async fn ingest(State(state): State<Arc<HandlerState>>, ConnectInfo(peer): ConnectInfo<SocketAddr>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let mut envelope = Envelope::new(Protocol::Http, state.config.data_source_id.clone(), body.to_vec());
    envelope.adapter_name = Some(state.config.name.clone());
    envelope.source_address = Some(peer.ip().to_string());
    envelope.source_port = Some(peer.port());

    let mut captured = HashMap::new();
    for name in &state.config.captured_headers {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            captured.insert(name.clone(), value.to_string());
        }
    }
    envelope.headers = captured;

    state.stats.record_received(body.len());
    publish_with_auto_parse(&state.bus, &Protocol::Http.received_topic(), &state.config.name, &state.config.auto_parse, envelope, &state.stats);
    StatusCode::ACCEPTED
}

#[async_trait::async_trait]
impl Adapter for HttpAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }
        let state = Arc::new(HandlerState { bus: self.bus.clone(), config: self.config.clone(), stats: self.stats.clone() });
        let method_filter = MethodFilter::try_from(self.config.method.clone()).map_err(|e| AdapterError::Config(e.to_string()))?;
        let router = Router::new().route(&self.config.path, on(method_filter, ingest)).with_state(state);

        let listener = TcpListener::bind(&self.config.bind_address).await.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            AdapterError::BindFailed(e.to_string())
        })?;

        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());
        let name = self.config.name.clone();

        tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>());
            tokio::select! {
                _ = token.cancelled() => {}
                result = serve => {
                    if let Err(e) = result {
                        tracing::error!(adapter = %name, error = %e, "http adapter server exited with error");
                    }
                }
            }
            info!(adapter = %name, "http adapter server stopped");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        Ok(())
    }

    fn get_stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
