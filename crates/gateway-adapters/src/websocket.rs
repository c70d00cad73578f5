//! WebSocket adapter: one envelope per inbound message (text or binary),
//! served as an `axum` WebSocket upgrade route — the same HTTP-family
//! stack the HTTP adapter uses, rather than a standalone raw listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use gateway_bus::EventBus;
use gateway_protocol::{Envelope, Protocol};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::{publish_with_auto_parse, Adapter, AdapterError, AdapterStats, AdapterStatsSnapshot, AutoParse, ConnectionInfo};

#[derive(Debug, Clone)]
pub struct WebSocketAdapterConfig {
    pub name: String,
    pub bind_address: String,
    pub path: String,
    pub data_source_id: String,
    pub max_connections: usize,
    pub auto_parse: AutoParse,
}

struct HandlerState {
    bus: EventBus,
    config: WebSocketAdapterConfig,
    stats: Arc<AdapterStats>,
    connections: Arc<Mutex<HashMap<String, ConnectionInfo>>>,
}

pub struct WebSocketAdapter {
    config: WebSocketAdapterConfig,
    bus: EventBus,
    stats: Arc<AdapterStats>,
    running: AtomicBool,
    connections: Arc<Mutex<HashMap<String, ConnectionInfo>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl WebSocketAdapter {
    pub fn new(config: WebSocketAdapterConfig, bus: EventBus) -> Self {
        WebSocketAdapter {
            config,
            bus,
            stats: Arc::new(AdapterStats::default()),
            running: AtomicBool::new(false),
            connections: Arc::new(Mutex::new(HashMap::new())),
            cancel: Mutex::new(None),
        }
    }

    pub async fn connections(&self) -> HashMap<String, ConnectionInfo> {
        self.connections.lock().await.clone()
    }
}

async fn upgrade(State(state): State<Arc<HandlerState>>, ConnectInfo(peer): ConnectInfo<SocketAddr>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let at_capacity = state.connections.lock().await.len() >= state.config.max_connections;
    if at_capacity {
        warn!(adapter = %state.config.name, "max connections reached, refusing websocket upgrade");
        state.stats.record_error();
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(mut socket: WebSocket, peer: SocketAddr, state: Arc<HandlerState>) {
    let connection_id = Uuid::new_v4().to_string();
    state.connections.lock().await.insert(
        connection_id.clone(),
        ConnectionInfo { remote_addr: peer.ip().to_string(), remote_port: peer.port(), connected_at: Utc::now() },
    );

    while let Some(Ok(msg)) = socket.recv().await {
        let data = match msg {
            Message::Text(t) => t.as_bytes().to_vec(),
            Message::Binary(b) => b.to_vec(),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };
        let mut envelope = Envelope::new(Protocol::WebSocket, state.config.data_source_id.clone(), data.clone());
        envelope.adapter_name = Some(state.config.name.clone());
        envelope.connection_id = Some(connection_id.clone());
        envelope.source_address = Some(peer.ip().to_string());
        envelope.source_port = Some(peer.port());
        state.stats.record_received(data.len());
        publish_with_auto_parse(&state.bus, &Protocol::WebSocket.received_topic(), &state.config.name, &state.config.auto_parse, envelope, &state.stats);
    }

    state.connections.lock().await.remove(&connection_id);
}

#[async_trait::async_trait]
impl Adapter for WebSocketAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }
        let state = Arc::new(HandlerState { bus: self.bus.clone(), config: self.config.clone(), stats: self.stats.clone(), connections: self.connections.clone() });
        let router = Router::new().route(&self.config.path, get(upgrade)).with_state(state);

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
                        tracing::error!(adapter = %name, error = %e, "websocket adapter server exited with error");
                    }
                }
            }
            info!(adapter = %name, "websocket adapter server stopped");
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
        self.connections.lock().await.clear();
        Ok(())
    }

    fn get_stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
