//! WebSocket forwarder: a persistent connection with ping/pong heartbeat.
//! A background task pings every `ping_interval`, bounded by `ping_timeout`;
//! a dropped pong or a closed socket tears the connection down so the next
//! `forward` call reconnects.

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::retry::forward_with_retry;
use crate::{ConnectionState, ForwardOutcome, ForwardResult, Forwarder, ForwarderError, ForwarderStats, ForwarderStatsSnapshot, RetryPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct WebSocketForwarderConfig {
    pub url: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

struct Conn {
    ws: Option<WsStream>,
    state: ConnectionState,
    heartbeat: Option<JoinHandle<()>>,
}

pub struct WebSocketForwarder {
    config: WebSocketForwarderConfig,
    conn: Arc<Mutex<Conn>>,
    stats: ForwarderStats,
}

impl WebSocketForwarder {
    pub fn new(config: WebSocketForwarderConfig) -> Result<Self, ForwarderError> {
        if config.url.is_empty() {
            return Err(ForwarderError::Config("websocket forwarder requires a non-empty url".to_string()));
        }
        Ok(WebSocketForwarder {
            config,
            conn: Arc::new(Mutex::new(Conn { ws: None, state: ConnectionState::Disconnected, heartbeat: None })),
            stats: ForwarderStats::default(),
        })
    }

    async fn connect(&self) -> Result<WsStream, String> {
        let (ws, _response) = tokio::time::timeout(self.config.ping_timeout, connect_async(&self.config.url))
            .await
            .map_err(|_| "connect timed out".to_string())?
            .map_err(|e| e.to_string())?;
        Ok(ws)
    }

    /// Spawn the tracked background ping loop for a freshly established
    /// connection. The handle lives in `Conn` so `close()` can abort it
    /// instead of leaving a detached task running past the connection.
    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let conn = Arc::clone(&self.conn);
        let interval = self.config.ping_interval;
        let timeout = self.config.ping_timeout;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let mut guard = conn.lock().await;
                let Some(ws) = guard.ws.as_mut() else { break };
                match tokio::time::timeout(timeout, ws.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        guard.ws = None;
                        guard.state = ConnectionState::Error;
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Forwarder for WebSocketForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let text = String::from_utf8_lossy(payload).to_string();
        let result = forward_with_retry(&self.config.retry_policy, |_attempt| {
            let text = text.clone();
            async move {
                let mut guard = self.conn.lock().await;
                if guard.ws.is_none() {
                    guard.state = ConnectionState::Connecting;
                    match self.connect().await {
                        Ok(ws) => {
                            guard.ws = Some(ws);
                            guard.state = ConnectionState::Connected;
                            if let Some(old) = guard.heartbeat.take() {
                                old.abort();
                            }
                            guard.heartbeat = Some(self.spawn_heartbeat());
                        }
                        Err(e) => {
                            guard.state = ConnectionState::Error;
                            return Err(ForwardOutcome::transient(format!("connect failed: {e}")));
                        }
                    }
                }
                let ws = guard.ws.as_mut().expect("connected above");
                let send = tokio::time::timeout(self.config.ping_timeout, ws.send(Message::Text(text.into())));
                match send.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        guard.ws = None;
                        guard.state = ConnectionState::Error;
                        return Err(ForwardOutcome::transient(format!("send failed: {e}")));
                    }
                    Err(_) => {
                        guard.ws = None;
                        guard.state = ConnectionState::Error;
                        return Err(ForwardOutcome::timeout("ping timeout while sending".to_string()));
                    }
                }
                Ok(())
            }
        })
        .await;
        self.stats.record(&result);
        result
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(task) = guard.heartbeat.take() {
            task.abort();
        }
        if let Some(mut ws) = guard.ws.take() {
            let _ = ws.close(None).await;
        }
        guard.state = ConnectionState::Disconnected;
    }

    fn stats(&self) -> ForwarderStatsSnapshot {
        self.stats.snapshot()
    }
}
