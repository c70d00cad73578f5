//! TCP adapter: accepts up to `max_connections`, reads newline-delimited
//! frames by default (or a bound `FrameSchema`'s raw frame per read when
//! `auto_parse` is enabled and the caller supplies fixed-length framing
//! via `ReaderFraming::FixedLength`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use gateway_bus::EventBus;
use gateway_protocol::{Envelope, Protocol};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::{publish_with_auto_parse, Adapter, AdapterError, AdapterStats, AdapterStatsSnapshot, AutoParse, ConnectionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderFraming {
    /// Split the stream on newline bytes (default).
    Newline,
    /// Read exactly `total_length` bytes per frame, from the bound `FrameSchema`.
    FixedLength(usize),
}

#[derive(Debug, Clone)]
pub struct TcpAdapterConfig {
    pub name: String,
    pub listen_address: String,
    pub listen_port: u16,
    pub data_source_id: String,
    pub max_connections: usize,
    pub framing: ReaderFraming,
    pub auto_parse: AutoParse,
}

pub struct TcpAdapter {
    config: TcpAdapterConfig,
    bus: EventBus,
    stats: Arc<AdapterStats>,
    running: AtomicBool,
    connections: Arc<Mutex<HashMap<String, ConnectionInfo>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl TcpAdapter {
    pub fn new(config: TcpAdapterConfig, bus: EventBus) -> Self {
        TcpAdapter {
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

#[async_trait::async_trait]
impl Adapter for TcpAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }
        let addr = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            AdapterError::BindFailed(e.to_string())
        })?;

        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        let bus = self.bus.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let connections = self.connections.clone();

        tokio::spawn({
            let token = token.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, peer)) => {
                                    let at_capacity = connections.lock().await.len() >= config.max_connections;
                                    if at_capacity {
                                        warn!(adapter = %config.name, max = config.max_connections, "max connections reached, refusing accept");
                                        stats.record_error();
                                        continue;
                                    }
                                    let connection_id = Uuid::new_v4().to_string();
                                    connections.lock().await.insert(
                                        connection_id.clone(),
                                        ConnectionInfo { remote_addr: peer.ip().to_string(), remote_port: peer.port(), connected_at: Utc::now() },
                                    );
                                    tokio::spawn(serve_connection(
                                        stream, connection_id, bus.clone(), config.clone(), stats.clone(), connections.clone(), token.clone(),
                                    ));
                                }
                                Err(e) => {
                                    error!(adapter = %config.name, error = %e, "tcp accept error");
                                    stats.record_error();
                                }
                            }
                        }
                    }
                }
                info!(adapter = %config.name, "tcp accept loop exited");
            }
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

async fn serve_connection(
    stream: TcpStream,
    connection_id: String,
    bus: EventBus,
    config: TcpAdapterConfig,
    stats: Arc<AdapterStats>,
    connections: Arc<Mutex<HashMap<String, ConnectionInfo>>>,
    token: CancellationToken,
) {
    let conn_info = connections.lock().await.get(&connection_id).cloned();
    let (source_address, source_port) = conn_info.map(|c| (Some(c.remote_addr), Some(c.remote_port))).unwrap_or((None, None));

    let mut reader = BufReader::new(stream);
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = read_one_frame(&mut reader, config.framing) => frame,
        };
        match frame {
            Ok(Some(data)) => {
                let mut envelope = Envelope::new(Protocol::Tcp, config.data_source_id.clone(), data.clone());
                envelope.adapter_name = Some(config.name.clone());
                envelope.connection_id = Some(connection_id.clone());
                envelope.source_address = source_address.clone();
                envelope.source_port = source_port;
                stats.record_received(data.len());
                publish_with_auto_parse(&bus, &Protocol::Tcp.received_topic(), &config.name, &config.auto_parse, envelope, &stats);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(adapter = %config.name, connection_id, error = %e, "tcp read error, closing connection");
                stats.record_error();
                break;
            }
        }
    }
    connections.lock().await.remove(&connection_id);
}

async fn read_one_frame(reader: &mut BufReader<TcpStream>, framing: ReaderFraming) -> std::io::Result<Option<Vec<u8>>> {
    match framing {
        ReaderFraming::Newline => {
            let mut line = Vec::new();
            let n = reader.read_until(b'\n', &mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                line.pop();
            }
            Ok(Some(line))
        }
        ReaderFraming::FixedLength(len) => {
            let mut buf = vec![0u8; len];
            match reader.read_exact(&mut buf).await {
                Ok(()) => Ok(Some(buf)),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
                Err(e) => Err(e),
            }
        }
    }
}
