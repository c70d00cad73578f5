//! UDP adapter: one envelope per datagram, no cross-datagram framing.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use gateway_bus::EventBus;
use gateway_protocol::{Envelope, Protocol};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::{publish_with_auto_parse, Adapter, AdapterError, AdapterStats, AdapterStatsSnapshot, AutoParse};

#[derive(Debug, Clone)]
pub struct UdpAdapterConfig {
    pub name: String,
    pub listen_address: String,
    /// `0` means OS-assigned; see `UdpAdapter::actual_port`.
    pub listen_port: u16,
    pub data_source_id: String,
    pub buffer_size: usize,
    pub auto_parse: AutoParse,
}

pub struct UdpAdapter {
    config: UdpAdapterConfig,
    bus: EventBus,
    stats: Arc<AdapterStats>,
    running: AtomicBool,
    actual_port: AtomicU16,
    cancel: Mutex<Option<CancellationToken>>,
}

impl UdpAdapter {
    pub fn new(config: UdpAdapterConfig, bus: EventBus) -> Self {
        UdpAdapter {
            config,
            bus,
            stats: Arc::new(AdapterStats::default()),
            running: AtomicBool::new(false),
            actual_port: AtomicU16::new(0),
            cancel: Mutex::new(None),
        }
    }

    /// The bound port, resolved after `start()` even when `listen_port = 0`.
    pub fn actual_port(&self) -> u16 {
        self.actual_port.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Adapter for UdpAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }
        let addr = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        let socket = UdpSocket::bind(&addr).await.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            AdapterError::BindFailed(e.to_string())
        })?;
        self.actual_port.store(socket.local_addr().map(|a| a.port()).unwrap_or(0), Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        let bus = self.bus.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let socket = Arc::new(socket);
        let buffer_size = self.config.buffer_size.max(1);

        tokio::spawn({
            let token = token.clone();
            let name = config.name.clone();
            async move {
                let mut buf = vec![0u8; buffer_size];
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        recv = socket.recv_from(&mut buf) => {
                            match recv {
                                Ok((len, peer)) => {
                                    let truncated = len >= buffer_size;
                                    if truncated {
                                        warn!(adapter = %name, "datagram truncated at {} bytes", buffer_size);
                                        stats.record_error();
                                    }
                                    let mut envelope = Envelope::new(Protocol::Udp, config.data_source_id.clone(), buf[..len].to_vec());
                                    envelope.adapter_name = Some(name.clone());
                                    envelope.source_address = Some(peer.ip().to_string());
                                    envelope.source_port = Some(peer.port());
                                    stats.record_received(len);
                                    publish_with_auto_parse(&bus, &Protocol::Udp.received_topic(), &name, &config.auto_parse, envelope, &stats);
                                }
                                Err(e) => {
                                    error!(adapter = %name, error = %e, "udp recv error");
                                    stats.record_error();
                                }
                            }
                        }
                    }
                }
                info!(adapter = %name, "udp adapter loop exited");
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
        Ok(())
    }

    fn get_stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
