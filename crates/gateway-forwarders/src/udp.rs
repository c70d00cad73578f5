//! UDP forwarder: one datagram per payload. Success means local send
//! acceptance — there is no application-level ack.

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::retry::forward_with_retry;
use crate::{ForwardOutcome, ForwardResult, Forwarder, ForwarderError, ForwarderStats, ForwarderStatsSnapshot, RetryPolicy};

#[derive(Debug, Clone)]
pub struct UdpForwarderConfig {
    pub address: String,
    pub port: u16,
    pub retry_policy: RetryPolicy,
}

pub struct UdpForwarder {
    config: UdpForwarderConfig,
    socket: Mutex<Option<UdpSocket>>,
    stats: ForwarderStats,
}

impl UdpForwarder {
    pub fn new(config: UdpForwarderConfig) -> Result<Self, ForwarderError> {
        if config.address.is_empty() {
            return Err(ForwarderError::Config("udp forwarder requires a non-empty address".to_string()));
        }
        Ok(UdpForwarder { config, socket: Mutex::new(None), stats: ForwarderStats::default() })
    }

    async fn ensure_socket(&self) -> std::io::Result<()> {
        let mut guard = self.socket.lock().await;
        if guard.is_none() {
            *guard = Some(UdpSocket::bind("0.0.0.0:0").await?);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Forwarder for UdpForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let result = forward_with_retry(&self.config.retry_policy, |_attempt| async move {
            if let Err(e) = self.ensure_socket().await {
                return Err(ForwardOutcome::transient(format!("socket bind failed: {e}")));
            }
            let guard = self.socket.lock().await;
            let socket = guard.as_ref().expect("ensured above");
            let dest = format!("{}:{}", self.config.address, self.config.port);
            match socket.send_to(payload, &dest).await {
                Ok(_) => Ok(()),
                Err(e) => Err(ForwardOutcome::transient(format!("send failed: {e}"))),
            }
        })
        .await;
        self.stats.record(&result);
        result
    }

    async fn close(&self) {
        *self.socket.lock().await = None;
    }

    fn stats(&self) -> ForwarderStatsSnapshot {
        self.stats.snapshot()
    }
}
