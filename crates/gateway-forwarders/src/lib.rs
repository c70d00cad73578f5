//! Protocol-specific egress (C7): connection reuse, retry, and
//! auto-reconnect behind a uniform `Forwarder` trait.

pub mod http;
pub mod mqtt;
pub mod retry;
pub mod tcp;
pub mod udp;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

pub use http::{HttpForwarder, HttpForwarderConfig};
pub use mqtt::{MqttForwarder, MqttForwarderConfig};
pub use retry::{Backoff, RetryPolicy};
pub use tcp::{TcpForwarder, TcpForwarderConfig};
pub use udp::{UdpForwarder, UdpForwarderConfig};
pub use websocket::{WebSocketForwarder, WebSocketForwarderConfig};

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    Success,
    Failed,
    Timeout,
    Retry,
}

#[derive(Debug, Clone)]
pub struct ForwardResult {
    pub status: ForwardStatus,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub error: Option<String>,
}

/// A single attempt's failure, classified as transient (eligible for
/// retry) or not.
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    pub transient: bool,
    pub status: Option<ForwardStatus>,
    pub status_code: Option<u16>,
    pub error: String,
}

impl ForwardOutcome {
    pub fn transient(error: String) -> Self {
        ForwardOutcome { transient: true, status: None, status_code: None, error }
    }

    pub fn timeout(error: String) -> Self {
        ForwardOutcome { transient: true, status: Some(ForwardStatus::Timeout), status_code: None, error }
    }

    pub fn permanent(error: String, status_code: Option<u16>) -> Self {
        ForwardOutcome { transient: false, status: None, status_code, error }
    }
}

/// Connection lifecycle, shared by every connection-oriented forwarder
/// (TCP, WebSocket, MQTT): `disconnected -> connecting -> connected ->
/// (closing|error) -> disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Error,
}

/// Rolling delivery metrics common to every forwarder.
#[derive(Debug, Default)]
pub struct ForwarderStats {
    pub forwards_attempted: AtomicU64,
    pub forwards_succeeded: AtomicU64,
    pub forwards_failed: AtomicU64,
    pub total_duration_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForwarderStatsSnapshot {
    pub forwards_attempted: u64,
    pub forwards_succeeded: u64,
    pub forwards_failed: u64,
    pub total_duration_ms: u64,
}

impl ForwarderStatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.forwards_attempted == 0 {
            return 0.0;
        }
        self.forwards_succeeded as f64 / self.forwards_attempted as f64
    }

    pub fn avg_duration_ms(&self) -> f64 {
        if self.forwards_attempted == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.forwards_attempted as f64
    }
}

impl ForwarderStats {
    pub fn record(&self, result: &ForwardResult) {
        self.forwards_attempted.fetch_add(1, Ordering::Relaxed);
        if result.status == ForwardStatus::Success {
            self.forwards_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.forwards_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_ms.fetch_add(result.duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ForwarderStatsSnapshot {
        ForwarderStatsSnapshot {
            forwards_attempted: self.forwards_attempted.load(Ordering::Relaxed),
            forwards_succeeded: self.forwards_succeeded.load(Ordering::Relaxed),
            forwards_failed: self.forwards_failed.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// The capability set every protocol forwarder implements (§4.6).
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, payload: &[u8]) -> ForwardResult;
    async fn close(&self);
    fn stats(&self) -> ForwarderStatsSnapshot;
}
