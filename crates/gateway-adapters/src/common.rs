//! Shared adapter scaffolding: the `Adapter` capability set, stats
//! counters, and the auto-parse-then-publish helper every protocol
//! adapter calls on receipt of a message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use frame_parser::parse_frame;
use gateway_bus::EventBus;
use gateway_protocol::{Envelope, FrameSchema};
use thiserror::Error;

/// Registry entry for a connection-oriented adapter (TCP, WebSocket).
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub remote_addr: String,
    pub remote_port: u16,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter is already running")]
    AlreadyRunning,
    #[error("adapter is not running")]
    NotRunning,
    #[error("bind failed: {0}")]
    BindFailed(String),
    #[error("maximum connections reached ({0})")]
    MaxConnectionsReached(usize),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Plain atomic counters, matching the teacher's preference for lock-free
/// counters on a hot receive path over a mutex-guarded struct.
#[derive(Debug, Default)]
pub struct AdapterStats {
    pub messages_received: AtomicU64,
    pub messages_published: AtomicU64,
    pub errors: AtomicU64,
    pub bytes_received: AtomicU64,
}

/// A point-in-time snapshot of [`AdapterStats`], suitable for serializing
/// or asserting on in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterStatsSnapshot {
    pub messages_received: u64,
    pub messages_published: u64,
    pub errors: u64,
    pub bytes_received: u64,
}

impl AdapterStats {
    pub fn snapshot(&self) -> AdapterStatsSnapshot {
        AdapterStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Common capability set every protocol adapter implements (§4.3).
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn stop(&self) -> Result<(), AdapterError>;
    async fn restart(&self) -> Result<(), AdapterError> {
        let _ = self.stop().await;
        self.start().await
    }
    fn get_stats(&self) -> AdapterStatsSnapshot;
    fn name(&self) -> &str;
}

/// Optional frame-auto-parse binding shared by every adapter.
#[derive(Clone, Default)]
pub struct AutoParse {
    pub schema: Option<Arc<FrameSchema>>,
}

/// Publish `envelope` on `topic`, first running frame auto-parse if a
/// schema is bound. On parse failure the envelope is still published with
/// `parse_error` set, per §4.3: "on failure it still publishes the
/// original envelope with `parse_error`".
pub fn publish_with_auto_parse(bus: &EventBus, topic: &str, adapter_name: &str, auto_parse: &AutoParse, mut envelope: Envelope, stats: &AdapterStats) {
    if let Some(schema) = &auto_parse.schema {
        match parse_frame(schema, &envelope.raw_data) {
            Ok(parsed) => envelope.parsed_data = Some(parsed),
            Err(e) => envelope.parse_error = Some(e.to_string()),
        }
    }
    bus.publish(topic, &envelope, adapter_name);
    stats.record_published();
}
