//! Protocol-specific ingress adapters (C4).
//!
//! Every adapter normalizes inbound bytes into a [`gateway_protocol::Envelope`]
//! and publishes it on its protocol's `_RECEIVED` bus topic, optionally
//! running the frame parser first when bound to a `FrameSchema` with
//! `auto_parse` enabled. See `common::Adapter` for the shared capability
//! set (`start`/`stop`/`restart`/`get_stats`).

pub mod common;
pub mod http;
pub mod mqtt;
pub mod tcp;
pub mod udp;
pub mod websocket;

pub use common::{Adapter, AdapterError, AdapterStats, AdapterStatsSnapshot, AutoParse, ConnectionInfo};
pub use http::{HttpAdapter, HttpAdapterConfig};
pub use mqtt::{MqttAdapter, MqttAdapterConfig, MqttTopicFilter};
pub use tcp::{ReaderFraming, TcpAdapter, TcpAdapterConfig};
pub use udp::{UdpAdapter, UdpAdapterConfig};
pub use websocket::{WebSocketAdapter, WebSocketAdapterConfig};
