//! Construction entry point: turns a validated [`crate::config::GatewayConfig`]
//! into a wired, not-yet-started gateway — the `Pipeline` plus one adapter
//! instance per configured listener/connection. Mirrors `forwarder::main`'s
//! "load config, then build subsystems from it" shape, generalized to the
//! gateway's larger subsystem set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_adapters::tcp::ReaderFraming;
use gateway_adapters::{
    Adapter, AutoParse, HttpAdapter, HttpAdapterConfig, MqttAdapter, MqttAdapterConfig, MqttTopicFilter, TcpAdapter, TcpAdapterConfig, UdpAdapter, UdpAdapterConfig,
    WebSocketAdapter, WebSocketAdapterConfig,
};
use gateway_bus::EventBus;
use gateway_core::{MonitoringService, Pipeline};
use gateway_crypto::CryptoService;
use gateway_protocol::FrameSchema;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;

/// Bound on how long `shutdown()` waits for the monitoring db writer to
/// drain its queued message-log rows before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("adapter '{adapter}' references unknown frame schema '{schema}'")]
    UnknownFrameSchema { adapter: String, schema: String },
    #[error("registering target system failed: {0}")]
    TargetRegistration(String),
}

/// A fully wired gateway: the pipeline plus every configured adapter,
/// constructed but not yet started.
pub struct RunningGateway {
    pub bus: EventBus,
    pub pipeline: Arc<Pipeline>,
    udp: Vec<Arc<UdpAdapter>>,
    tcp: Vec<Arc<TcpAdapter>>,
    http: Vec<Arc<HttpAdapter>>,
    websocket: Vec<Arc<WebSocketAdapter>>,
    mqtt: Vec<Arc<MqttAdapter>>,
}

/// Build every subsystem from `config`: the event bus, crypto service,
/// monitoring service, pipeline, and one adapter per configured entry.
/// Frame schemas, routing rules, and target systems are registered on the
/// pipeline before it is returned; adapters are constructed but left
/// unstarted so the caller controls startup ordering.
pub fn build_gateway(config: GatewayConfig) -> Result<RunningGateway, BuildError> {
    let bus = EventBus::new();
    let crypto = Arc::new(CryptoService::new(config.crypto.master_key.as_bytes()));
    let monitoring = Arc::new(MonitoringService::new(config.monitoring.db_path));
    let pipeline = Arc::new(Pipeline::new(bus.clone(), crypto, monitoring));

    let schemas: HashMap<String, Arc<FrameSchema>> = config.frame_schemas.into_iter().map(|s| (s.name.clone(), Arc::new(s))).collect();
    for schema in schemas.values() {
        pipeline.register_frame_schema((**schema).clone());
    }
    for rule in config.routing_rules {
        pipeline.register_routing_rule(rule);
    }
    for target in config.target_systems {
        let id = target.id.clone();
        pipeline.register_target_system(target).map_err(|e| {
            warn!(target_id = %id, error = %e, "target registered with a build error; it will fail every forward until fixed");
            BuildError::TargetRegistration(e.to_string())
        }).ok();
    }

    let resolve = |adapter: &str, name: &Option<String>| -> Result<AutoParse, BuildError> {
        match name {
            None => Ok(AutoParse::default()),
            Some(n) => schemas
                .get(n)
                .map(|s| AutoParse { schema: Some(s.clone()) })
                .ok_or_else(|| BuildError::UnknownFrameSchema { adapter: adapter.to_string(), schema: n.clone() }),
        }
    };

    let mut udp = Vec::with_capacity(config.adapters.udp.len());
    for a in config.adapters.udp {
        let auto_parse = resolve(&a.name, &a.auto_parse_schema)?;
        udp.push(Arc::new(UdpAdapter::new(
            UdpAdapterConfig { name: a.name, listen_address: a.listen_address, listen_port: a.listen_port, data_source_id: a.data_source_id, buffer_size: a.buffer_size, auto_parse },
            bus.clone(),
        )));
    }

    let mut tcp = Vec::with_capacity(config.adapters.tcp.len());
    for a in config.adapters.tcp {
        let auto_parse = resolve(&a.name, &a.auto_parse_schema)?;
        let framing = match a.framing.as_str() {
            "fixed_length" => {
                let len = auto_parse.schema.as_ref().and_then(|s| s.total_length).ok_or_else(|| BuildError::UnknownFrameSchema {
                    adapter: a.name.clone(),
                    schema: "fixed_length framing requires a bound schema with total_length".to_string(),
                })?;
                ReaderFraming::FixedLength(len)
            }
            _ => ReaderFraming::Newline,
        };
        tcp.push(Arc::new(TcpAdapter::new(
            TcpAdapterConfig { name: a.name, listen_address: a.listen_address, listen_port: a.listen_port, data_source_id: a.data_source_id, max_connections: a.max_connections, framing, auto_parse },
            bus.clone(),
        )));
    }

    let mut http = Vec::with_capacity(config.adapters.http.len());
    for a in config.adapters.http {
        let auto_parse = resolve(&a.name, &a.auto_parse_schema)?;
        http.push(Arc::new(HttpAdapter::new(
            HttpAdapterConfig {
                name: a.name,
                bind_address: a.bind_address,
                path: a.path,
                method: axum::http::Method::POST,
                data_source_id: a.data_source_id,
                captured_headers: a.captured_headers,
                auto_parse,
            },
            bus.clone(),
        )));
    }

    let mut websocket = Vec::with_capacity(config.adapters.websocket.len());
    for a in config.adapters.websocket {
        let auto_parse = resolve(&a.name, &a.auto_parse_schema)?;
        websocket.push(Arc::new(WebSocketAdapter::new(
            WebSocketAdapterConfig { name: a.name, bind_address: a.bind_address, path: a.path, data_source_id: a.data_source_id, max_connections: a.max_connections, auto_parse },
            bus.clone(),
        )));
    }

    let mut mqtt = Vec::with_capacity(config.adapters.mqtt.len());
    for a in config.adapters.mqtt {
        let auto_parse = resolve(&a.name, &a.auto_parse_schema)?;
        mqtt.push(Arc::new(MqttAdapter::new(
            MqttAdapterConfig {
                name: a.name,
                broker_host: a.broker_host,
                broker_port: a.broker_port,
                client_id: a.client_id,
                data_source_id: a.data_source_id,
                topics: a.topics.into_iter().map(|filter| MqttTopicFilter { filter, qos: rumqttc::QoS::AtLeastOnce }).collect(),
                keepalive_secs: a.keepalive_secs,
                auto_parse,
            },
            bus.clone(),
        )));
    }

    Ok(RunningGateway { bus, pipeline, udp, tcp, http, websocket, mqtt })
}

impl RunningGateway {
    /// Start the pipeline's bus subscriptions, then every configured
    /// adapter. Best-effort: an adapter that fails to bind is logged and
    /// skipped rather than aborting the whole startup, so one misconfigured
    /// listener doesn't take down every other ingress path.
    pub async fn start(&self) {
        self.pipeline.start();
        for adapter in self.all_adapters() {
            if let Err(e) = adapter.start().await {
                error!(adapter = adapter.name(), error = %e, "adapter failed to start");
            } else {
                info!(adapter = adapter.name(), "adapter started");
            }
        }
    }

    /// Reverse `start()`: stop every adapter, unsubscribe the pipeline and
    /// drain its in-flight forward tasks, flush the monitoring db writer,
    /// then close every wired forwarder's connections.
    pub async fn shutdown(&self) {
        for adapter in self.all_adapters() {
            if let Err(e) = adapter.stop().await {
                warn!(adapter = adapter.name(), error = %e, "adapter failed to stop cleanly");
            }
        }
        self.pipeline.stop().await;
        self.pipeline.monitoring().shutdown(DRAIN_TIMEOUT).await;
        self.pipeline.forwarder_manager().close().await;
    }

    fn all_adapters(&self) -> Vec<Arc<dyn Adapter>> {
        let mut all: Vec<Arc<dyn Adapter>> = Vec::new();
        all.extend(self.udp.iter().cloned().map(|a| a as Arc<dyn Adapter>));
        all.extend(self.tcp.iter().cloned().map(|a| a as Arc<dyn Adapter>));
        all.extend(self.http.iter().cloned().map(|a| a as Arc<dyn Adapter>));
        all.extend(self.websocket.iter().cloned().map(|a| a as Arc<dyn Adapter>));
        all.extend(self.mqtt.iter().cloned().map(|a| a as Arc<dyn Adapter>));
        all
    }
}

