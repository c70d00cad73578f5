//! Pipeline orchestration (C9) plus the routing/transform/forward/monitor
//! machinery it wires together (C5, C6, C8, C10).
//!
//! `Pipeline` is the construction entry point the Design Notes call for in
//! place of the Python original's module-level singletons: a caller builds
//! an `EventBus`, a `CryptoService`, hands them to `Pipeline::new`, then
//! registers `FrameSchema`/`RoutingRule`/`TargetSystem` records before
//! calling `start()`. Nothing here reaches for global mutable state.

pub mod forwarder_manager;
pub mod monitoring;
pub mod payload;
pub mod routing;
pub mod transformer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use gateway_bus::EventBus;
use gateway_crypto::CryptoService;
use gateway_protocol::value::GatewayMap;
use gateway_protocol::{Envelope, FrameSchema, GatewayValue, Protocol, RoutingRule, TargetSystem};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Bound on how long `stop()` waits for in-flight forward tasks to finish
/// before aborting the remainder, per spec.md §5's "bounded drain window
/// (implementation choice, conventionally 5 seconds)".
const FORWARD_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub use forwarder_manager::{ForwarderManager, TargetForwardResult};
pub use monitoring::{MinuteMetrics, MonitoringService, RuntimeMetrics};
pub use routing::{resolve_envelope_path, RoutingDecision, RoutingEngine};

const PROTOCOL_TOPICS: [Protocol; 5] = [Protocol::Udp, Protocol::Tcp, Protocol::Http, Protocol::WebSocket, Protocol::Mqtt];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("target registration failed: {0}")]
    TargetRegistration(String),
}

/// Orchestrates the pipeline: subscribes to every protocol `_RECEIVED`
/// topic, normalizes the envelope, routes it, dispatches forwarding, and
/// records the outcome with the Monitoring Service.
///
/// Construction is explicit dependency injection (`new` takes the bus and
/// crypto service as arguments) rather than reaching for a process-wide
/// singleton, per the Design Notes' "replace global singletons with
/// explicit dependencies" guidance.
pub struct Pipeline {
    bus: EventBus,
    routing: RoutingEngine,
    forwarder_manager: Arc<ForwarderManager>,
    monitoring: Arc<MonitoringService>,
    crypto: Arc<CryptoService>,
    frame_schemas: RwLock<HashMap<String, Arc<FrameSchema>>>,
    subscriptions: Mutex<Vec<u64>>,
    running: AtomicBool,
    /// Forward tasks spawned by `handle_ingress`, tracked (instead of a bare
    /// detached `tokio::spawn`) so `stop()` can drain them within a bounded
    /// window rather than silently dropping in-flight forwards at shutdown.
    forward_tasks: Mutex<JoinSet<()>>,
}

impl Pipeline {
    pub fn new(bus: EventBus, crypto: Arc<CryptoService>, monitoring: Arc<MonitoringService>) -> Self {
        Pipeline {
            forwarder_manager: Arc::new(ForwarderManager::new(crypto.clone())),
            bus,
            routing: RoutingEngine::new(),
            monitoring,
            crypto,
            frame_schemas: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            forward_tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn forwarder_manager(&self) -> &Arc<ForwarderManager> {
        &self.forwarder_manager
    }

    pub fn routing_engine(&self) -> &RoutingEngine {
        &self.routing
    }

    pub fn monitoring(&self) -> &Arc<MonitoringService> {
        &self.monitoring
    }

    /// Subscribe one handler per `*_RECEIVED` topic. Idempotent: a second
    /// `start()` on an already-running pipeline is a no-op, matching
    /// spec.md §4.7 ("Pipeline start is idempotent; concurrent starts are
    /// coalesced").
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("pipeline already running");
            return;
        }

        let mut subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");
        for protocol in PROTOCOL_TOPICS {
            let pipeline = Arc::clone(self);
            let id = self.bus.subscribe(
                protocol.received_topic(),
                Arc::new(move |envelope: &Envelope, topic: &str, source: &str| {
                    pipeline.handle_ingress(envelope, topic, source);
                }),
            );
            subscriptions.push(id);
        }
        info!("pipeline started");
    }

    /// Reverse `start()`: unsubscribe every topic handler, then wait for
    /// in-flight forward tasks to drain within [`FORWARD_DRAIN_TIMEOUT`]
    /// before returning. Does not close registered forwarders — callers
    /// that also want that call [`ForwarderManager::close`] via
    /// [`Pipeline::forwarder_manager`] explicitly, since shutdown ordering
    /// (drain in-flight sends before closing connections) is a
    /// process-level concern outside the Pipeline's own state.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");
            for id in subscriptions.drain(..) {
                self.bus.unsubscribe(id);
            }
        }
        self.drain_forward_tasks(FORWARD_DRAIN_TIMEOUT).await;
        info!("pipeline stopped");
    }

    /// Wait up to `timeout` for every tracked forward task to finish,
    /// aborting whatever is left once the window expires — tracked
    /// cancellation with a bounded drain, not a detached fire-and-forget
    /// `tokio::spawn`.
    async fn drain_forward_tasks(&self, timeout: Duration) {
        let mut tasks = {
            let mut guard = self.forward_tasks.lock().expect("forward tasks lock poisoned");
            std::mem::replace(&mut *guard, JoinSet::new())
        };
        if tasks.is_empty() {
            return;
        }
        let pending = tasks.len();
        let drained = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(pending, "forward tasks did not drain within the shutdown window; aborting remainder");
            tasks.abort_all();
        }
    }

    pub fn register_frame_schema(&self, schema: FrameSchema) {
        self.frame_schemas.write().expect("frame schemas lock poisoned").insert(schema.name.clone(), Arc::new(schema));
    }

    pub fn unregister_frame_schema(&self, name: &str) {
        self.frame_schemas.write().expect("frame schemas lock poisoned").remove(name);
    }

    pub fn register_routing_rule(&self, rule: RoutingRule) {
        self.routing.register_rule(rule);
    }

    pub fn unregister_routing_rule(&self, id: &str) {
        self.routing.unregister_rule(id);
    }

    pub fn register_target_system(&self, target: TargetSystem) -> Result<(), PipelineError> {
        self.forwarder_manager.register_target(target).map_err(PipelineError::TargetRegistration)
    }

    pub async fn unregister_target_system(&self, id: &str) {
        self.forwarder_manager.unregister_target(id).await;
    }

    /// Normalize an ingress envelope the way `_process_protocol_message`
    /// does: decrypt an inline `encrypted_payload`, best-effort UTF-8/JSON
    /// decode into `parsed_data` when parsing hasn't already produced one,
    /// then hand off to routing and monitoring.
    fn handle_ingress(&self, envelope: &Envelope, topic: &str, source: &str) {
        let mut envelope = envelope.clone();
        self.normalize(&mut envelope);

        let decision = self.routing.route_message(&envelope, |id| self.forwarder_manager.is_target_active(id));
        self.monitoring.record_routing_decision(&envelope, &decision.matched_rules, &decision.target_system_ids);

        info!(topic, source, matched_rules = decision.matched_rules.len(), targets = decision.target_system_ids.len(), "routing decided");

        if decision.target_system_ids.is_empty() {
            return;
        }

        let pipeline_forwarder = Arc::clone(&self.forwarder_manager);
        let pipeline_monitoring = Arc::clone(&self.monitoring);
        let target_ids = decision.target_system_ids.clone();
        let mut tasks = self.forward_tasks.lock().expect("forward tasks lock poisoned");
        tasks.spawn(async move {
            let results = pipeline_forwarder.forward(&envelope, &target_ids).await;
            pipeline_monitoring.record_forward_results(&envelope, &results);
        });
    }

    /// Decrypt an inline `encrypted_payload`, decode `raw_data`, and
    /// best-effort JSON-parse it into `parsed_data` when auto-parse hasn't
    /// already populated one. Mutates `envelope` in place.
    pub fn normalize(&self, envelope: &mut Envelope) {
        if let Some(parsed) = &envelope.parsed_data {
            if let Some(encrypted) = parsed.get_path("encrypted_payload") {
                match decode_encrypted_payload(encrypted).and_then(|p| self.crypto.unwrap_payload(&p).map_err(|e| e.to_string())) {
                    Ok(plaintext) => envelope.parsed_data = Some(plaintext),
                    Err(e) => {
                        let mut map = GatewayMap::new();
                        map.insert("decryption_error", GatewayValue::String(e));
                        envelope.parsed_data = Some(GatewayValue::Map(map));
                    }
                }
            }
        }

        if envelope.parsed_data.is_none() && envelope.parse_error.is_none() && !envelope.raw_data.is_empty() {
            if let Ok(text) = std::str::from_utf8(&envelope.raw_data) {
                match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(json) => envelope.parsed_data = Some(GatewayValue::from_json(&json)),
                    Err(_) => {
                        let mut map = GatewayMap::new();
                        map.insert("raw_text", GatewayValue::String(text.to_string()));
                        envelope.parsed_data = Some(GatewayValue::Map(map));
                    }
                }
            }
        }
    }

    /// Synchronous single-shot entry point used by tests (and any
    /// manual-invocation caller): parse `raw_data` against `schema`, route,
    /// forward, and record monitoring — a direct analog of the Python
    /// `DataPipeline.process_message` used outside the bus-driven path.
    pub async fn process_message(&self, raw_data: &[u8], schema_name: &str, source_protocol: Protocol, data_source_id: &str) -> Result<RoutingDecision, String> {
        let schema = self.frame_schemas.read().expect("frame schemas lock poisoned").get(schema_name).cloned().ok_or_else(|| format!("frame schema '{schema_name}' not found"))?;

        let mut envelope = Envelope::new(source_protocol, data_source_id, raw_data.to_vec());
        match frame_parser::parse_frame(&schema, raw_data) {
            Ok(parsed) => envelope.parsed_data = Some(parsed),
            Err(e) => envelope.parse_error = Some(e.to_string()),
        }
        self.normalize(&mut envelope);

        let decision = self.routing.route_message(&envelope, |id| self.forwarder_manager.is_target_active(id));
        self.monitoring.record_routing_decision(&envelope, &decision.matched_rules, &decision.target_system_ids);

        if !decision.target_system_ids.is_empty() {
            let results = self.forwarder_manager.forward(&envelope, &decision.target_system_ids).await;
            self.monitoring.record_forward_results(&envelope, &results);
        }

        Ok(decision)
    }
}

fn decode_encrypted_payload(value: &GatewayValue) -> Result<gateway_crypto::EncryptedPayload, String> {
    serde_json::from_value(value.to_json()).map_err(|e| format!("malformed encrypted_payload: {e}"))
}
