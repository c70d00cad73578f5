//! Target lifecycle registry and delivery dispatch (C8), built on top of
//! the protocol forwarders in `gateway-forwarders` (C7).
//!
//! Ported from `forwarder_manager.py`: `register_target` builds the
//! protocol-specific forwarder from `TargetSystem.forwarder_config` and,
//! on construction failure, records the error against the target id
//! without refusing the registration — the target stays known but
//! unwired, matching §4.6 ("leave the target known-but-not-wired").

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use gateway_crypto::CryptoService;
use gateway_forwarders::{
    Backoff, ForwardResult, ForwardStatus, Forwarder, HttpForwarder, HttpForwarderConfig, MqttForwarder, MqttForwarderConfig, RetryPolicy,
    TcpForwarder, TcpForwarderConfig, UdpForwarder, UdpForwarderConfig, WebSocketForwarder, WebSocketForwarderConfig,
};
use gateway_protocol::{Envelope, GatewayValue, Protocol, TargetSystem};
use tracing::warn;

use crate::payload::envelope_to_payload;
use crate::transformer::transform;

/// The outcome of dispatching one envelope to one target.
#[derive(Debug, Clone)]
pub struct TargetForwardResult {
    pub target_id: String,
    pub result: ForwardResult,
}

struct TargetEntry {
    target: TargetSystem,
    forwarder: Option<Arc<dyn Forwarder>>,
    build_error: Option<String>,
}

pub struct ForwarderManager {
    targets: RwLock<HashMap<String, TargetEntry>>,
    crypto: Arc<CryptoService>,
}

impl ForwarderManager {
    pub fn new(crypto: Arc<CryptoService>) -> Self {
        ForwarderManager { targets: RwLock::new(HashMap::new()), crypto }
    }

    /// Whether `target_id` is a known, active target with a wired
    /// forwarder — the predicate the Pipeline hands to
    /// `RoutingEngine::route_message` so inactive (or never-constructed)
    /// targets never end up in a `RoutingDecision`.
    pub fn is_target_active(&self, target_id: &str) -> bool {
        self.targets.read().expect("targets lock poisoned").get(target_id).is_some_and(|e| e.target.is_active && e.forwarder.is_some())
    }

    /// Build (or rebuild) the forwarder for `target` and register it.
    /// Returns `Err` if forwarder construction failed; the target is still
    /// stored, just without a working forwarder.
    pub fn register_target(&self, target: TargetSystem) -> Result<(), String> {
        let build_result = build_forwarder(&target);
        let (forwarder, build_error) = match build_result {
            Ok(f) => (Some(f), None),
            Err(e) => (None, Some(e)),
        };
        let err = build_error.clone();
        self.targets.write().expect("targets lock poisoned").insert(target.id.clone(), TargetEntry { target, forwarder, build_error });
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn unregister_target(&self, id: &str) {
        let entry = self.targets.write().expect("targets lock poisoned").remove(id);
        if let Some(entry) = entry {
            if let Some(forwarder) = entry.forwarder {
                forwarder.close().await;
            }
        }
    }

    /// Close every wired forwarder's connection, leaving targets
    /// registered. Called by the process owner on shutdown, after the
    /// Pipeline has stopped accepting new ingress.
    pub async fn close(&self) {
        let forwarders: Vec<Arc<dyn Forwarder>> = {
            let targets = self.targets.read().expect("targets lock poisoned");
            targets.values().filter_map(|e| e.forwarder.clone()).collect()
        };
        for forwarder in forwarders {
            forwarder.close().await;
        }
    }

    /// The last recorded forwarder-construction error for `target_id`, if any.
    pub fn target_build_error(&self, target_id: &str) -> Option<String> {
        self.targets.read().expect("targets lock poisoned").get(target_id).and_then(|e| e.build_error.clone())
    }

    /// Fan out `envelope` to every id in `target_ids` in parallel;
    /// per-target failures are independent and never affect siblings.
    pub async fn forward(&self, envelope: &Envelope, target_ids: &[String]) -> Vec<TargetForwardResult> {
        let payload = envelope_to_payload(envelope);
        let futures = target_ids.iter().map(|target_id| self.forward_one(target_id, &payload));
        futures_util::future::join_all(futures).await
    }

    async fn forward_one(&self, target_id: &str, payload: &GatewayValue) -> TargetForwardResult {
        let (target, forwarder) = {
            let targets = self.targets.read().expect("targets lock poisoned");
            match targets.get(target_id) {
                Some(entry) if entry.target.is_active => (entry.target.clone(), entry.forwarder.clone()),
                Some(_) => {
                    return TargetForwardResult { target_id: target_id.to_string(), result: failed_result("target is inactive") };
                }
                None => {
                    return TargetForwardResult { target_id: target_id.to_string(), result: failed_result("unknown target") };
                }
            }
        };

        let Some(forwarder) = forwarder else {
            return TargetForwardResult { target_id: target_id.to_string(), result: failed_result("forwarder failed to construct") };
        };

        let mut value = payload.clone();
        if let Some(transform_config) = &target.transform_config {
            value = transform(&value, transform_config);
        } else {
            crate::transformer::sanitize(&mut value);
        }
        value.set_path("target_id", GatewayValue::String(target.id.clone()));

        let already_encrypted = value.get_path("encrypted_payload").is_some();
        let encryption_enabled = target.forwarder_config.encryption.as_ref().is_some_and(|e| e.enabled);
        if encryption_enabled && !already_encrypted {
            match self.crypto.wrap_payload(&value) {
                Ok(wrapped) => {
                    value = encrypted_envelope_value(wrapped);
                }
                Err(e) => {
                    return TargetForwardResult { target_id: target_id.to_string(), result: failed_result(&format!("encryption failed: {e}")) };
                }
            }
        }

        let body = serde_json::to_vec(&value.to_json()).unwrap_or_default();
        let result = forwarder.forward(&body).await;
        TargetForwardResult { target_id: target_id.to_string(), result }
    }
}

fn failed_result(message: &str) -> ForwardResult {
    ForwardResult { status: ForwardStatus::Failed, status_code: None, duration_ms: 0, retry_count: 0, error: Some(message.to_string()) }
}

fn encrypted_envelope_value(wrapped: gateway_crypto::EncryptedPayload) -> GatewayValue {
    let payload_json = serde_json::to_value(&wrapped).expect("EncryptedPayload always serializes");
    let encrypted_payload = GatewayValue::from_json(&payload_json);
    let mut envelope = gateway_protocol::value::GatewayMap::new();
    envelope.insert("encrypted_payload", encrypted_payload);
    let mut encryption = gateway_protocol::value::GatewayMap::new();
    encryption.insert("algorithm", GatewayValue::String(wrapped.algorithm));
    encryption.insert("version", GatewayValue::String("1".to_string()));
    envelope.insert("encryption", GatewayValue::Map(encryption));
    GatewayValue::Map(envelope)
}

fn retry_policy(target: &TargetSystem) -> RetryPolicy {
    RetryPolicy {
        retry_count: target.forwarder_config.retry_count,
        retry_delay: Duration::from_secs_f64(target.forwarder_config.retry_delay_secs),
        backoff: Backoff::Fixed,
    }
}

fn build_forwarder(target: &TargetSystem) -> Result<Arc<dyn Forwarder>, String> {
    match target.protocol {
        Protocol::Http => build_http(target).map(|f| Arc::new(f) as Arc<dyn Forwarder>),
        Protocol::Tcp => build_tcp(target).map(|f| Arc::new(f) as Arc<dyn Forwarder>),
        Protocol::Udp => build_udp(target).map(|f| Arc::new(f) as Arc<dyn Forwarder>),
        Protocol::WebSocket => build_websocket(target).map(|f| Arc::new(f) as Arc<dyn Forwarder>),
        Protocol::Mqtt => build_mqtt(target).map(|f| Arc::new(f) as Arc<dyn Forwarder>),
    }
}

fn build_http(target: &TargetSystem) -> Result<HttpForwarder, String> {
    let scheme = if target.use_ssl { "https" } else { "http" };
    let path = target.endpoint_path.clone().unwrap_or_default();
    let port_part = target.target_port.map(|p| format!(":{p}")).unwrap_or_default();
    let url = format!("{scheme}://{}{port_part}{path}", target.target_address);
    let method = target
        .forwarder_config
        .http_method
        .as_deref()
        .map(|m| m.parse().unwrap_or(reqwest::Method::POST))
        .unwrap_or(reqwest::Method::POST);
    HttpForwarder::new(HttpForwarderConfig {
        url,
        method,
        timeout: Duration::from_secs_f64(target.forwarder_config.timeout_secs),
        verify_ssl: target.forwarder_config.verify_ssl.unwrap_or(true),
        auth: target.auth_config.clone(),
        retry_policy: retry_policy(target),
    })
    .map_err(|e| e.to_string())
}

fn build_tcp(target: &TargetSystem) -> Result<TcpForwarder, String> {
    let port = target.target_port.ok_or("tcp target requires target_port")?;
    TcpForwarder::new(TcpForwarderConfig {
        address: target.target_address.clone(),
        port,
        keep_alive: target.forwarder_config.keep_alive.unwrap_or(true),
        newline: target.forwarder_config.newline.clone().unwrap_or_else(|| "\n".to_string()).into_bytes(),
        connect_timeout: Duration::from_secs_f64(target.forwarder_config.timeout_secs),
        retry_policy: retry_policy(target),
    })
    .map_err(|e| e.to_string())
}

fn build_udp(target: &TargetSystem) -> Result<UdpForwarder, String> {
    let port = target.target_port.ok_or("udp target requires target_port")?;
    UdpForwarder::new(UdpForwarderConfig { address: target.target_address.clone(), port, retry_policy: retry_policy(target) })
        .map_err(|e| e.to_string())
}

fn build_websocket(target: &TargetSystem) -> Result<WebSocketForwarder, String> {
    let scheme = if target.use_ssl { "wss" } else { "ws" };
    let path = target.endpoint_path.clone().unwrap_or_default();
    let port_part = target.target_port.map(|p| format!(":{p}")).unwrap_or_default();
    let url = format!("{scheme}://{}{port_part}{path}", target.target_address);
    WebSocketForwarder::new(WebSocketForwarderConfig {
        url,
        ping_interval: Duration::from_secs_f64(target.forwarder_config.ping_interval_secs.unwrap_or(30.0)),
        ping_timeout: Duration::from_secs_f64(target.forwarder_config.ping_timeout_secs.unwrap_or(10.0)),
        retry_policy: retry_policy(target),
    })
    .map_err(|e| e.to_string())
}

fn build_mqtt(target: &TargetSystem) -> Result<MqttForwarder, String> {
    let port = target.target_port.unwrap_or(1883);
    let topic_template = target.forwarder_config.mqtt_topic.clone().ok_or("mqtt target requires mqtt_topic")?;
    let topic = gateway_forwarders::mqtt::render_topic_template(&topic_template, "", &target.id, "");
    let qos = match target.forwarder_config.mqtt_qos.unwrap_or(0) {
        1 => rumqttc::QoS::AtLeastOnce,
        2 => rumqttc::QoS::ExactlyOnce,
        _ => rumqttc::QoS::AtMostOnce,
    };
    MqttForwarder::new(MqttForwarderConfig {
        broker_host: target.target_address.clone(),
        broker_port: port,
        client_id: format!("gateway-forwarder-{}", target.id),
        topic,
        qos,
        retain: target.forwarder_config.mqtt_retain.unwrap_or(false),
        keepalive: Duration::from_secs(target.forwarder_config.mqtt_keepalive_secs.unwrap_or(30)),
        retry_policy: retry_policy(target),
    })
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::{ForwarderConfig, Protocol};

    fn base_target(id: &str, protocol: Protocol) -> TargetSystem {
        TargetSystem {
            id: id.to_string(),
            protocol,
            target_address: "127.0.0.1".to_string(),
            target_port: Some(9),
            endpoint_path: None,
            use_ssl: false,
            auth_config: None,
            forwarder_config: ForwarderConfig {
                timeout_secs: 1.0,
                retry_count: 0,
                retry_delay_secs: 0.0,
                batch_size: None,
                verify_ssl: None,
                keep_alive: None,
                newline: None,
                buffer_size: None,
                ping_interval_secs: None,
                ping_timeout_secs: None,
                close_timeout_secs: None,
                mqtt_qos: None,
                mqtt_retain: None,
                mqtt_keepalive_secs: None,
                mqtt_topic: None,
                http_method: None,
                encryption: None,
            },
            transform_config: None,
            is_active: true,
        }
    }

    #[test]
    fn registering_target_without_required_config_records_build_error() {
        let crypto = Arc::new(CryptoService::new(b"test key"));
        let manager = ForwarderManager::new(crypto);
        let mut target = base_target("t1", Protocol::Mqtt);
        target.forwarder_config.mqtt_topic = None;
        let result = manager.register_target(target);
        assert!(result.is_err());
        assert!(!manager.is_target_active("t1"));
    }

    #[test]
    fn registered_target_is_reported_active() {
        let crypto = Arc::new(CryptoService::new(b"test key"));
        let manager = ForwarderManager::new(crypto);
        manager.register_target(base_target("t1", Protocol::Udp)).unwrap();
        assert!(manager.is_target_active("t1"));
    }

    #[tokio::test]
    async fn forwarding_to_unknown_target_yields_failed_without_panicking() {
        let crypto = Arc::new(CryptoService::new(b"test key"));
        let manager = ForwarderManager::new(crypto);
        let envelope = Envelope::new(Protocol::Udp, "src-1", vec![1]);
        let results = manager.forward(&envelope, &["missing".to_string()]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result.status, ForwardStatus::Failed);
    }
}
