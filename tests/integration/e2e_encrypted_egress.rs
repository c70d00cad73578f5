//! Scenario 5: a target with `forwarder_config.encryption.enabled = true`
//! receives an envelope-encrypted wire body instead of plaintext JSON, and
//! the same crypto service that produced it can unwrap it back to the
//! original payload.

use std::sync::Arc;

use gateway_core::ForwarderManager;
use gateway_crypto::CryptoService;
use gateway_protocol::{Envelope, EncryptionRef, ForwarderConfig, Protocol, TargetSystem};
use gateway_test_support::MockHttpTarget;

fn encrypted_http_target(id: &str, url: &str) -> TargetSystem {
    let parsed = url.trim_start_matches("http://");
    let (address, port) = parsed.split_once(':').expect("mock target url has a port");
    TargetSystem {
        id: id.to_string(),
        protocol: Protocol::Http,
        target_address: address.to_string(),
        target_port: Some(port.parse().unwrap()),
        endpoint_path: None,
        use_ssl: false,
        auth_config: None,
        forwarder_config: ForwarderConfig {
            timeout_secs: 2.0,
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
            encryption: Some(EncryptionRef { enabled: true, key_id: None }),
        },
        transform_config: None,
        is_active: true,
    }
}

#[tokio::test]
async fn encrypted_target_receives_a_sealed_envelope_decryptable_by_the_same_service() {
    let mock = MockHttpTarget::start().await;

    let crypto = Arc::new(CryptoService::new(b"encrypted egress test key"));
    let manager = ForwarderManager::new(crypto.clone());
    manager.register_target(encrypted_http_target("secure-target", &mock.url())).unwrap();

    let mut envelope = Envelope::new(Protocol::Udp, "sensor-1", br#"{"reading": 42.0}"#.to_vec());
    let mut parsed = gateway_protocol::value::GatewayMap::new();
    parsed.insert("reading", gateway_protocol::GatewayValue::Float(42.0));
    envelope.parsed_data = Some(gateway_protocol::GatewayValue::Map(parsed));

    let results = manager.forward(&envelope, &["secure-target".to_string()]).await;
    assert_eq!(results[0].result.status, gateway_forwarders::ForwardStatus::Success);

    let body = mock.received_bodies().into_iter().next().expect("one request received");
    let wire: serde_json::Value = serde_json::from_slice(&body).unwrap();

    // The wire body carries an encrypted envelope, not plaintext.
    assert!(wire.get("encrypted_payload").is_some());
    assert!(wire["parsed_data"].is_null(), "plaintext parsed_data must not appear on the wire");

    let encrypted_payload = wire["encrypted_payload"].clone();
    let payload: gateway_crypto::EncryptedPayload = serde_json::from_value(encrypted_payload).unwrap();
    let unwrapped = crypto.unwrap_payload(&payload).unwrap();

    assert_eq!(unwrapped.get_path("parsed_data.reading").and_then(gateway_protocol::GatewayValue::as_f64), Some(42.0));
    assert_eq!(unwrapped.get_path("target_id"), Some(&gateway_protocol::GatewayValue::String("secure-target".to_string())));
}
