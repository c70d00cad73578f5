//! Composite scenario exercising the whole path: a UDP datagram is
//! received by a real adapter, auto-parsed against a bound frame schema,
//! routed by priority rule, transformed, envelope-encrypted, and forwarded
//! to a live HTTP target — with the Monitoring Service's rolling metrics
//! reflecting the outcome throughout.

use std::sync::Arc;
use std::time::Duration;

use gateway_adapters::udp::{UdpAdapter, UdpAdapterConfig};
use gateway_adapters::{Adapter, AutoParse};
use gateway_bus::EventBus;
use gateway_core::{MonitoringService, Pipeline};
use gateway_crypto::CryptoService;
use gateway_protocol::{
    ByteOrder, DataType, EncryptionRef, FieldSpec, ForwarderConfig, FrameSchema, FrameType, LogicalOperator, Protocol, RoutingRule,
    SourceConfig, TargetSystem, TransformConfig,
};
use gateway_test_support::MockHttpTarget;

fn badge_schema() -> FrameSchema {
    FrameSchema {
        name: "badge-read".to_string(),
        version: 1,
        frame_type: FrameType::Fixed,
        total_length: Some(4),
        delimiter: None,
        fields: vec![FieldSpec {
            name: "badge_id".to_string(),
            offset: 0,
            length: 4,
            data_type: DataType::Uint32,
            byte_order: ByteOrder::Big,
            scale: 1.0,
            offset_value: 0.0,
        }],
        checksum: None,
    }
}

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
            retry_count: 1,
            retry_delay_secs: 0.01,
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
        transform_config: Some(TransformConfig { flatten_parsed_data: true, ..Default::default() }),
        is_active: true,
    }
}

#[tokio::test]
async fn udp_ingress_flows_through_routing_transform_encryption_and_http_egress() {
    let mock = MockHttpTarget::start().await;

    let bus = EventBus::new();
    let crypto = Arc::new(CryptoService::new(b"full pipeline test key"));
    let monitoring = Arc::new(MonitoringService::new(None));
    let pipeline = Arc::new(Pipeline::new(bus.clone(), crypto.clone(), monitoring.clone()));

    pipeline.register_target_system(encrypted_http_target("access-control", &mock.url())).unwrap();
    pipeline.register_routing_rule(RoutingRule {
        id: "all-badge-reads".to_string(),
        priority: 1,
        is_active: true,
        is_published: true,
        source_config: SourceConfig { protocols: vec![Protocol::Udp], source_ids: vec![], pattern: None },
        conditions: vec![],
        logical_operator: LogicalOperator::And,
        targets: vec!["access-control".to_string()],
        match_count: 0,
        last_match_at: None,
    });
    pipeline.start();

    let adapter = UdpAdapter::new(
        UdpAdapterConfig {
            name: "badge-reader-udp".to_string(),
            listen_address: "127.0.0.1".to_string(),
            listen_port: 0,
            data_source_id: "entrance-1".to_string(),
            buffer_size: 512,
            auto_parse: AutoParse { schema: Some(Arc::new(badge_schema())) },
        },
        bus,
    );
    adapter.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&42u32.to_be_bytes(), format!("127.0.0.1:{}", adapter.actual_port())).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(mock.request_count(), 1, "exactly one forward should have reached the target");
    let body = mock.received_bodies().into_iter().next().unwrap();
    let wire: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let encrypted: gateway_crypto::EncryptedPayload = serde_json::from_value(wire["encrypted_payload"].clone()).unwrap();
    let plaintext = crypto.unwrap_payload(&encrypted).unwrap();

    assert_eq!(plaintext.get_path("badge_id").and_then(gateway_protocol::GatewayValue::as_f64), Some(42.0));
    assert_eq!(plaintext.get_path("raw_data"), None, "sanitize must strip raw_data before encryption");
    assert_eq!(
        plaintext.get_path("target_id"),
        Some(&gateway_protocol::GatewayValue::String("access-control".to_string()))
    );

    let metrics = monitoring.get_runtime_metrics();
    assert_eq!(metrics.received_in_window, 1);
    assert_eq!(metrics.failed_in_window, 0);

    adapter.stop().await.unwrap();
    pipeline.stop().await;
    pipeline.forwarder_manager().close().await;
}
