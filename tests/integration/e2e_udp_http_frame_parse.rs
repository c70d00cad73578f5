//! Scenario 1: a UDP datagram carrying a fixed-layout weather-station
//! frame is auto-parsed at the adapter, routed to an HTTP target, and
//! arrives at that target as JSON.

use std::sync::Arc;
use std::time::Duration;

use gateway_adapters::udp::{UdpAdapter, UdpAdapterConfig};
use gateway_adapters::{Adapter, AutoParse};
use gateway_bus::EventBus;
use gateway_core::{MonitoringService, Pipeline};
use gateway_crypto::CryptoService;
use gateway_protocol::{
    ByteOrder, DataType, FieldSpec, ForwarderConfig, FrameSchema, FrameType, LogicalOperator, Protocol, RoutingRule, SourceConfig,
    TargetSystem,
};
use gateway_test_support::MockHttpTarget;

fn weather_schema() -> FrameSchema {
    FrameSchema {
        name: "weather".to_string(),
        version: 1,
        frame_type: FrameType::Fixed,
        total_length: Some(8),
        delimiter: None,
        fields: vec![
            FieldSpec { name: "header".to_string(), offset: 0, length: 2, data_type: DataType::Uint16, byte_order: ByteOrder::Big, scale: 1.0, offset_value: 0.0 },
            FieldSpec { name: "temperature".to_string(), offset: 2, length: 2, data_type: DataType::Int16, byte_order: ByteOrder::Big, scale: 0.1, offset_value: 0.0 },
            FieldSpec { name: "humidity".to_string(), offset: 4, length: 2, data_type: DataType::Uint16, byte_order: ByteOrder::Big, scale: 0.1, offset_value: 0.0 },
        ],
        checksum: None,
    }
}

fn http_target(id: &str, url: &str) -> TargetSystem {
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
            encryption: None,
        },
        transform_config: None,
        is_active: true,
    }
}

#[tokio::test]
async fn udp_datagram_parses_and_forwards_to_http_target() {
    let mock = MockHttpTarget::start().await;

    let bus = EventBus::new();
    let crypto = Arc::new(CryptoService::new(b"integration test key"));
    let monitoring = Arc::new(MonitoringService::new(None));
    let pipeline = Arc::new(Pipeline::new(bus.clone(), crypto, monitoring));

    pipeline.register_target_system(http_target("t1", &mock.url())).unwrap();
    pipeline.register_routing_rule(RoutingRule {
        id: "r1".to_string(),
        priority: 1,
        is_active: true,
        is_published: true,
        source_config: SourceConfig { protocols: vec![Protocol::Udp], source_ids: vec![], pattern: None },
        conditions: vec![],
        logical_operator: LogicalOperator::And,
        targets: vec!["t1".to_string()],
        match_count: 0,
        last_match_at: None,
    });
    pipeline.start();

    let adapter = UdpAdapter::new(
        UdpAdapterConfig {
            name: "weather-udp".to_string(),
            listen_address: "127.0.0.1".to_string(),
            listen_port: 0,
            data_source_id: "weather-station-1".to_string(),
            buffer_size: 2048,
            auto_parse: AutoParse { schema: Some(Arc::new(weather_schema())) },
        },
        bus,
    );
    adapter.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = [0xAA, 0x55, 0x00, 0xFF, 0x02, 0x5D, 0x00, 0x00];
    client.send_to(&frame, format!("127.0.0.1:{}", adapter.actual_port())).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(mock.request_count(), 1);
    let body = mock.last_json().expect("target received a JSON body");
    assert_eq!(body["parsed_data"]["temperature"], 25.5);
    assert_eq!(body["parsed_data"]["humidity"], 60.5);
    assert_eq!(body["target_id"], "t1");
    assert_eq!(body["data_source_id"], "weather-station-1");

    adapter.stop().await.unwrap();
    pipeline.stop().await;
}
