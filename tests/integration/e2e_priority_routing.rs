//! Scenario 2: two active rules match the same envelope at different
//! priorities; the higher-priority rule's targets are dispatched first and
//! both rules' distinct targets are deduplicated into one decision.

use std::sync::Arc;

use gateway_bus::EventBus;
use gateway_core::{MonitoringService, Pipeline};
use gateway_crypto::CryptoService;
use gateway_protocol::{Condition, ForwarderConfig, LogicalOperator, Operator, Protocol, RoutingRule, SourceConfig, TargetSystem};

fn dead_udp_target(id: &str) -> TargetSystem {
    TargetSystem {
        id: id.to_string(),
        protocol: Protocol::Udp,
        target_address: "127.0.0.1".to_string(),
        target_port: Some(1),
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

fn schema() -> gateway_protocol::FrameSchema {
    gateway_protocol::FrameSchema {
        name: "temp-only".to_string(),
        version: 1,
        frame_type: gateway_protocol::FrameType::Fixed,
        total_length: Some(2),
        delimiter: None,
        fields: vec![gateway_protocol::FieldSpec {
            name: "temperature".to_string(),
            offset: 0,
            length: 2,
            data_type: gateway_protocol::DataType::Int16,
            byte_order: gateway_protocol::ByteOrder::Big,
            scale: 0.1,
            offset_value: 0.0,
        }],
        checksum: None,
    }
}

fn pipeline() -> Pipeline {
    let bus = EventBus::new();
    let crypto = Arc::new(CryptoService::new(b"priority routing test key"));
    let monitoring = Arc::new(MonitoringService::new(None));
    Pipeline::new(bus, crypto, monitoring)
}

#[tokio::test]
async fn higher_priority_rule_is_matched_before_lower_priority_rule() {
    let pipeline = pipeline();
    pipeline.register_frame_schema(schema());
    pipeline.register_target_system(dead_udp_target("low-priority-target")).unwrap();
    pipeline.register_target_system(dead_udp_target("high-priority-target")).unwrap();

    pipeline.register_routing_rule(RoutingRule {
        id: "always-over-zero".to_string(),
        priority: 10,
        is_active: true,
        is_published: true,
        source_config: SourceConfig { protocols: vec![Protocol::Udp], source_ids: vec![], pattern: None },
        conditions: vec![Condition { field_path: "parsed_data.temperature".to_string(), operator: Operator::Gt, value: gateway_protocol::GatewayValue::Float(0.0) }],
        logical_operator: LogicalOperator::And,
        targets: vec!["low-priority-target".to_string()],
        match_count: 0,
        last_match_at: None,
    });
    pipeline.register_routing_rule(RoutingRule {
        id: "over-heat".to_string(),
        priority: 100,
        is_active: true,
        is_published: true,
        source_config: SourceConfig { protocols: vec![Protocol::Udp], source_ids: vec![], pattern: None },
        conditions: vec![Condition { field_path: "parsed_data.temperature".to_string(), operator: Operator::Gt, value: gateway_protocol::GatewayValue::Float(35.0) }],
        logical_operator: LogicalOperator::And,
        targets: vec!["high-priority-target".to_string()],
        match_count: 0,
        last_match_at: None,
    });

    // 40.0C, encoded at scale 0.1 -> raw 400.
    let raw = 400i16.to_be_bytes();
    let decision = pipeline.process_message(&raw, "temp-only", Protocol::Udp, "sensor-1").await.unwrap();

    assert_eq!(decision.matched_rules, vec!["over-heat", "always-over-zero"]);
    assert_eq!(decision.target_system_ids, vec!["high-priority-target", "low-priority-target"]);
}
