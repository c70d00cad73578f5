//! Scenario 3: an envelope that satisfies no active rule's conditions
//! yields an empty routing decision and is never forwarded anywhere.

use std::sync::Arc;

use gateway_bus::EventBus;
use gateway_core::{MonitoringService, Pipeline};
use gateway_crypto::CryptoService;
use gateway_protocol::{
    ByteOrder, Condition, DataType, FieldSpec, FrameSchema, FrameType, LogicalOperator, Operator, Protocol, RoutingRule, SourceConfig,
};

fn schema() -> FrameSchema {
    FrameSchema {
        name: "temp-only".to_string(),
        version: 1,
        frame_type: FrameType::Fixed,
        total_length: Some(2),
        delimiter: None,
        fields: vec![FieldSpec {
            name: "temperature".to_string(),
            offset: 0,
            length: 2,
            data_type: DataType::Int16,
            byte_order: ByteOrder::Big,
            scale: 0.1,
            offset_value: 0.0,
        }],
        checksum: None,
    }
}

#[tokio::test]
async fn below_threshold_reading_matches_no_rule() {
    let bus = EventBus::new();
    let crypto = Arc::new(CryptoService::new(b"no match test key"));
    let monitoring = Arc::new(MonitoringService::new(None));
    let pipeline = Pipeline::new(bus, crypto, monitoring.clone());

    pipeline.register_frame_schema(schema());
    pipeline.register_routing_rule(RoutingRule {
        id: "over-heat".to_string(),
        priority: 100,
        is_active: true,
        is_published: true,
        source_config: SourceConfig { protocols: vec![Protocol::Udp], source_ids: vec![], pattern: None },
        conditions: vec![Condition {
            field_path: "parsed_data.temperature".to_string(),
            operator: Operator::Gt,
            value: gateway_protocol::GatewayValue::Float(35.0),
        }],
        logical_operator: LogicalOperator::And,
        targets: vec!["unreachable-target".to_string()],
        match_count: 0,
        last_match_at: None,
    });

    // 10.0C, encoded at scale 0.1 -> raw 100, well under the 35.0 threshold.
    let raw = 100i16.to_be_bytes();
    let decision = pipeline.process_message(&raw, "temp-only", Protocol::Udp, "sensor-1").await.unwrap();

    assert!(decision.matched_rules.is_empty());
    assert!(decision.target_system_ids.is_empty());

    let metrics = monitoring.get_runtime_metrics();
    assert_eq!(metrics.received_in_window, 1);
}

#[tokio::test]
async fn unpublished_rule_never_matches_even_when_conditions_would_pass() {
    let bus = EventBus::new();
    let crypto = Arc::new(CryptoService::new(b"no match test key 2"));
    let monitoring = Arc::new(MonitoringService::new(None));
    let pipeline = Pipeline::new(bus, crypto, monitoring);

    pipeline.register_frame_schema(schema());
    pipeline.register_routing_rule(RoutingRule {
        id: "draft-rule".to_string(),
        priority: 1,
        is_active: true,
        is_published: false,
        source_config: SourceConfig { protocols: vec![Protocol::Udp], source_ids: vec![], pattern: None },
        conditions: vec![],
        logical_operator: LogicalOperator::And,
        targets: vec!["some-target".to_string()],
        match_count: 0,
        last_match_at: None,
    });

    let raw = 400i16.to_be_bytes();
    let decision = pipeline.process_message(&raw, "temp-only", Protocol::Udp, "sensor-1").await.unwrap();
    assert!(decision.matched_rules.is_empty());
}
