//! Builds the per-target wire payload from an [`Envelope`] before the
//! Transformer and Crypto Service see it. The Python original built this
//! dict ad hoc inside `forwarder_manager.py::_prepare_payload`; here it's
//! one explicit function so `gateway-core::transformer` and
//! `gateway-core::forwarder_manager` agree on the shape.

use gateway_protocol::value::GatewayMap;
use gateway_protocol::{Envelope, GatewayValue};

/// Project an envelope into a `GatewayValue::Map` root, one key per
/// envelope field. `raw_data` is included (as `Bytes`) so the
/// Transformer's sanitize pass has something to strip — forwarders never
/// see a payload still carrying it.
pub fn envelope_to_payload(envelope: &Envelope) -> GatewayValue {
    let mut map = GatewayMap::new();
    map.insert("message_id", GatewayValue::String(envelope.message_id.to_string()));
    map.insert("timestamp", GatewayValue::String(envelope.timestamp.to_rfc3339()));
    map.insert("source_protocol", GatewayValue::String(envelope.source_protocol.to_string()));
    map.insert("data_source_id", GatewayValue::String(envelope.data_source_id.clone()));
    if let Some(addr) = &envelope.source_address {
        map.insert("source_address", GatewayValue::String(addr.clone()));
    }
    if let Some(port) = envelope.source_port {
        map.insert("source_port", GatewayValue::Int(port as i64));
    }
    map.insert("raw_data", GatewayValue::Bytes(envelope.raw_data.clone()));
    if let Some(parsed) = &envelope.parsed_data {
        map.insert("parsed_data", parsed.clone());
    }
    if let Some(err) = &envelope.parse_error {
        map.insert("parse_error", GatewayValue::String(err.clone()));
    }
    if let Some(topic) = &envelope.topic {
        map.insert("topic", GatewayValue::String(topic.clone()));
    }
    if let Some(qos) = envelope.qos {
        map.insert("qos", GatewayValue::Int(qos as i64));
    }
    GatewayValue::Map(map)
}
