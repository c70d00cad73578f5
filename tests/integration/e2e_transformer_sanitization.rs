//! Scenario 6: a parsed frame carrying a raw `BYTES` field at top level and
//! nested inside a list must never reach a target — the transform pipeline
//! strips `raw_data` and every byte-valued field at any depth, in addition
//! to applying field mapping and added constants.

use gateway_core::{payload::envelope_to_payload, transformer::transform};
use gateway_protocol::value::GatewayMap;
use gateway_protocol::{Envelope, GatewayValue, Protocol, TransformConfig};

#[test]
fn raw_data_and_nested_byte_fields_never_survive_the_transform() {
    let mut envelope = Envelope::new(Protocol::Tcp, "badge-reader-1", vec![0xDE, 0xAD, 0xBE, 0xEF]);

    let mut tag = GatewayMap::new();
    tag.insert("uid", GatewayValue::Bytes(vec![1, 2, 3, 4]));
    tag.insert("facility_code", GatewayValue::Int(12));

    let mut parsed = GatewayMap::new();
    parsed.insert("tag", GatewayValue::Map(tag));
    parsed.insert("reads", GatewayValue::List(vec![GatewayValue::Bytes(vec![9, 9]), GatewayValue::Int(1)]));
    envelope.parsed_data = Some(GatewayValue::Map(parsed));

    let payload = envelope_to_payload(&envelope);
    assert_eq!(payload.get_path("raw_data"), Some(&GatewayValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF])));

    let mut config = TransformConfig::default();
    config.field_mapping.insert("parsed_data.tag.facility_code".to_string(), "facility".to_string());
    config.add_fields.insert("gateway_processed".to_string(), GatewayValue::Bool(true));

    let result = transform(&payload, &config);

    assert_eq!(result.get_path("raw_data"), None, "raw_data must be stripped before reaching a target");
    assert_eq!(result.get_path("parsed_data.tag.uid"), None, "nested bytes must be stripped");
    let Some(GatewayValue::List(reads)) = result.get_path("parsed_data.reads") else { panic!("reads list missing") };
    assert_eq!(reads.len(), 1, "the bytes entry in the list must be dropped, leaving only the int");
    assert_eq!(reads[0], GatewayValue::Int(1));

    assert_eq!(result.get_path("facility"), Some(&GatewayValue::Int(12)));
    assert_eq!(result.get_path("parsed_data.tag.facility_code"), None);
    assert_eq!(result.get_path("gateway_processed"), Some(&GatewayValue::Bool(true)));

    // The whole thing must still be representable on the wire.
    let json = result.to_json();
    assert!(json.is_object());
}
