use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::protocol::Protocol;
use crate::value::GatewayValue;

/// A single ingested message as it flows from adapter through the pipeline.
///
/// Exactly one of `parsed_data`/`parse_error` is set once a bound
/// `FrameSchema` has been applied with `auto_parse`; both are `None` until
/// then.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_protocol: Protocol,
    pub data_source_id: String,
    pub source_address: Option<String>,
    pub source_port: Option<u16>,
    pub raw_data: Vec<u8>,
    pub parsed_data: Option<GatewayValue>,
    pub parse_error: Option<String>,
    pub adapter_name: Option<String>,
    pub connection_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub topic: Option<String>,
    pub qos: Option<u8>,
}

impl Envelope {
    pub fn new(source_protocol: Protocol, data_source_id: impl Into<String>, raw_data: Vec<u8>) -> Self {
        Envelope {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_protocol,
            data_source_id: data_source_id.into(),
            source_address: None,
            source_port: None,
            raw_data,
            parsed_data: None,
            parse_error: None,
            adapter_name: None,
            connection_id: None,
            headers: HashMap::new(),
            topic: None,
            qos: None,
        }
    }

    /// True once frame parsing has run (success or failure), per the
    /// invariant that exactly one of `parsed_data`/`parse_error` is set.
    pub fn is_parsed(&self) -> bool {
        self.parsed_data.is_some() || self.parse_error.is_some()
    }
}
