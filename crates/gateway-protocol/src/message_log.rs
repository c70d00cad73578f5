use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Protocol;
use crate::value::GatewayValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    AwaitingForward,
    NoTarget,
    Success,
    Failed,
    PartialSuccess,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::AwaitingForward => "awaiting_forward",
            ProcessingStatus::NoTarget => "no_target",
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::PartialSuccess => "partial_success",
        }
    }
}

/// One row of the persisted message log. Partitioned by `timestamp`'s
/// calendar month (see `gateway-core::monitoring::log_store`).
#[derive(Debug, Clone)]
pub struct MessageLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message_id: Uuid,
    pub source_protocol: Protocol,
    pub source_id: String,
    pub source_address: Option<String>,
    pub raw_size: usize,
    pub parsed_data: Option<GatewayValue>,
    pub processing_status: ProcessingStatus,
    pub matched_rules: Vec<String>,
    pub target_systems: Vec<String>,
    pub error_message: Option<String>,
}
