use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;
use crate::value::GatewayValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub priority: i32,
    pub is_active: bool,
    pub is_published: bool,
    pub source_config: SourceConfig,
    pub conditions: Vec<Condition>,
    pub logical_operator: LogicalOperator,
    pub targets: Vec<String>,
    #[serde(default)]
    pub match_count: u64,
    #[serde(default)]
    pub last_match_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default)]
    pub source_ids: Vec<String>,
    /// Glob pattern matched against the data source id; `None` matches any.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field_path: String,
    pub operator: Operator,
    pub value: GatewayValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    #[serde(rename = "NOT_IN")]
    NotIn,
    Contains,
    #[serde(rename = "NOT_CONTAINS")]
    NotContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}
