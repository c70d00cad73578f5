use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::Protocol;
use crate::value::GatewayValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSystem {
    pub id: String,
    pub protocol: Protocol,
    pub target_address: String,
    pub target_port: Option<u16>,
    #[serde(default)]
    pub endpoint_path: Option<String>,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub auth_config: Option<AuthConfig>,
    pub forwarder_config: ForwarderConfig,
    #[serde(default)]
    pub transform_config: Option<TransformConfig>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub auth_type: AuthType,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Basic,
    Bearer,
    ApiKey,
    Custom,
}

/// Per-protocol forwarder knobs plus the common retry/encryption settings.
///
/// Defaults mirror `forwarder_manager.py`'s `_build_*_forwarder_config`
/// fallback chains: `timeout` 30s, `retry_count` 3, `retry_delay` 1.0s
/// unless a protocol overrides them below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub verify_ssl: Option<bool>,
    #[serde(default)]
    pub keep_alive: Option<bool>,
    #[serde(default)]
    pub newline: Option<String>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub ping_interval_secs: Option<f64>,
    #[serde(default)]
    pub ping_timeout_secs: Option<f64>,
    #[serde(default)]
    pub close_timeout_secs: Option<f64>,
    #[serde(default)]
    pub mqtt_qos: Option<u8>,
    #[serde(default)]
    pub mqtt_retain: Option<bool>,
    #[serde(default)]
    pub mqtt_keepalive_secs: Option<u64>,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub encryption: Option<EncryptionRef>,
}

fn default_timeout() -> f64 {
    30.0
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionRef {
    pub enabled: bool,
    #[serde(default)]
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub field_mapping: HashMap<String, String>,
    #[serde(default)]
    pub remove_fields: Vec<String>,
    #[serde(default)]
    pub add_fields: HashMap<String, GatewayValue>,
    #[serde(default)]
    pub flatten_parsed_data: bool,
}
