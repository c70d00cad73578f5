//! Gateway process configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides,
//! matching `forwarder::config`'s convention. Default config path:
//! `/etc/protocol-gateway/gateway.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `crypto.master_key_file`
//!
//! Frame schemas, routing rules, and target systems deserialize straight
//! into `gateway_protocol`'s own DTOs (`[[frame_schemas]]`, `[[routing_rules]]`,
//! `[[target_systems]]`) since those types already carry `#[serde(default)]`
//! on every optional field — the raw/validated split below is reserved for
//! the process-level sections those DTOs don't cover (adapter binds,
//! monitoring sink, master key file).
//!
//! # Master key file format
//! Raw key material on a single line; trimmed on read, then normalized to
//! 32 bytes by the crypto service (hashed via SHA-256 if not already 32
//! bytes).

use std::path::{Path, PathBuf};

use gateway_protocol::{FrameSchema, RoutingRule, TargetSystem};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config types (validated, non-optional where required)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub schema_version: u32,
    pub crypto: CryptoConfig,
    pub monitoring: MonitoringConfig,
    pub adapters: AdaptersConfig,
    pub frame_schemas: Vec<FrameSchema>,
    pub routing_rules: Vec<RoutingRule>,
    pub target_systems: Vec<TargetSystem>,
}

#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Master key material, read from `master_key_file` (never stored inline in TOML).
    pub master_key: String,
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptersConfig {
    pub udp: Vec<UdpAdapterConfig>,
    pub tcp: Vec<TcpAdapterConfig>,
    pub http: Vec<HttpAdapterConfig>,
    pub websocket: Vec<WebSocketAdapterConfig>,
    pub mqtt: Vec<MqttAdapterConfig>,
}

#[derive(Debug, Clone)]
pub struct UdpAdapterConfig {
    pub name: String,
    pub listen_address: String,
    pub listen_port: u16,
    pub data_source_id: String,
    pub buffer_size: usize,
    /// Name of a `[[frame_schemas]]` entry to bind for auto-parse, if any.
    pub auto_parse_schema: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TcpAdapterConfig {
    pub name: String,
    pub listen_address: String,
    pub listen_port: u16,
    pub data_source_id: String,
    pub max_connections: usize,
    /// `"newline"` (default) or `"fixed_length"` (uses the bound schema's `total_length`).
    pub framing: String,
    pub auto_parse_schema: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub name: String,
    pub bind_address: String,
    pub path: String,
    pub data_source_id: String,
    pub captured_headers: Vec<String>,
    pub auto_parse_schema: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebSocketAdapterConfig {
    pub name: String,
    pub bind_address: String,
    pub path: String,
    pub data_source_id: String,
    pub max_connections: usize,
    pub auto_parse_schema: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MqttAdapterConfig {
    pub name: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub data_source_id: String,
    pub topics: Vec<String>,
    pub keepalive_secs: u64,
    pub auto_parse_schema: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    crypto: Option<RawCryptoConfig>,
    monitoring: Option<RawMonitoringConfig>,
    adapters: Option<RawAdaptersConfig>,
    #[serde(default)]
    frame_schemas: Vec<FrameSchema>,
    #[serde(default)]
    routing_rules: Vec<RoutingRule>,
    #[serde(default)]
    target_systems: Vec<TargetSystem>,
}

#[derive(Debug, Deserialize)]
struct RawCryptoConfig {
    master_key_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMonitoringConfig {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAdaptersConfig {
    #[serde(default)]
    udp: Vec<RawUdpAdapterConfig>,
    #[serde(default)]
    tcp: Vec<RawTcpAdapterConfig>,
    #[serde(default)]
    http: Vec<RawHttpAdapterConfig>,
    #[serde(default)]
    websocket: Vec<RawWebSocketAdapterConfig>,
    #[serde(default)]
    mqtt: Vec<RawMqttAdapterConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUdpAdapterConfig {
    name: Option<String>,
    listen_address: Option<String>,
    listen_port: Option<u16>,
    data_source_id: Option<String>,
    buffer_size: Option<usize>,
    auto_parse_schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTcpAdapterConfig {
    name: Option<String>,
    listen_address: Option<String>,
    listen_port: Option<u16>,
    data_source_id: Option<String>,
    max_connections: Option<usize>,
    framing: Option<String>,
    auto_parse_schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHttpAdapterConfig {
    name: Option<String>,
    bind_address: Option<String>,
    path: Option<String>,
    data_source_id: Option<String>,
    #[serde(default)]
    captured_headers: Vec<String>,
    auto_parse_schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWebSocketAdapterConfig {
    name: Option<String>,
    bind_address: Option<String>,
    path: Option<String>,
    data_source_id: Option<String>,
    max_connections: Option<usize>,
    auto_parse_schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMqttAdapterConfig {
    name: Option<String>,
    broker_host: Option<String>,
    broker_port: Option<u16>,
    client_id: Option<String>,
    data_source_id: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    keepalive_secs: Option<u64>,
    auto_parse_schema: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load gateway config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load gateway config from the default path `/etc/protocol-gateway/gateway.toml`.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/protocol-gateway/gateway.toml"))
}

/// Load gateway config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw.schema_version.ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!("schema_version must be 1, got {schema_version}")));
    }

    let raw_crypto = raw.crypto.ok_or_else(|| ConfigError::MissingField("crypto".to_owned()))?;
    let master_key_file = raw_crypto.master_key_file.ok_or_else(|| ConfigError::MissingField("crypto.master_key_file".to_owned()))?;
    let master_key = read_master_key_file(&master_key_file)?;

    let monitoring = match raw.monitoring {
        Some(m) => MonitoringConfig { db_path: m.db_path.map(PathBuf::from) },
        None => MonitoringConfig { db_path: None },
    };

    let raw_adapters = raw.adapters.unwrap_or_default();
    let adapters = AdaptersConfig {
        udp: raw_adapters.udp.into_iter().enumerate().map(|(i, r)| validate_udp(i, r)).collect::<Result<_, _>>()?,
        tcp: raw_adapters.tcp.into_iter().enumerate().map(|(i, r)| validate_tcp(i, r)).collect::<Result<_, _>>()?,
        http: raw_adapters.http.into_iter().enumerate().map(|(i, r)| validate_http(i, r)).collect::<Result<_, _>>()?,
        websocket: raw_adapters.websocket.into_iter().enumerate().map(|(i, r)| validate_websocket(i, r)).collect::<Result<_, _>>()?,
        mqtt: raw_adapters.mqtt.into_iter().enumerate().map(|(i, r)| validate_mqtt(i, r)).collect::<Result<_, _>>()?,
    };

    Ok(GatewayConfig {
        schema_version,
        crypto: CryptoConfig { master_key },
        monitoring,
        adapters,
        frame_schemas: raw.frame_schemas,
        routing_rules: raw.routing_rules,
        target_systems: raw.target_systems,
    })
}

fn validate_udp(i: usize, r: RawUdpAdapterConfig) -> Result<UdpAdapterConfig, ConfigError> {
    Ok(UdpAdapterConfig {
        name: r.name.ok_or_else(|| ConfigError::MissingField(format!("adapters.udp[{i}].name")))?,
        listen_address: r.listen_address.unwrap_or_else(|| "0.0.0.0".to_owned()),
        listen_port: r.listen_port.ok_or_else(|| ConfigError::MissingField(format!("adapters.udp[{i}].listen_port")))?,
        data_source_id: r.data_source_id.ok_or_else(|| ConfigError::MissingField(format!("adapters.udp[{i}].data_source_id")))?,
        buffer_size: r.buffer_size.unwrap_or(4096),
        auto_parse_schema: r.auto_parse_schema,
    })
}

fn validate_tcp(i: usize, r: RawTcpAdapterConfig) -> Result<TcpAdapterConfig, ConfigError> {
    Ok(TcpAdapterConfig {
        name: r.name.ok_or_else(|| ConfigError::MissingField(format!("adapters.tcp[{i}].name")))?,
        listen_address: r.listen_address.unwrap_or_else(|| "0.0.0.0".to_owned()),
        listen_port: r.listen_port.ok_or_else(|| ConfigError::MissingField(format!("adapters.tcp[{i}].listen_port")))?,
        data_source_id: r.data_source_id.ok_or_else(|| ConfigError::MissingField(format!("adapters.tcp[{i}].data_source_id")))?,
        max_connections: r.max_connections.unwrap_or(256),
        framing: r.framing.unwrap_or_else(|| "newline".to_owned()),
        auto_parse_schema: r.auto_parse_schema,
    })
}

fn validate_http(i: usize, r: RawHttpAdapterConfig) -> Result<HttpAdapterConfig, ConfigError> {
    Ok(HttpAdapterConfig {
        name: r.name.ok_or_else(|| ConfigError::MissingField(format!("adapters.http[{i}].name")))?,
        bind_address: r.bind_address.unwrap_or_else(|| "0.0.0.0:8090".to_owned()),
        path: r.path.unwrap_or_else(|| "/ingest".to_owned()),
        data_source_id: r.data_source_id.ok_or_else(|| ConfigError::MissingField(format!("adapters.http[{i}].data_source_id")))?,
        captured_headers: r.captured_headers,
        auto_parse_schema: r.auto_parse_schema,
    })
}

fn validate_websocket(i: usize, r: RawWebSocketAdapterConfig) -> Result<WebSocketAdapterConfig, ConfigError> {
    Ok(WebSocketAdapterConfig {
        name: r.name.ok_or_else(|| ConfigError::MissingField(format!("adapters.websocket[{i}].name")))?,
        bind_address: r.bind_address.unwrap_or_else(|| "0.0.0.0:8091".to_owned()),
        path: r.path.unwrap_or_else(|| "/ws".to_owned()),
        data_source_id: r.data_source_id.ok_or_else(|| ConfigError::MissingField(format!("adapters.websocket[{i}].data_source_id")))?,
        max_connections: r.max_connections.unwrap_or(256),
        auto_parse_schema: r.auto_parse_schema,
    })
}

fn validate_mqtt(i: usize, r: RawMqttAdapterConfig) -> Result<MqttAdapterConfig, ConfigError> {
    Ok(MqttAdapterConfig {
        name: r.name.ok_or_else(|| ConfigError::MissingField(format!("adapters.mqtt[{i}].name")))?,
        broker_host: r.broker_host.ok_or_else(|| ConfigError::MissingField(format!("adapters.mqtt[{i}].broker_host")))?,
        broker_port: r.broker_port.unwrap_or(1883),
        client_id: r.client_id.unwrap_or_else(|| format!("protocol-gateway-{i}")),
        data_source_id: r.data_source_id.ok_or_else(|| ConfigError::MissingField(format!("adapters.mqtt[{i}].data_source_id")))?,
        topics: r.topics,
        keepalive_secs: r.keepalive_secs.unwrap_or(30),
        auto_parse_schema: r.auto_parse_schema,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

fn read_master_key_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("reading master key file '{path}': {e}")))?;
    Ok(content.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_key_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "test-master-key-material\n").unwrap();
        file
    }

    #[test]
    fn missing_schema_version_is_rejected() {
        let err = load_config_from_str("crypto = { master_key_file = \"x\" }").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "schema_version"));
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let key_file = write_key_file();
        let toml_str = format!("schema_version = 1\n[crypto]\nmaster_key_file = \"{}\"\n", key_file.path().display());
        let cfg = load_config_from_str(&toml_str).unwrap();
        assert_eq!(cfg.crypto.master_key, "test-master-key-material");
        assert!(cfg.adapters.udp.is_empty());
        assert!(cfg.frame_schemas.is_empty());
        assert!(cfg.monitoring.db_path.is_none());
    }

    #[test]
    fn udp_adapter_requires_listen_port() {
        let key_file = write_key_file();
        let toml_str = format!(
            "schema_version = 1\n[crypto]\nmaster_key_file = \"{}\"\n[[adapters.udp]]\nname = \"a\"\ndata_source_id = \"s\"\n",
            key_file.path().display()
        );
        let err = load_config_from_str(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "adapters.udp[0].listen_port"));
    }

    #[test]
    fn target_systems_deserialize_via_their_own_defaults() {
        let key_file = write_key_file();
        let toml_str = format!(
            r#"
schema_version = 1
[crypto]
master_key_file = "{}"

[[target_systems]]
id = "t1"
protocol = "http"
target_address = "127.0.0.1"
target_port = 9000
is_active = true
forwarder_config = {{}}
"#,
            key_file.path().display()
        );
        let cfg = load_config_from_str(&toml_str).unwrap();
        assert_eq!(cfg.target_systems.len(), 1);
        assert_eq!(cfg.target_systems[0].id, "t1");
        assert_eq!(cfg.target_systems[0].forwarder_config.retry_count, 3, "ForwarderConfig's own serde default applies");
    }
}
