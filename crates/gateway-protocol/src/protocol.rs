use serde::{Deserialize, Serialize};

/// Source/target wire protocol.
///
/// A sealed enum rather than the original's class-per-protocol hierarchy:
/// adapters and forwarders dispatch on this instead of a factory registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
    Mqtt,
}

impl Protocol {
    /// The canonical bus topic prefix for this protocol's `_RECEIVED` topic.
    pub fn topic_prefix(self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Http => "HTTP",
            Protocol::WebSocket => "WEBSOCKET",
            Protocol::Mqtt => "MQTT",
        }
    }

    pub fn received_topic(self) -> String {
        format!("{}_RECEIVED", self.topic_prefix())
    }

    /// Parse a protocol name case-insensitively, accepting both the
    /// canonical name and the `_received` topic's prefix form. Mirrors
    /// `_normalize_protocol`'s tolerance for `"websocket"` / `"ws"`.
    pub fn parse(s: &str) -> Option<Protocol> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Some(Protocol::Udp),
            "TCP" => Some(Protocol::Tcp),
            "HTTP" => Some(Protocol::Http),
            "WEBSOCKET" | "WS" => Some(Protocol::WebSocket),
            "MQTT" => Some(Protocol::Mqtt),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.topic_prefix())
    }
}
