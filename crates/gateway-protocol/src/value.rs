//! Dynamic value type carried by envelopes and transform output.
//!
//! The original source represented parsed/transformed payloads as plain
//! Python dicts, read and written via dotted-path dynamic attribute access.
//! `GatewayValue` is the typed replacement: a tagged union with an
//! order-preserving map, plus `get_path`/`set_path`/`remove_path` helpers
//! that walk it the same way the Python `_get_field`/`_set_field`/
//! `_remove_field` helpers walked nested dicts.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An ordered map from string keys to `GatewayValue`s.
///
/// Backed by a `Vec` rather than a `HashMap` so that field order from
/// parsing/transformation is preserved without pulling in `indexmap`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GatewayMap(Vec<(String, GatewayValue)>);

impl GatewayMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&GatewayValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut GatewayValue> {
        self.0.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or overwrite `key`. Preserves the existing position on overwrite.
    pub fn insert(&mut self, key: impl Into<String>, value: GatewayValue) {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<GatewayValue> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GatewayValue)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut GatewayValue)> {
        self.0.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, GatewayValue)> for GatewayMap {
    fn from_iter<T: IntoIterator<Item = (String, GatewayValue)>>(iter: T) -> Self {
        let mut map = GatewayMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A dynamically-typed value carried through the pipeline.
///
/// `Bytes` is distinct from `String` so the transformer's sanitization pass
/// (strip byte-valued fields before anything is serialized to JSON) can
/// identify them without guessing at string contents.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<GatewayValue>),
    Map(GatewayMap),
}

impl GatewayValue {
    pub fn map() -> Self {
        GatewayValue::Map(GatewayMap::new())
    }

    pub fn as_map(&self) -> Option<&GatewayMap> {
        match self {
            GatewayValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut GatewayMap> {
        match self {
            GatewayValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GatewayValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GatewayValue::Int(i) => Some(*i as f64),
            GatewayValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, GatewayValue::Null)
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, GatewayValue::Bytes(_))
    }

    /// Read a dot-delimited path. Missing keys, or stepping through a
    /// non-map node, both resolve to `None` — mirrors the Python
    /// `_get_field`'s behavior of returning `None` rather than raising.
    pub fn get_path(&self, path: &str) -> Option<&GatewayValue> {
        let mut cur = self;
        for segment in path.split('.') {
            cur = cur.as_map()?.get(segment)?;
        }
        Some(cur)
    }

    /// Write a dot-delimited path, creating intermediate maps as needed.
    ///
    /// If an intermediate path segment exists but isn't a map, the write is
    /// silently dropped (matches the Python `_set_field`'s warn-and-no-op
    /// behavior for the same case) and `false` is returned.
    pub fn set_path(&mut self, path: &str, value: GatewayValue) -> bool {
        let segments: Vec<&str> = path.split('.').collect();
        let mut cur = self;
        for segment in &segments[..segments.len() - 1] {
            if !matches!(cur, GatewayValue::Map(_)) {
                return false;
            }
            let map = cur.as_map_mut().expect("checked above");
            if !map.contains_key(segment) {
                map.insert(*segment, GatewayValue::map());
            }
            match map.get_mut(segment) {
                Some(next @ GatewayValue::Map(_)) => cur = next,
                _ => return false,
            }
        }
        match cur {
            GatewayValue::Map(map) => {
                map.insert(*segments.last().expect("split always yields >=1"), value);
                true
            }
            _ => false,
        }
    }

    /// Remove a dot-delimited path. No-op (returns `None`) if the path
    /// doesn't exist, mirroring `_remove_field`.
    pub fn remove_path(&mut self, path: &str) -> Option<GatewayValue> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut cur = self;
        for segment in &segments[..segments.len() - 1] {
            cur = cur.as_map_mut()?.get_mut(segment)?;
        }
        cur.as_map_mut()?.remove(segments.last().expect("non-empty"))
    }

    /// Convert to `serde_json::Value`, base64-encoding `Bytes` leaves.
    ///
    /// Used when serializing a payload for the wire (forwarders always
    /// serialize to JSON; raw bytes never appear on the wire unencoded).
    pub fn to_json(&self) -> JsonValue {
        match self {
            GatewayValue::Null => JsonValue::Null,
            GatewayValue::Bool(b) => JsonValue::Bool(*b),
            GatewayValue::Int(i) => JsonValue::from(*i),
            GatewayValue::Float(f) => {
                serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            }
            GatewayValue::String(s) => JsonValue::String(s.clone()),
            GatewayValue::Bytes(b) => {
                use base64::Engine;
                JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            GatewayValue::List(items) => JsonValue::Array(items.iter().map(|v| v.to_json()).collect()),
            GatewayValue::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map.iter() {
                    obj.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(obj)
            }
        }
    }

    /// Convert from `serde_json::Value`. JSON has no native bytes type, so
    /// incoming JSON never produces a `Bytes` leaf here (that only happens
    /// via raw frame-parser `BYTES` fields).
    pub fn from_json(value: &JsonValue) -> GatewayValue {
        match value {
            JsonValue::Null => GatewayValue::Null,
            JsonValue::Bool(b) => GatewayValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    GatewayValue::Int(i)
                } else {
                    GatewayValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => GatewayValue::String(s.clone()),
            JsonValue::Array(items) => GatewayValue::List(items.iter().map(GatewayValue::from_json).collect()),
            JsonValue::Object(obj) => {
                let mut map = GatewayMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), GatewayValue::from_json(v));
                }
                GatewayValue::Map(map)
            }
        }
    }
}

impl Serialize for GatewayValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GatewayValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = JsonValue::deserialize(deserializer)?;
        Ok(GatewayValue::from_json(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_from(pairs: &[(&str, GatewayValue)]) -> GatewayValue {
        let mut m = GatewayMap::new();
        for (k, v) in pairs {
            m.insert(*k, v.clone());
        }
        GatewayValue::Map(m)
    }

    #[test]
    fn get_path_missing_returns_none() {
        let v = map_from(&[("a", GatewayValue::Int(1))]);
        assert_eq!(v.get_path("a.b"), None);
        assert_eq!(v.get_path("missing"), None);
    }

    #[test]
    fn get_path_nested() {
        let inner = map_from(&[("temperature", GatewayValue::Float(25.5))]);
        let v = map_from(&[("parsed_data", inner)]);
        assert_eq!(v.get_path("parsed_data.temperature"), Some(&GatewayValue::Float(25.5)));
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut v = GatewayValue::map();
        assert!(v.set_path("a.b.c", GatewayValue::Int(5)));
        assert_eq!(v.get_path("a.b.c"), Some(&GatewayValue::Int(5)));
    }

    #[test]
    fn set_path_through_non_map_is_noop() {
        let mut v = map_from(&[("a", GatewayValue::Int(1))]);
        assert!(!v.set_path("a.b", GatewayValue::Int(2)));
        assert_eq!(v.get_path("a"), Some(&GatewayValue::Int(1)));
    }

    #[test]
    fn remove_path_missing_is_noop() {
        let mut v = map_from(&[("a", GatewayValue::Int(1))]);
        assert_eq!(v.remove_path("b.c"), None);
        assert_eq!(v.remove_path("a"), Some(GatewayValue::Int(1)));
        assert_eq!(v.get_path("a"), None);
    }

    #[test]
    fn json_roundtrip_preserves_shape() {
        let json = serde_json::json!({"a": 1, "b": [1, 2.5, "x"], "c": {"d": null}});
        let v = GatewayValue::from_json(&json);
        assert_eq!(v.to_json(), json);
    }
}
