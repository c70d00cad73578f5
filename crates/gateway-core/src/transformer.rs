//! Per-target field reshaping (C6): sanitize, flatten, map, remove, add —
//! a pure function with no I/O and no async, ported from
//! `transformer.py::DataTransformer.transform`. Tested with plain
//! `#[test]` table-driven cases, matching `ipico-core`'s and
//! `rt-protocol`'s test style (the teacher does not depend on `proptest`).

use gateway_protocol::{GatewayValue, TransformConfig};

/// Apply `config`'s operations to `payload` in the fixed order the spec
/// requires: sanitize, flatten, map, remove, add. Returns the transformed
/// value; never fails — unreachable writes (through a non-map
/// intermediate) are silently dropped, matching §4.5's "warning, not a
/// failure" semantics.
pub fn transform(payload: &GatewayValue, config: &TransformConfig) -> GatewayValue {
    let mut value = payload.clone();
    sanitize(&mut value);
    if config.flatten_parsed_data {
        flatten_parsed_data(&mut value);
    }
    for (src, dst) in &config.field_mapping {
        if let Some(v) = value.get_path(src).cloned() {
            value.set_path(dst, v);
            value.remove_path(src);
        }
    }
    for path in &config.remove_fields {
        value.remove_path(path);
    }
    for (path, constant) in &config.add_fields {
        value.set_path(path, constant.clone());
    }
    value
}

/// Remove the top-level `raw_data` key, then recursively drop every
/// byte-valued field at any depth — bytes cannot be JSON-encoded and must
/// never leak to a downstream target.
pub fn sanitize(value: &mut GatewayValue) {
    if let Some(map) = value.as_map_mut() {
        map.remove("raw_data");
    }
    strip_bytes(value);
}

fn strip_bytes(value: &mut GatewayValue) {
    match value {
        GatewayValue::Map(map) => {
            let keys: Vec<String> = map.iter().map(|(k, _)| k.clone()).collect();
            for key in keys {
                let is_bytes = map.get(&key).is_some_and(GatewayValue::is_bytes);
                if is_bytes {
                    map.remove(&key);
                } else if let Some(v) = map.get_mut(&key) {
                    strip_bytes(v);
                }
            }
        }
        GatewayValue::List(items) => {
            items.retain(|v| !v.is_bytes());
            for item in items.iter_mut() {
                strip_bytes(item);
            }
        }
        _ => {}
    }
}

/// Lift `parsed_data.*` into the root, preserving existing root keys on
/// collision. The nested `parsed_data` key itself is left untouched — this
/// is a copy-up, not a move, since the spec only specifies collision
/// behavior for the lifted keys.
fn flatten_parsed_data(value: &mut GatewayValue) {
    let Some(parsed_entries) = value.get_path("parsed_data").and_then(GatewayValue::as_map).map(|m| {
        m.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>()
    }) else {
        return;
    };
    let Some(root) = value.as_map_mut() else { return };
    for (key, val) in parsed_entries {
        if !root.contains_key(&key) {
            root.insert(key, val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::value::GatewayMap;
    use std::collections::HashMap;

    fn map(pairs: Vec<(&str, GatewayValue)>) -> GatewayValue {
        let mut m = GatewayMap::new();
        for (k, v) in pairs {
            m.insert(k, v);
        }
        GatewayValue::Map(m)
    }

    #[test]
    fn sanitize_drops_raw_data_and_nested_bytes() {
        let mut value = map(vec![
            ("raw_data", GatewayValue::Bytes(vec![1, 2, 3])),
            ("items", GatewayValue::List(vec![map(vec![("id", GatewayValue::Int(1)), ("data", GatewayValue::Bytes(vec![9]))])])),
        ]);
        sanitize(&mut value);
        assert_eq!(value.get_path("raw_data"), None);
        let Some(GatewayValue::List(items)) = value.get_path("items") else { panic!("items missing") };
        let item = &items[0];
        assert_eq!(item.get_path("id"), Some(&GatewayValue::Int(1)));
        assert_eq!(item.get_path("data"), None);
    }

    #[test]
    fn identity_config_is_a_noop_modulo_sanitization() {
        let payload = map(vec![("a", GatewayValue::Int(1)), ("raw_data", GatewayValue::Bytes(vec![1]))]);
        let config = TransformConfig::default();
        let result = transform(&payload, &config);
        assert_eq!(result.get_path("a"), Some(&GatewayValue::Int(1)));
        assert_eq!(result.get_path("raw_data"), None);
    }

    #[test]
    fn flatten_preserves_existing_root_keys_on_collision() {
        let payload = map(vec![
            ("source", GatewayValue::String("root".to_string())),
            ("parsed_data", map(vec![("source", GatewayValue::String("parsed".to_string())), ("temp", GatewayValue::Float(1.0))])),
        ]);
        let config = TransformConfig { flatten_parsed_data: true, ..Default::default() };
        let result = transform(&payload, &config);
        assert_eq!(result.get_path("source"), Some(&GatewayValue::String("root".to_string())));
        assert_eq!(result.get_path("temp"), Some(&GatewayValue::Float(1.0)));
    }

    #[test]
    fn map_operation_moves_value_and_deletes_source() {
        let payload = map(vec![("old", GatewayValue::Int(5))]);
        let mut field_mapping = HashMap::new();
        field_mapping.insert("old".to_string(), "new".to_string());
        let config = TransformConfig { field_mapping, ..Default::default() };
        let result = transform(&payload, &config);
        assert_eq!(result.get_path("old"), None);
        assert_eq!(result.get_path("new"), Some(&GatewayValue::Int(5)));
    }

    #[test]
    fn map_operation_on_missing_source_is_a_noop() {
        let payload = map(vec![("a", GatewayValue::Int(1))]);
        let mut field_mapping = HashMap::new();
        field_mapping.insert("missing".to_string(), "new".to_string());
        let config = TransformConfig { field_mapping, ..Default::default() };
        let result = transform(&payload, &config);
        assert_eq!(result.get_path("new"), None);
    }

    #[test]
    fn remove_then_add_applied_in_order() {
        let payload = map(vec![("drop_me", GatewayValue::Int(1))]);
        let mut add_fields = HashMap::new();
        add_fields.insert("added".to_string(), GatewayValue::String("x".to_string()));
        let config = TransformConfig { remove_fields: vec!["drop_me".to_string()], add_fields, ..Default::default() };
        let result = transform(&payload, &config);
        assert_eq!(result.get_path("drop_me"), None);
        assert_eq!(result.get_path("added"), Some(&GatewayValue::String("x".to_string())));
    }

    #[test]
    fn writing_through_non_map_intermediate_is_ignored() {
        let payload = map(vec![("a", GatewayValue::Int(1))]);
        let mut add_fields = HashMap::new();
        add_fields.insert("a.b".to_string(), GatewayValue::Int(2));
        let config = TransformConfig { add_fields, ..Default::default() };
        let result = transform(&payload, &config);
        assert_eq!(result.get_path("a"), Some(&GatewayValue::Int(1)));
    }
}
