//! Canonical cache key derivation.
//!
//! A key is the namespace, optionally followed by `?` and the parameters
//! serialized as JSON with object keys sorted at every depth. Two parameter
//! sets that differ only in field order map to the same key.

use serde::Serialize;
use serde_json::{Map, Value};

use super::CacheError;

/// Separator between the namespace and the serialized parameters.
pub const PARAMS_SEPARATOR: char = '?';

/// Derive the cache key for `namespace` and `params`.
///
/// Parameters that serialize to `null` or an empty object produce the bare
/// namespace.
pub fn derive_key<P>(namespace: &str, params: &P) -> Result<String, CacheError>
where
    P: Serialize + ?Sized,
{
    let value = serde_json::to_value(params).map_err(CacheError::encode)?;
    let canonical = canonicalize(value);

    let is_empty = match &canonical {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Ok(namespace.to_string());
    }

    let params = serde_json::to_string(&canonical).map_err(CacheError::encode)?;
    Ok(format!("{namespace}{PARAMS_SEPARATOR}{params}"))
}

/// Namespace part of a derived key.
pub fn namespace_of(key: &str) -> &str {
    key.split_once(PARAMS_SEPARATOR)
        .map_or(key, |(namespace, _)| namespace)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_params_yield_bare_namespace() {
        assert_eq!(derive_key("employees:getAll", &()).unwrap(), "employees:getAll");
        assert_eq!(derive_key("employees:getAll", &json!({})).unwrap(), "employees:getAll");
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let a = derive_key("tasks", &json!({"status": "open", "assignee": "e1"})).unwrap();
        let b = derive_key("tasks", &json!({"assignee": "e1", "status": "open"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"tasks?{"assignee":"e1","status":"open"}"#);
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let key = derive_key("tasks", &json!({"z": {"b": 1, "a": 2}, "a": [ {"y": 1, "x": 2} ]})).unwrap();
        assert_eq!(key, r#"tasks?{"a":[{"x":2,"y":1}],"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of(r#"tasks?{"status":"open"}"#), "tasks");
        assert_eq!(namespace_of("employees:getAll"), "employees:getAll");
    }
}
