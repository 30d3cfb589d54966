//! Payload maps passed between stages, control points and bus messages.

use std::collections::HashMap;

/// An opaque key/value payload. The engine never inspects its contents.
pub type Payload = HashMap<String, serde_json::Value>;

/// Shallow overlay: every key in `changes` replaces the same key in `base`.
///
/// Nested objects are replaced whole, not merged.
#[must_use]
pub fn overlay(base: &Payload, changes: &Payload) -> Payload {
    let mut merged = base.clone();
    for (key, value) in changes {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Converts a JSON object into a payload. Non-object values are stored
/// under a single `value` key.
#[must_use]
pub fn payload_from_value(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        serde_json::Value::Null => Payload::new(),
        other => {
            let mut payload = Payload::new();
            payload.insert("value".to_string(), other);
            payload
        }
    }
}

/// Renders the sorted key set of a payload, e.g. `{rows, table}`.
#[must_use]
pub fn summarize_keys(payload: &Payload) -> String {
    let mut keys: Vec<&str> = payload.keys().map(String::as_str).collect();
    keys.sort_unstable();
    format!("{{{}}}", keys.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_overlay_replaces_and_adds_keys() {
        let base = payload_from_value(json!({"x": 1, "y": 2}));
        let changes = payload_from_value(json!({"x": 5, "z": 3}));

        let merged = overlay(&base, &changes);

        assert_eq!(merged, payload_from_value(json!({"x": 5, "y": 2, "z": 3})));
        assert_eq!(base.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_overlay_is_shallow() {
        let base = payload_from_value(json!({"opts": {"a": 1, "b": 2}}));
        let changes = payload_from_value(json!({"opts": {"a": 9}}));

        let merged = overlay(&base, &changes);

        assert_eq!(merged.get("opts"), Some(&json!({"a": 9})));
    }

    #[test]
    fn test_payload_from_scalar() {
        let payload = payload_from_value(json!(42));
        assert_eq!(payload.get("value"), Some(&json!(42)));
        assert!(payload_from_value(serde_json::Value::Null).is_empty());
    }

    #[test]
    fn test_summarize_keys_sorted() {
        let payload = payload_from_value(json!({"table": "t", "rows": 3}));
        assert_eq!(summarize_keys(&payload), "{rows, table}");
    }
}
