//! Attribute-tree helpers shared by the live decode path and the schema
//! migration. Trees are plain `serde_json::Value` objects.

use serde_json::{Map, Value};

/// Walk a dot-separated path into a tree. Traverses object levels only; no
/// implicit array indices are inferred.
pub fn get_nested<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for key in path.split('.') {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Nest a flat `dot.separated.key` map into a tree. Intermediate path
/// segments that are not already maps are overwritten with a fresh map, so
/// conflicting scalars are lost; a later key always wins over an earlier one
/// at the same path.
pub fn unflatten_object(flat: Map<String, Value>) -> Map<String, Value> {
    let mut result = Map::new();
    for (key, value) in flat {
        let mut parts = key.split('.').collect::<Vec<_>>();
        let last = parts.pop().unwrap_or_default();
        let mut current = &mut result;
        for part in parts {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = slot.as_object_mut().expect("slot was just made an object");
        }
        current.insert(last.to_string(), value);
    }
    result
}

/// Inverse of `unflatten_object` for trees whose keys carry no `.`; arrays
/// are treated as leaves.
pub fn flatten_object(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut result = Map::new();
    flatten_into(obj, "", &mut result);
    result
}

fn flatten_into(obj: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &path, out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Replace every string value that parses as JSON with its parsed form.
/// Parse failure leaves the original string untouched; this never fails.
pub fn load_json_strings(flat: Map<String, Value>) -> Map<String, Value> {
    flat.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => match serde_json::from_str::<Value>(&s) {
                    Ok(parsed) => parsed,
                    Err(_) => Value::String(s),
                },
                other => other,
            };
            (key, value)
        })
        .collect()
}

/// Truthiness the way loosely-typed senders mean it: `null`, `false`, zero
/// and the empty string are falsy, everything else (including empty maps and
/// lists) is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of a scalar attribute value; maps and lists render as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn unflattens_on_dot_boundaries() {
        let flat = as_map(json!({
            "gen_ai.usage.input_tokens": 10,
            "gen_ai.usage.output_tokens": 4,
            "service.name": "agent"
        }));
        let tree = Value::Object(unflatten_object(flat));
        assert_eq!(tree, json!({
            "gen_ai": {"usage": {"input_tokens": 10, "output_tokens": 4}},
            "service": {"name": "agent"}
        }));
    }

    #[test]
    fn later_key_overwrites_conflicting_scalar() {
        let flat = as_map(json!({"a": 1, "a.b": 2}));
        let tree = Value::Object(unflatten_object(flat));
        assert_eq!(tree, json!({"a": {"b": 2}}));
    }

    #[test]
    fn flatten_unflatten_round_trips() {
        let tree = as_map(json!({
            "gen_ai": {"operation": {"name": "chat"}, "request": {"model": "m"}},
            "tags": ["a", "b"],
            "count": 3
        }));
        let round = unflatten_object(flatten_object(&tree));
        assert_eq!(Value::Object(round), Value::Object(tree));
    }

    #[test]
    fn parses_embedded_json_strings() {
        let flat = as_map(json!({
            "input": "{\"messages\": [1, 2]}",
            "note": "not { json",
            "count": "5"
        }));
        let loaded = load_json_strings(flat);
        assert_eq!(loaded["input"], json!({"messages": [1, 2]}));
        assert_eq!(loaded["note"], json!("not { json"));
        assert_eq!(loaded["count"], json!(5));
    }

    #[test]
    fn nested_lookup_stops_at_non_objects() {
        let tree = json!({"a": {"b": [1, 2]}});
        assert_eq!(get_nested(&tree, "a.b"), Some(&json!([1, 2])));
        assert_eq!(get_nested(&tree, "a.b.0"), None);
        assert_eq!(get_nested(&tree, "a.missing"), None);
    }

    #[test]
    fn truthiness_matches_loose_senders() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!("x")));
    }
}
