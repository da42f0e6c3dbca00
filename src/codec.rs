//! JSON bridge for the IR.
//!
//! Tony trees are a superset of JSON trees; this module is the in-crate
//! instantiation of the external `parse(bytes) → IR` / `encode(IR) → bytes`
//! interface, used by the `!json-patch` and `!unquote` operators and by
//! keyed-list key extraction. Tags and comments do not survive the JSON
//! projection.

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::ir::{Node, Value};

/// Projects a node to a JSON value. Comments are dropped; Comment nodes
/// project to null.
pub fn to_json(node: &Node) -> JsonValue {
    match &node.value {
        Value::Null | Value::Comment { .. } => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(JsonValue::Null, JsonValue::Number),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(els) => JsonValue::Array(els.iter().map(to_json).collect()),
        Value::Object { fields, values } => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields.iter().zip(values.iter()) {
                if let Some(key) = k.as_str() {
                    map.insert(key.to_string(), to_json(v));
                }
            }
            JsonValue::Object(map)
        }
    }
}

/// Builds an IR node from a JSON value.
pub fn from_json(value: &JsonValue) -> Node {
    match value {
        JsonValue::Null => Node::null(),
        JsonValue::Bool(b) => Node::from_bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Node::from_int(i)
            } else {
                Node::from_float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Node::from_string(s.clone()),
        JsonValue::Array(els) => Node::from_slice(els.iter().map(from_json).collect()),
        JsonValue::Object(map) => {
            Node::from_map(map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect())
        }
    }
}

/// Compact JSON encoding.
pub fn encode(node: &Node) -> String {
    serde_json::to_string(&to_json(node)).unwrap_or_else(|_| "null".to_string())
}

/// Parses a JSON document into the IR.
pub fn parse(text: &str) -> Result<Node> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| Error::parse(format!("invalid document: {e}")))?;
    Ok(from_json(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_structure() {
        let doc = Node::from_map(vec![
            ("name", Node::from_string("ada")),
            ("scores", Node::from_slice(vec![Node::from_int(1), Node::from_float(2.5)])),
            ("active", Node::from_bool(true)),
            ("extra", Node::null()),
        ]);
        let reparsed = parse(&encode(&doc)).expect("round-trip");
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn field_order_is_preserved() {
        let doc = parse(r#"{"z": 1, "a": 2}"#).expect("parse");
        let keys: Vec<&str> = doc.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn tags_do_not_survive_the_projection() {
        let tagged = Node::from_int(1).with_tag("!version");
        assert_eq!(encode(&tagged), "1");
    }
}
