//! Response schema builders
//!
//! The hosted API accepts an OpenAPI-style subset of JSON schema for
//! `responseSchema`. These helpers build that subset without pulling in a
//! full schema generator.

use serde_json::{json, Map, Value};

/// A string property
pub fn string() -> Value {
    json!({ "type": "STRING" })
}

/// A string property with a description
pub fn described_string(description: &str) -> Value {
    json!({ "type": "STRING", "description": description })
}

/// A number property
pub fn number() -> Value {
    json!({ "type": "NUMBER" })
}

/// A string property restricted to the given values
pub fn enumeration(values: &[&str]) -> Value {
    json!({ "type": "STRING", "enum": values })
}

/// An array of `items`
pub fn array(items: Value) -> Value {
    json!({ "type": "ARRAY", "items": items })
}

/// An object with ordered properties and a list of required keys
pub fn object(properties: Vec<(&str, Value)>, required: &[&str]) -> Value {
    let mut props = Map::new();
    for (name, schema) in properties {
        props.insert(name.to_string(), schema);
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("OBJECT".to_string()));
    schema.insert("properties".to_string(), Value::Object(props));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    Value::Object(schema)
}

/// Attach a description to an existing schema node
pub fn with_description(mut schema: Value, description: &str) -> Value {
    if let Value::Object(map) = &mut schema {
        map.insert(
            "description".to_string(),
            Value::String(description.to_string()),
        );
    }
    schema
}
