//! Deterministic sample bodies generated from response schemas.

use serde_json::{Map, Value};

const MAX_DEPTH: usize = 8;

/// Generates a sample value for a JSON schema.
///
/// `definitions` is the document's `definitions` object, used to resolve
/// local `$ref`s. Declared `example`, `default` and `enum` values are
/// preferred over synthesized ones.
#[must_use]
pub fn generate_sample(schema: &Value, definitions: &Value) -> Value {
    sample_at(schema, definitions, 0)
}

fn sample_at(schema: &Value, definitions: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::Null;
    }
    let Some(object) = schema.as_object() else {
        return Value::Null;
    };

    if let Some(reference) = object.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or_default();
        return definitions
            .get(name)
            .map_or(Value::Null, |target| sample_at(target, definitions, depth + 1));
    }

    if let Some(example) = object.get("example") {
        return example.clone();
    }
    if let Some(default) = object.get("default") {
        return default.clone();
    }
    if let Some(first) = object.get("enum").and_then(Value::as_array).and_then(|v| v.first()) {
        return first.clone();
    }

    if let Some(all_of) = object.get("allOf").and_then(Value::as_array) {
        let mut merged = Map::new();
        for part in all_of {
            if let Value::Object(fields) = sample_at(part, definitions, depth + 1) {
                merged.extend(fields);
            }
        }
        return Value::Object(merged);
    }

    let schema_type = object.get("type").and_then(Value::as_str).or_else(|| {
        object.contains_key("properties").then_some("object")
    });

    match schema_type {
        Some("string") => Value::String(string_sample(object.get("format").and_then(Value::as_str))),
        Some("integer") => Value::from(1),
        Some("number") => Value::from(1.5),
        Some("boolean") => Value::Bool(true),
        Some("array") => {
            let item = object
                .get("items")
                .map_or(Value::Null, |items| sample_at(items, definitions, depth + 1));
            Value::Array(vec![item])
        }
        Some("object") => {
            let fields = object
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), sample_at(prop, definitions, depth + 1)))
                        .collect()
                })
                .unwrap_or_default();
            Value::Object(fields)
        }
        _ => Value::Null,
    }
}

fn string_sample(format: Option<&str>) -> String {
    match format {
        Some("date") => "2024-01-01".to_string(),
        Some("date-time") => "2024-01-01T00:00:00Z".to_string(),
        Some("uuid") => "00000000-0000-4000-8000-000000000000".to_string(),
        _ => "Sample text".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_primitive_samples() {
        let defs = Value::Null;
        assert_eq!(generate_sample(&json!({"type": "string"}), &defs), json!("Sample text"));
        assert_eq!(generate_sample(&json!({"type": "integer"}), &defs), json!(1));
        assert_eq!(generate_sample(&json!({"type": "boolean"}), &defs), json!(true));
        assert_eq!(generate_sample(&json!({}), &defs), Value::Null);
    }

    #[test]
    fn test_declared_values_win() {
        let defs = Value::Null;
        assert_eq!(
            generate_sample(&json!({"type": "string", "example": "hi"}), &defs),
            json!("hi")
        );
        assert_eq!(
            generate_sample(&json!({"type": "string", "enum": ["a", "b"]}), &defs),
            json!("a")
        );
    }

    #[test]
    fn test_object_with_ref_and_array() {
        let defs = json!({
            "Pet": {"type": "object", "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}}
        });
        let schema = json!({"type": "array", "items": {"$ref": "#/definitions/Pet"}});

        assert_eq!(
            generate_sample(&schema, &defs),
            json!([{"name": "Sample text", "age": 1}])
        );
    }

    #[test]
    fn test_recursive_ref_terminates() {
        let defs = json!({
            "Node": {"type": "object", "properties": {"next": {"$ref": "#/definitions/Node"}}}
        });
        let sample = generate_sample(&json!({"$ref": "#/definitions/Node"}), &defs);
        assert!(sample.is_object());
    }
}
