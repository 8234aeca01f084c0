//! Node contract validation
//!
//! Node inputs and outputs are described with JSON Schema. Registration checks
//! that a schema compiles and describes an object; execution checks concrete
//! inputs and outputs against it.

use jsonschema::JSONSchema;
use serde_json::{Map, Value};

/// Check that `schema` is a usable object schema.
///
/// `field` names the schema in error messages (e.g. "inputs_schema").
pub fn check_object_schema(field: &str, schema: &Value) -> Result<(), String> {
    let Some(object) = schema.as_object() else {
        return Err(format!("{} must be a JSON object", field));
    };

    match object.get("type") {
        Some(Value::String(t)) if t == "object" => {}
        Some(other) => {
            return Err(format!("{} must have \"type\": \"object\", got {}", field, other));
        }
        None => return Err(format!("{} is missing required field \"type\"", field)),
    }

    if let Some(properties) = object.get("properties") {
        if !properties.is_object() {
            return Err(format!("{}.properties must be an object", field));
        }
    }

    JSONSchema::compile(schema)
        .map(|_| ())
        .map_err(|e| format!("{} is not a valid JSON Schema: {}", field, e))
}

/// Validate a concrete input or output map against a schema
pub fn validate_against(schema: &Value, instance: &Map<String, Value>) -> Result<(), Vec<String>> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| vec![format!("invalid schema: {}", e)])?;

    let instance = Value::Object(instance.clone());

    // Collect messages while the compiled schema is still alive
    let messages: Option<Vec<String>> = match compiled.validate(&instance) {
        Ok(()) => None,
        Err(errors) => Some(
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect(),
        ),
    };

    match messages {
        None => Ok(()),
        Some(messages) => Err(messages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int_schema(field: &str) -> Value {
        json!({
            "type": "object",
            "properties": { field: { "type": "integer" } },
            "required": [field]
        })
    }

    #[test]
    fn test_object_schema_accepted() {
        assert!(check_object_schema("inputs_schema", &int_schema("x")).is_ok());
        assert!(check_object_schema("inputs_schema", &json!({"type": "object"})).is_ok());
    }

    #[test]
    fn test_missing_type_rejected() {
        let err = check_object_schema("inputs_schema", &json!({"properties": {}})).unwrap_err();
        assert!(err.contains("missing required field"));
    }

    #[test]
    fn test_non_object_schema_rejected() {
        assert!(check_object_schema("outputs_schema", &json!("string")).is_err());
        assert!(check_object_schema("outputs_schema", &json!({"type": "array"})).is_err());
        assert!(check_object_schema("outputs_schema", &json!({"type": "object", "properties": 3})).is_err());
    }

    #[test]
    fn test_instance_validation() {
        let schema = int_schema("y");
        let ok = json!({"y": 10});
        assert!(validate_against(&schema, ok.as_object().unwrap()).is_ok());

        let wrong_type = json!({"y": "ten"});
        let errors = validate_against(&schema, wrong_type.as_object().unwrap()).unwrap_err();
        assert!(errors[0].contains("/y"));

        let missing = json!({});
        assert!(validate_against(&schema, missing.as_object().unwrap()).is_err());
    }
}
