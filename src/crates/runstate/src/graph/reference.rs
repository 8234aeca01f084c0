//! Input references
//!
//! A string input may reference an upstream output as
//! `${{ identifier.output_field }}`. A string that is exactly one reference is
//! replaced by the referenced JSON value (type preserved); references inside a
//! longer string are interpolated as text.

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([A-Za-z0-9_\-]+)\.([A-Za-z0-9_\-]+)\s*\}\}").unwrap()
});

/// `identifier.output_field`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub identifier: String,
    pub field: String,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.identifier, self.field)
    }
}

/// Every reference found in a value, recursing into arrays and objects
pub fn references_in(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found
}

/// Every reference found in an input map
pub fn references_in_inputs(inputs: &Map<String, Value>) -> Vec<Reference> {
    let mut found = Vec::new();
    for value in inputs.values() {
        collect(value, &mut found);
    }
    found
}

fn collect(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            for caps in REFERENCE_REGEX.captures_iter(s) {
                found.push(Reference {
                    identifier: caps[1].to_string(),
                    field: caps[2].to_string(),
                });
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect(item, found)),
        _ => {}
    }
}

/// Substitute references using `lookup`.
///
/// Fails with the first reference `lookup` cannot satisfy.
pub fn resolve_inputs<F>(inputs: &Map<String, Value>, lookup: F) -> Result<Map<String, Value>, String>
where
    F: Fn(&Reference) -> Option<Value>,
{
    inputs
        .iter()
        .map(|(field, value)| {
            resolve_value(value, &lookup)
                .map(|resolved| (field.clone(), resolved))
                .map_err(|e| format!("input '{}': {}", field, e))
        })
        .collect()
}

fn resolve_value<F>(value: &Value, lookup: &F) -> Result<Value, String>
where
    F: Fn(&Reference) -> Option<Value>,
{
    match value {
        Value::String(s) => resolve_string(s, lookup),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| resolve_value(v, lookup).map(|r| (k.clone(), r)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string<F>(s: &str, lookup: &F) -> Result<Value, String>
where
    F: Fn(&Reference) -> Option<Value>,
{
    if let Some(caps) = REFERENCE_REGEX.captures(s) {
        let whole = caps.get(0).map(|m| m.as_str()) == Some(s.trim());
        if whole {
            let reference = Reference {
                identifier: caps[1].to_string(),
                field: caps[2].to_string(),
            };
            return lookup(&reference).ok_or_else(|| format!("unresolved reference {}", reference));
        }
    } else {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in REFERENCE_REGEX.captures_iter(s) {
        let Some(m) = caps.get(0) else { continue };
        let reference = Reference {
            identifier: caps[1].to_string(),
            field: caps[2].to_string(),
        };
        let value = lookup(&reference).ok_or_else(|| format!("unresolved reference {}", reference))?;
        out.push_str(&s[last..m.start()]);
        match value {
            Value::String(text) => out.push_str(&text),
            other => out.push_str(&other.to_string()),
        }
        last = m.end();
    }
    out.push_str(&s[last..]);

    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn lookup(reference: &Reference) -> Option<Value> {
        match (reference.identifier.as_str(), reference.field.as_str()) {
            ("a", "y") => Some(json!(10)),
            ("a", "name") => Some(json!("alpha")),
            ("b", "list") => Some(json!([1, 2])),
            _ => None,
        }
    }

    #[test]
    fn test_finds_references_in_nested_values() {
        let value = json!({
            "x": "${{ a.y }}",
            "nested": ["prefix ${{b.list}} and ${{ a.name }}", 3]
        });
        let refs = references_in(&value);
        assert_eq!(refs.len(), 3);
        let found: BTreeSet<String> = refs.iter().map(|r| r.to_string()).collect();
        let expected: BTreeSet<String> = ["a.y", "a.name", "b.list"].iter().map(|s| s.to_string()).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_literal_with_dots_is_not_a_reference() {
        assert!(references_in(&json!("a.y")).is_empty());
        assert!(references_in(&json!("${ a.y }")).is_empty());
    }

    #[test]
    fn test_whole_reference_preserves_type() {
        let mut inputs = Map::new();
        inputs.insert("z".into(), json!("${{ a.y }}"));
        inputs.insert("items".into(), json!(" ${{b.list}} "));
        let resolved = resolve_inputs(&inputs, lookup).unwrap();
        assert_eq!(resolved["z"], json!(10));
        assert_eq!(resolved["items"], json!([1, 2]));
    }

    #[test]
    fn test_embedded_reference_interpolates_text() {
        let mut inputs = Map::new();
        inputs.insert("greeting".into(), json!("hi ${{ a.name }}, you are ${{ a.y }}"));
        let resolved = resolve_inputs(&inputs, lookup).unwrap();
        assert_eq!(resolved["greeting"], json!("hi alpha, you are 10"));
    }

    #[test]
    fn test_unresolved_reference_names_field() {
        let mut inputs = Map::new();
        inputs.insert("q".into(), json!("${{ zz.missing }}"));
        let err = resolve_inputs(&inputs, lookup).unwrap_err();
        assert!(err.contains("input 'q'"));
        assert!(err.contains("zz.missing"));
    }

    #[test]
    fn test_literals_pass_through() {
        let mut inputs = Map::new();
        inputs.insert("n".into(), json!(5));
        inputs.insert("s".into(), json!("plain"));
        let resolved = resolve_inputs(&inputs, lookup).unwrap();
        assert_eq!(resolved, inputs);
    }
}
