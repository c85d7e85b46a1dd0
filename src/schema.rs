//! Schema Validator
//!
//! Structural validation of JSON values against the accepted subset of JSON
//! Schema, applied to tool arguments before a handler runs. Supported
//! keywords: `type`, `required`, `properties`, `items`, `minimum`,
//! `maximum`, `minLength`, `maxLength`, `pattern`, `enum`. Unknown keywords
//! are ignored; no coercion is performed.
//!
//! `integer` matches any number whose value is a whole number; `number`
//! accepts integers. A missing `type` imposes no type constraint. `pattern`
//! is matched with the `regex` crate (unanchored search, as JSON Schema
//! specifies).

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// A value rejected by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Value has the wrong JSON type.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Location of the offending value
        path: String,
        /// Type the schema demanded
        expected: String,
        /// Type the value actually had
        found: String,
    },

    /// A property listed in `required` is absent.
    #[error("required field missing at {path}: {field}")]
    RequiredFieldMissing {
        /// Location of the object missing the field
        path: String,
        /// Name of the missing property
        field: String,
    },

    /// A numeric or length bound was violated.
    #[error("out of bounds at {path}: {detail}")]
    OutOfBounds {
        /// Location of the offending value
        path: String,
        /// Which bound was violated and how
        detail: String,
    },

    /// A `pattern` or `enum` constraint was violated (or the pattern itself
    /// does not compile).
    #[error("invalid format at {path}: {detail}")]
    InvalidFormat {
        /// Location of the offending value
        path: String,
        /// What failed to match
        detail: String,
    },
}

/// Validate `value` against `schema`.
///
/// A non-object schema (including `null`) accepts everything; this is how
/// tools registered without an input schema skip validation.
pub fn validate(schema: &Value, value: &Value) -> Result<(), ValidationError> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), ValidationError> {
    let schema = match schema {
        Value::Object(map) => map,
        _ => return Ok(()),
    };

    if let Some(Value::Array(permitted)) = schema.get("enum") {
        if !permitted.contains(value) {
            return Err(ValidationError::InvalidFormat {
                path: path.to_string(),
                detail: format!("{} is not one of the permitted values", value),
            });
        }
    }

    if let Some(Value::String(expected)) = schema.get("type") {
        if !type_matches(expected, value) {
            return Err(ValidationError::TypeMismatch {
                path: path.to_string(),
                expected: expected.clone(),
                found: json_type_name(value).to_string(),
            });
        }
    }

    if let Value::Object(object) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for field in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(field) {
                    return Err(ValidationError::RequiredFieldMissing {
                        path: path.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }

        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (name, subschema) in properties {
                if let Some(child) = object.get(name) {
                    validate_at(subschema, child, &format!("{}.{}", path, name))?;
                }
            }
        }
    }

    if let (Some(items), Value::Array(elements)) = (schema.get("items"), value) {
        for (index, element) in elements.iter().enumerate() {
            validate_at(items, element, &format!("{}[{}]", path, index))?;
        }
    }

    if let Value::Number(n) = value {
        let candidate = n.as_f64().unwrap_or(f64::NAN);
        if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
            if candidate < minimum {
                return Err(ValidationError::OutOfBounds {
                    path: path.to_string(),
                    detail: format!("{} is below minimum {}", n, minimum),
                });
            }
        }
        if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
            if candidate > maximum {
                return Err(ValidationError::OutOfBounds {
                    path: path.to_string(),
                    detail: format!("{} is above maximum {}", n, maximum),
                });
            }
        }
    }

    if let Value::String(s) = value {
        let length = s.chars().count();
        if let Some(min_length) = schema.get("minLength").and_then(Value::as_u64) {
            if (length as u64) < min_length {
                return Err(ValidationError::OutOfBounds {
                    path: path.to_string(),
                    detail: format!("length {} is below minLength {}", length, min_length),
                });
            }
        }
        if let Some(max_length) = schema.get("maxLength").and_then(Value::as_u64) {
            if (length as u64) > max_length {
                return Err(ValidationError::OutOfBounds {
                    path: path.to_string(),
                    detail: format!("length {} is above maxLength {}", length, max_length),
                });
            }
        }
        if let Some(Value::String(pattern)) = schema.get("pattern") {
            let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidFormat {
                path: path.to_string(),
                detail: format!("pattern {:?} does not compile: {}", pattern, e),
            })?;
            if !regex.is_match(s) {
                return Err(ValidationError::InvalidFormat {
                    path: path.to_string(),
                    detail: format!("{:?} does not match pattern {:?}", s, pattern),
                });
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            _ => false,
        },
        // Unknown type names constrain nothing, like unknown keywords.
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_schema_accepts_everything() {
        assert!(validate(&json!(null), &json!({"anything": [1, 2]})).is_ok());
        assert!(validate(&json!(null), &json!("text")).is_ok());
    }

    #[test]
    fn test_type_keyword() {
        let schema = json!({"type": "object"});
        assert!(validate(&schema, &json!({})).is_ok());
        let err = validate(&schema, &json!([1])).unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
    }

    #[test]
    fn test_integer_matches_whole_floats_only() {
        let schema = json!({"type": "integer"});
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(3.0)).is_ok());
        assert!(validate(&schema, &json!(3.5)).is_err());
        assert!(validate(&schema, &json!("3")).is_err());

        // number accepts integers, not the reverse
        assert!(validate(&json!({"type": "number"}), &json!(3)).is_ok());
    }

    #[test]
    fn test_required_fields() {
        let schema = json!({"type": "object", "required": ["path", "mode"]});
        assert!(validate(&schema, &json!({"path": "/x", "mode": 1})).is_ok());

        let err = validate(&schema, &json!({"path": "/x"})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::RequiredFieldMissing {
                path: "$".to_string(),
                field: "mode".to_string(),
            }
        );
    }

    #[test]
    fn test_properties_recurse_with_paths() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer", "minimum": 0},
                "name": {"type": "string"}
            }
        });
        assert!(validate(&schema, &json!({"count": 2, "name": "a"})).is_ok());
        // Properties not mentioned in the value are not required.
        assert!(validate(&schema, &json!({})).is_ok());

        let err = validate(&schema, &json!({"count": -1})).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfBounds { ref path, .. } if path == "$.count"));
    }

    #[test]
    fn test_items_applies_to_every_element() {
        let schema = json!({"type": "array", "items": {"type": "string", "minLength": 1}});
        assert!(validate(&schema, &json!(["a", "bc"])).is_ok());

        let err = validate(&schema, &json!(["a", ""])).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfBounds { ref path, .. } if path == "$[1]"));
    }

    #[test]
    fn test_numeric_bounds() {
        let schema = json!({"minimum": 1, "maximum": 10});
        assert!(validate(&schema, &json!(1)).is_ok());
        assert!(validate(&schema, &json!(10.0)).is_ok());
        assert!(validate(&schema, &json!(0)).is_err());
        assert!(validate(&schema, &json!(10.5)).is_err());
        // Bounds don't apply to non-numbers.
        assert!(validate(&schema, &json!("12")).is_ok());
    }

    #[test]
    fn test_string_lengths_count_chars() {
        let schema = json!({"minLength": 2, "maxLength": 3});
        assert!(validate(&schema, &json!("ab")).is_ok());
        assert!(validate(&schema, &json!("🦀🦀")).is_ok());
        assert!(validate(&schema, &json!("a")).is_err());
        assert!(validate(&schema, &json!("abcd")).is_err());
    }

    #[test]
    fn test_pattern() {
        let schema = json!({"pattern": "^[a-z]+\\.[a-z]+$"});
        assert!(validate(&schema, &json!("file.read")).is_ok());

        let err = validate(&schema, &json!("FileRead")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFormat { .. }));

        let broken = json!({"pattern": "("});
        let err = validate(&broken, &json!("x")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFormat { .. }));
    }

    #[test]
    fn test_enum_literals() {
        let schema = json!({"enum": ["read", "write", 3, null]});
        assert!(validate(&schema, &json!("read")).is_ok());
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(null)).is_ok());
        assert!(validate(&schema, &json!("execute")).is_err());
    }

    #[test]
    fn test_unknown_keywords_ignored() {
        let schema = json!({"type": "string", "format": "uri", "x-custom": 1});
        assert!(validate(&schema, &json!("anything")).is_ok());
    }

    #[test]
    fn test_no_coercion() {
        let schema = json!({"type": "number"});
        assert!(validate(&schema, &json!("3")).is_err());

        let schema = json!({"type": "boolean"});
        assert!(validate(&schema, &json!("true")).is_err());
    }
}
