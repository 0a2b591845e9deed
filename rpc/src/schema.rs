//! Runtime validation of open parameter maps against tool input schemas.
//!
//! The validation contract is the JSON Schema subset `type`, `enum`,
//! `minimum`, `maximum`, `required` and `default`. Values are coerced where
//! a lossless conversion exists (string digits to integers, integral numbers
//! to integers, `"true"`/`"false"` to booleans); everything else is reported
//! as a validation error. Parameters not mentioned by the schema pass
//! through untouched.

use serde_json::{Map, Number, Value};

/// Validate `params` against `schema`, returning the coerced map and the
/// list of violations. An empty error list means the map is usable as the
/// handler's validated parameters.
pub fn validate_params(params: &Value, schema: &Value) -> (Map<String, Value>, Vec<String>) {
    let mut errors = Vec::new();
    let mut out = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            errors.push(format!("parameters must be an object, got {}", type_name(other)));
            return (Map::new(), errors);
        }
    };

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return (out, errors);
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, prop) in properties {
        match out.get(name).cloned() {
            Some(Value::Null) | None => {
                if required.contains(&name.as_str()) {
                    errors.push(format!("missing required parameter '{name}'"));
                } else if let Some(default) = prop.get("default") {
                    out.insert(name.clone(), default.clone());
                }
            }
            Some(value) => match coerce(&value, prop) {
                Ok(coerced) => {
                    if let Some(err) = check_bounds(name, &coerced, prop) {
                        errors.push(err);
                    } else if let Some(err) = check_enum(name, &coerced, prop) {
                        errors.push(err);
                    } else {
                        out.insert(name.clone(), coerced);
                    }
                }
                Err(expected) => {
                    errors.push(format!(
                        "parameter '{name}' expected {expected}, got {}",
                        type_name(&value)
                    ));
                }
            },
        }
    }

    (out, errors)
}

/// Server-side gate: either the coerced params object or the violation list.
pub fn check_params(params: Option<&Value>, schema: &Value) -> Result<Value, Vec<String>> {
    let params = params.cloned().unwrap_or(Value::Null);
    let (map, errors) = validate_params(&params, schema);
    if errors.is_empty() {
        Ok(Value::Object(map))
    } else {
        Err(errors)
    }
}

fn declared_types(prop: &Value) -> Vec<&str> {
    match prop.get("type") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn coerce(value: &Value, prop: &Value) -> Result<Value, String> {
    let types = declared_types(prop);
    if types.is_empty() {
        return Ok(value.clone());
    }
    // Accept the value as-is when it already matches one declared type.
    for ty in &types {
        if matches_type(value, ty) {
            return Ok(value.clone());
        }
    }
    // Otherwise try coercions toward the first non-null declared type.
    let target = types.iter().find(|t| **t != "null").copied().unwrap_or("null");
    match (target, value) {
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| "integer".to_string()),
        ("integer", Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => Ok(Value::Number((f as i64).into())),
            _ => Err("integer".to_string()),
        },
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| "number".to_string()),
        ("boolean", Value::String(s)) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err("boolean".to_string()),
        },
        ("string", Value::Number(n)) => Ok(Value::String(n.to_string())),
        (expected, _) => Err(expected.to_string()),
    }
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check_bounds(name: &str, value: &Value, prop: &Value) -> Option<String> {
    let actual = value.as_f64()?;
    if let Some(min) = prop.get("minimum").and_then(Value::as_f64) {
        if actual < min {
            return Some(format!("parameter '{name}' below minimum {min}"));
        }
    }
    if let Some(max) = prop.get("maximum").and_then(Value::as_f64) {
        if actual > max {
            return Some(format!("parameter '{name}' above maximum {max}"));
        }
    }
    None
}

fn check_enum(name: &str, value: &Value, prop: &Value) -> Option<String> {
    let choices = prop.get("enum").and_then(Value::as_array)?;
    if choices.contains(value) {
        None
    } else {
        Some(format!("parameter '{name}' is not one of the allowed choices"))
    }
}

fn type_name(value: &Value) -> &'static str {
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

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["play", "pause", "stop"]},
                "level": {"type": "integer", "minimum": 0, "maximum": 100},
                "device": {"type": "string", "default": "speakers"},
                "shuffle": {"type": "boolean"}
            },
            "required": ["action"]
        })
    }

    #[test]
    fn accepts_valid_params_and_applies_defaults() {
        let (out, errors) = validate_params(&json!({"action": "play", "level": 30}), &schema());
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get("device"), Some(&json!("speakers")));
        assert_eq!(out.get("level"), Some(&json!(30)));
    }

    #[test]
    fn coerces_string_digits_and_bool_words() {
        let (out, errors) = validate_params(
            &json!({"action": "play", "level": "55", "shuffle": "true"}),
            &schema(),
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(out.get("level"), Some(&json!(55)));
        assert_eq!(out.get("shuffle"), Some(&json!(true)));
    }

    #[test]
    fn reports_missing_required() {
        let (_, errors) = validate_params(&json!({"level": 5}), &schema());
        assert_eq!(errors, vec!["missing required parameter 'action'".to_string()]);
    }

    #[test]
    fn rejects_out_of_range_and_bad_choice() {
        let (_, errors) = validate_params(&json!({"action": "rewind", "level": 500}), &schema());
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("above maximum")));
        assert!(errors.iter().any(|e| e.contains("allowed choices")));
    }

    #[test]
    fn unknown_params_pass_through() {
        let (out, errors) =
            validate_params(&json!({"action": "play", "session_id": "s-1"}), &schema());
        assert!(errors.is_empty());
        assert_eq!(out.get("session_id"), Some(&json!("s-1")));
    }

    #[test]
    fn nullable_type_arrays_are_accepted() {
        let schema = json!({
            "properties": {"target": {"type": ["string", "null"]}},
        });
        let (out, errors) = validate_params(&json!({"target": "jazz"}), &schema);
        assert!(errors.is_empty());
        assert_eq!(out.get("target"), Some(&json!("jazz")));
    }

    #[test]
    fn non_object_params_are_rejected() {
        let result = check_params(Some(&json!([1, 2])), &schema());
        assert!(result.is_err());
    }
}
