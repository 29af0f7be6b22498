use serde_json::{Number, Value};

use skein_core::graph::ValueType;

/// Format a raw value to its declared type.
///
/// Never fails: a value that cannot be converted is passed through unchanged,
/// except numbers, where an empty or unparsable string becomes absent.
pub fn coerce(value: Value, value_type: ValueType) -> Option<Value> {
    if value.is_null() {
        return Some(value);
    }

    match value_type {
        ValueType::Any => Some(value),
        ValueType::String => Some(match value {
            Value::String(_) => value,
            other => Value::String(other.to_string()),
        }),
        ValueType::Number => to_number(value),
        ValueType::Boolean => Some(Value::Bool(truthy(&value))),
        ValueType::Object => Some(match value {
            Value::String(ref s) => parse_json_like(s, '{').unwrap_or(value),
            other => other,
        }),
        t if t.is_array() => Some(match value {
            Value::String(ref s) => parse_json_like(s, '[').unwrap_or(value),
            other => other,
        }),
        _ => Some(value),
    }
}

fn to_number(value: Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value),
        Value::Bool(b) => Some(Value::from(u8::from(b))),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        }
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn parse_json_like(text: &str, opener: char) -> Option<Value> {
    let trimmed = text.trim();
    if !trimmed.starts_with(opener) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn any_and_null_pass_through() {
        assert_eq!(coerce(json!({"a": 1}), ValueType::Any), Some(json!({"a": 1})));
        assert_eq!(coerce(Value::Null, ValueType::Number), Some(Value::Null));
    }

    #[test]
    fn strings() {
        assert_eq!(coerce(json!("x"), ValueType::String), Some(json!("x")));
        assert_eq!(coerce(json!(12), ValueType::String), Some(json!("12")));
        assert_eq!(coerce(json!(true), ValueType::String), Some(json!("true")));
        assert_eq!(coerce(json!({"a": 1}), ValueType::String), Some(json!("{\"a\":1}")));
    }

    #[test]
    fn numbers() {
        assert_eq!(coerce(json!("42"), ValueType::Number), Some(json!(42)));
        assert_eq!(coerce(json!(" 4.5 "), ValueType::Number), Some(json!(4.5)));
        assert_eq!(coerce(json!(""), ValueType::Number), None);
        assert_eq!(coerce(json!("abc"), ValueType::Number), None);
        assert_eq!(coerce(json!(true), ValueType::Number), Some(json!(1)));
    }

    #[test]
    fn booleans() {
        assert_eq!(coerce(json!("TRUE"), ValueType::Boolean), Some(json!(true)));
        assert_eq!(coerce(json!("yes"), ValueType::Boolean), Some(json!(false)));
        assert_eq!(coerce(json!(0), ValueType::Boolean), Some(json!(false)));
        assert_eq!(coerce(json!([]), ValueType::Boolean), Some(json!(true)));
    }

    #[test]
    fn objects_and_arrays_parse_json_text() {
        assert_eq!(coerce(json!("{\"a\":1}"), ValueType::Object), Some(json!({"a": 1})));
        assert_eq!(coerce(json!(" [1,2] "), ValueType::ArrayNumber), Some(json!([1, 2])));
        assert_eq!(coerce(json!("plain"), ValueType::Object), Some(json!("plain")));
        assert_eq!(coerce(json!("{broken"), ValueType::Object), Some(json!("{broken")));
        assert_eq!(coerce(json!([1]), ValueType::ArrayAny), Some(json!([1])));
    }
}
