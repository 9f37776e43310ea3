/// Type converter
///
/// Coerces resolved raw values into a node parameter's declared type. Trigger
/// payloads and static references are frequently stringly-typed, so every
/// conversion accepts the string form of its target type.

use crate::errors::ConversionError;
use crate::workflow::types::ParamType;
use serde_json::{Number, Value};

const TRUTHY: &[&str] = &["true", "1", "yes", "y", "on"];
const FALSY: &[&str] = &["false", "0", "no", "n", "off"];

/// Stateless value coercion
pub struct TypeConverter;

impl TypeConverter {
    /// Convert `value` to the declared parameter type
    pub fn convert(field: &str, value: Value, param_type: ParamType) -> Result<Value, ConversionError> {
        match param_type {
            ParamType::String => Ok(Value::String(Self::to_string(&value))),
            ParamType::Integer => Self::to_integer(field, &value).map(Value::from),
            ParamType::Float => Self::to_float(field, &value).and_then(|f| {
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| ConversionError::new(field, "float", &value))
            }),
            ParamType::Boolean => Self::to_boolean(field, &value).map(Value::Bool),
            ParamType::Array => Self::to_array(field, value).map(Value::Array),
            ParamType::Object => Self::to_object(field, value).map(Value::Object),
            ParamType::Any => Ok(value),
        }
    }

    /// Integral numbers pass through; floats without a fractional part and
    /// numeric strings are accepted.
    pub fn to_integer(field: &str, value: &Value) -> Result<i64, ConversionError> {
        let err = || ConversionError::new(field, "integer", value);
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(i)
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                            Ok(f as i64)
                        }
                        _ => Err(err()),
                    }
                }
            }
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| err()),
            _ => Err(err()),
        }
    }

    pub fn to_float(field: &str, value: &Value) -> Result<f64, ConversionError> {
        let err = || ConversionError::new(field, "float", value);
        match value {
            Value::Number(n) => n.as_f64().ok_or_else(err),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(f),
                _ => Err(err()),
            },
            _ => Err(err()),
        }
    }

    /// Booleans pass through; strings use a case-insensitive truthy/falsy
    /// vocabulary, and the integers 0 and 1 map to false and true.
    pub fn to_boolean(field: &str, value: &Value) -> Result<bool, ConversionError> {
        let err = || ConversionError::new(field, "boolean", value);
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(true),
                Some(0) => Ok(false),
                _ => Err(err()),
            },
            Value::String(s) => {
                let lowered = s.trim().to_lowercase();
                if TRUTHY.contains(&lowered.as_str()) {
                    Ok(true)
                } else if FALSY.contains(&lowered.as_str()) {
                    Ok(false)
                } else {
                    Err(err())
                }
            }
            _ => Err(err()),
        }
    }

    pub fn to_array(field: &str, value: Value) -> Result<Vec<Value>, ConversionError> {
        match value {
            Value::Array(items) => Ok(items),
            Value::String(ref s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(items)) => Ok(items),
                _ => Err(ConversionError::new(field, "array", &value)),
            },
            other => Err(ConversionError::new(field, "array", &other)),
        }
    }

    pub fn to_object(
        field: &str,
        value: Value,
    ) -> Result<serde_json::Map<String, Value>, ConversionError> {
        match value {
            Value::Object(map) => Ok(map),
            Value::String(ref s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(ConversionError::new(field, "object", &value)),
            },
            other => Err(ConversionError::new(field, "object", &other)),
        }
    }

    /// Strings are returned as-is; everything else is rendered as JSON.
    pub fn to_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers() {
        assert_eq!(TypeConverter::to_integer("f", &json!("42")).unwrap(), 42);
        assert_eq!(TypeConverter::to_integer("f", &json!(" -7 ")).unwrap(), -7);
        assert_eq!(TypeConverter::to_integer("f", &json!(12)).unwrap(), 12);
        assert_eq!(TypeConverter::to_integer("f", &json!(3.0)).unwrap(), 3);
        assert!(TypeConverter::to_integer("f", &json!(3.5)).is_err());
        assert!(TypeConverter::to_integer("f", &json!(true)).is_err());

        let err = TypeConverter::to_integer("f", &json!("abc")).unwrap_err();
        assert_eq!(err.field, "f");
        assert_eq!(err.expected_type, "integer");
        assert_eq!(err.actual_value, "\"abc\"");
    }

    #[test]
    fn floats() {
        assert_eq!(TypeConverter::to_float("f", &json!("2.5")).unwrap(), 2.5);
        assert_eq!(TypeConverter::to_float("f", &json!(4)).unwrap(), 4.0);
        assert!(TypeConverter::to_float("f", &json!("NaN")).is_err());
        assert!(TypeConverter::to_float("f", &json!("1.2.3")).is_err());
    }

    #[test]
    fn booleans() {
        assert!(TypeConverter::to_boolean("f", &json!("true")).unwrap());
        assert!(TypeConverter::to_boolean("f", &json!("TRUE")).unwrap());
        assert!(TypeConverter::to_boolean("f", &json!("1")).unwrap());
        assert!(!TypeConverter::to_boolean("f", &json!("False")).unwrap());
        assert!(!TypeConverter::to_boolean("f", &json!("0")).unwrap());
        assert!(!TypeConverter::to_boolean("f", &json!(0)).unwrap());
        assert!(TypeConverter::to_boolean("f", &json!(false)).is_ok());
        assert!(TypeConverter::to_boolean("f", &json!("maybe")).is_err());
        assert!(TypeConverter::to_boolean("f", &json!(2)).is_err());
    }

    #[test]
    fn arrays_and_objects() {
        assert_eq!(
            TypeConverter::to_array("f", json!("[\"a\",\"b\"]")).unwrap(),
            vec![json!("a"), json!("b")]
        );
        assert_eq!(TypeConverter::to_array("f", json!([1])).unwrap(), vec![json!(1)]);
        assert!(TypeConverter::to_array("f", json!("{\"a\":1}")).is_err());
        assert!(TypeConverter::to_array("f", json!("[1,")).is_err());

        let obj = TypeConverter::to_object("f", json!("{\"a\":1}")).unwrap();
        assert_eq!(obj["a"], json!(1));
        assert!(TypeConverter::to_object("f", json!("[]")).is_err());
        assert!(TypeConverter::to_object("f", json!(5)).is_err());
    }

    #[test]
    fn convert_dispatches_on_declared_type() {
        assert_eq!(
            TypeConverter::convert("f", json!("42"), ParamType::Integer).unwrap(),
            json!(42)
        );
        assert_eq!(
            TypeConverter::convert("f", json!(42), ParamType::String).unwrap(),
            json!("42")
        );
        assert_eq!(
            TypeConverter::convert("f", json!("0.5"), ParamType::Float).unwrap(),
            json!(0.5)
        );
        assert_eq!(
            TypeConverter::convert("f", json!({"k": [1]}), ParamType::Any).unwrap(),
            json!({"k": [1]})
        );
    }
}
