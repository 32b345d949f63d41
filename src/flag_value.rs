use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::util::f64_to_i64_safe;

/// A value a flag can serve. Variations are arbitrary JSON; the typed variants let callers read
/// booleans, strings and numbers without going through `serde_json`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for FlagValue {
                fn from(value: $source) -> Self {
                    FlagValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    String => Str,
    &str => Str,
    f64 => Float,
    i64 => Int,
}

impl From<serde_json::Value> for FlagValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Bool(b) => FlagValue::Bool(b),
            Value::String(s) => FlagValue::Str(s),
            Value::Number(n) => match n.as_f64() {
                Some(f) => FlagValue::Float(f),
                None => {
                    warn!("number {} has no f64 form, keeping it as JSON", n);
                    FlagValue::Json(Value::Number(n))
                }
            },
            Value::Null | Value::Object(_) | Value::Array(_) => FlagValue::Json(v),
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(b) => fmt::Display::fmt(b, f),
            FlagValue::Str(s) => f.write_str(s),
            FlagValue::Float(n) => fmt::Display::fmt(n, f),
            FlagValue::Int(i) => fmt::Display::fmt(i, f),
            FlagValue::Json(v) => fmt::Display::fmt(v, f),
        }
    }
}

impl FlagValue {
    fn mismatch<T>(&self, wanted: &str) -> Option<T> {
        warn!("variation is not {} but {:?}", wanted, self);
        None
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => self.mismatch("a bool"),
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => self.mismatch("a string"),
        }
    }

    /// Integers widen to floats; JSON numbers always deserialize as `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Float(f) => Some(*f),
            FlagValue::Int(i) => Some(*i as f64),
            _ => self.mismatch("numeric"),
        }
    }

    /// Floats are truncated toward zero, and only if they lie within the range where every
    /// integer is exactly representable as a double.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            FlagValue::Float(f) => f64_to_i64_safe(*f),
            _ => self.mismatch("numeric"),
        }
    }

    pub fn as_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => Some(Value::from(*b)),
            FlagValue::Str(s) => Some(Value::from(s.as_str())),
            FlagValue::Float(f) => Some(Value::from(*f)),
            FlagValue::Int(i) => Some(Value::from(*i)),
            FlagValue::Json(v) => Some(v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    // doubles hold every integer up to 2^53 - 1 exactly
    #[test_case(1.99, Some(1); "truncates")]
    #[test_case(-1.99, Some(-1); "truncates toward zero")]
    #[test_case(9007199254740991.0, Some(9007199254740991); "largest exact")]
    #[test_case(9007199254740992.0, None; "past largest exact")]
    #[test_case(-9007199254740991.0, Some(-9007199254740991); "smallest exact")]
    #[test_case(-9007199254740992.0, None; "past smallest exact")]
    fn float_to_int_bounds(float: f64, expected: Option<i64>) {
        assert_that!(FlagValue::Float(float).as_int()).is_equal_to(expected);
    }

    #[test_case(json!(true), FlagValue::Bool(true))]
    #[test_case(json!("on"), FlagValue::Str("on".into()))]
    #[test_case(json!(3), FlagValue::Float(3.0))]
    #[test_case(json!(1.5), FlagValue::Float(1.5))]
    #[test_case(json!(null), FlagValue::Json(json!(null)))]
    #[test_case(json!({"a": [1, 2]}), FlagValue::Json(json!({"a": [1, 2]})))]
    fn deserializes_variations(json: serde_json::Value, expected: FlagValue) {
        let value: FlagValue = serde_json::from_value(json.clone()).unwrap();
        assert_that!(value).is_equal_to(&expected);
        assert_that!(FlagValue::from(json)).is_equal_to(expected);
    }

    #[test]
    fn typed_accessors_reject_other_types() {
        let value = FlagValue::from("text");
        assert_that!(value.as_string()).contains_value("text".to_string());
        assert_that!(value.as_bool()).is_none();
        assert_that!(value.as_float()).is_none();
        assert_that!(value.as_int()).is_none();
        assert_that!(value.as_json()).contains_value(json!("text"));
    }

    #[test]
    fn numbers_convert_between_int_and_float() {
        assert_that!(FlagValue::Int(7).as_float()).contains_value(7.0);
        assert_that!(FlagValue::Float(7.9).as_int()).contains_value(7);
    }

    #[test]
    fn displays_plain_values() {
        assert_eq!(FlagValue::from("blue").to_string(), "blue");
        assert_eq!(FlagValue::Bool(false).to_string(), "false");
        assert_eq!(FlagValue::Json(json!([1])).to_string(), "[1]");
    }
}
