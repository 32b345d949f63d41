use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::f64_to_i64_safe;

lazy_static! {
    // Leading "major", "major.minor" or "major.minor.patch" of a version string.
    static ref VERSION_PREFIX: Regex = Regex::new(r"^\d+(\.\d+){0,2}").unwrap();
}

/// A value that can be stored in a [crate::Context] attribute or listed in a clause.
///
/// The model follows JSON types: there is a single numeric type, so `1` and `1.0` are the same
/// value, while `1` and `"1"` are not.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Array(Vec<AttributeValue>),
    Number(f64),
    Bool(bool),
    Object(HashMap<String, AttributeValue>),
    Null,
}

macro_rules! impl_from_scalar {
    ($($source:ty => |$v:ident| $build:expr),* $(,)?) => {
        $(
            impl From<$source> for AttributeValue {
                fn from($v: $source) -> Self {
                    $build
                }
            }
        )*
    };
}

impl_from_scalar! {
    &str => |s| AttributeValue::String(s.to_owned()),
    String => |s| AttributeValue::String(s),
    bool => |b| AttributeValue::Bool(b),
    f64 => |f| AttributeValue::Number(f),
    i64 => |i| AttributeValue::Number(i as f64),
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(items: Vec<T>) -> Self {
        Self::from_iter(items)
    }
}

impl<S, T> From<HashMap<S, T>> for AttributeValue
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from(entries: HashMap<S, T>) -> Self {
        Self::from_iter(entries)
    }
}

/// Collects into an [AttributeValue::Array].
impl<T> FromIterator<T> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(items: I) -> Self {
        let values = items.into_iter().map(Into::into).collect();
        AttributeValue::Array(values)
    }
}

/// Collects key/value pairs into an [AttributeValue::Object].
impl<S, T> FromIterator<(S, T)> for AttributeValue
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = (S, T)>>(entries: I) -> Self {
        let fields = entries
            .into_iter()
            .map(|(name, value)| (String::from(name), AttributeValue::from(value)))
            .collect();
        AttributeValue::Object(fields)
    }
}

impl From<&Value> for AttributeValue {
    fn from(json: &Value) -> Self {
        match json {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Number(n) => n.as_f64().map(AttributeValue::Number).unwrap_or_else(|| {
                warn!("number {} has no f64 form, keeping it as a string", n);
                AttributeValue::String(n.to_string())
            }),
            Value::Array(items) => items.iter().collect(),
            Value::Object(fields) => fields.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        }
    }
}

impl AttributeValue {
    /// The string inside a [AttributeValue::String]. Other types are not converted.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        if let AttributeValue::Number(f) = self {
            Some(*f)
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let AttributeValue::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Reads a timestamp. Numbers are Unix epoch milliseconds, with any fraction truncated
    /// toward zero, and strings must be RFC 3339 (e.g. `"2016-04-16T17:09:12.759-07:00"`).
    /// Anything else, including out-of-range milliseconds, is `None`.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Number(millis) => {
                let millis = f64_to_i64_safe(*millis)?;
                Utc.timestamp_millis_opt(millis).single()
            }
            AttributeValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Reads a string as a semantic version.
    ///
    /// `"2"` and `"2.1"` are accepted as `2.0.0` and `2.1.0`, with any pre-release suffix kept.
    /// Build metadata is cleared because it takes no part in version ordering.
    pub fn as_semver(&self) -> Option<semver::Version> {
        let text = self.as_str()?;
        let mut version = semver::Version::parse(text)
            .ok()
            .or_else(|| parse_partial_semver(text))?;
        version.build = semver::BuildMetadata::EMPTY;
        Some(version)
    }

    /// Returns true if `p` holds for this value or, for an array, for any of its elements.
    ///
    /// Null never satisfies the predicate, so a null attribute behaves like a missing one.
    pub fn any<P>(&self, p: P) -> bool
    where
        P: Fn(&AttributeValue) -> bool,
    {
        match self {
            AttributeValue::Null => false,
            AttributeValue::Array(values) => values.iter().any(p),
            _ => p(self),
        }
    }

    /// The string form of this value used as bucketing input. Only strings and integral
    /// numbers can be bucketed.
    #[allow(clippy::float_cmp)]
    pub(crate) fn as_bucketable(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(f) => f64_to_i64_safe(*f)
                .filter(|i| *i as f64 == *f)
                .map(|i| i.to_string()),
            _ => None,
        }
    }
}

fn parse_partial_semver(text: &str) -> Option<semver::Version> {
    let prefix = VERSION_PREFIX.find(text)?;
    let dots = prefix.as_str().matches('.').count();
    let mut padded = String::with_capacity(text.len() + 4);
    padded.push_str(prefix.as_str());
    for _ in dots..2 {
        padded.push_str(".0");
    }
    padded.push_str(&text[prefix.end()..]);
    semver::Version::parse(&padded).ok()
}
