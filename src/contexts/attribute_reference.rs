use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Clone, Hash, PartialEq, Eq, Debug, thiserror::Error)]
enum Error {
    #[error("reference is empty")]
    Empty,
    #[error("reference has a '~' not followed by '0' or '1'")]
    InvalidEscapeSequence,
    #[error("reference has an empty path component")]
    DoubleOrTrailingSlash,
}

/// Identifies an attribute, or a value nested inside an attribute, of a [crate::Context].
///
/// A string that does not start with '/' is the literal name of a top-level attribute. A string
/// that starts with '/' is a slash-delimited path whose first component names an attribute and
/// whose later components name properties of nested JSON objects; within a component, "~0"
/// stands for '~' and "~1" for '/'.
///
/// Parsing happens once, at construction, so a clause or rollout can reuse its reference for
/// every evaluation.
///
/// # Example
/// ```
/// # use ld_evaluation_engine::{AttributeValue, ContextBuilder, Reference};
/// # use std::collections::HashMap;
/// let mut address = HashMap::new();
/// address.insert("city", "Westview");
/// let context = ContextBuilder::new("123")
///     .set_value("address", address.into())
///     .set_string("a/b", "ok")
///     .build()
///     .unwrap();
///
/// assert_eq!(context.get_value(&Reference::new("/address/city")),
///     Some(AttributeValue::String("Westview".to_owned())));
/// assert_eq!(context.get_value(&Reference::new("a/b")),
///     Some(AttributeValue::String("ok".to_owned())));
/// assert_eq!(context.get_value(&Reference::new("/a~1b")),
///     Some(AttributeValue::String("ok".to_owned())));
/// ```
#[derive(Clone, Hash, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub struct Reference {
    variant: Variant,
    input: String,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug)]
enum Variant {
    PlainName,
    Pointer(Vec<String>),
    Error(Error),
}

impl Reference {
    /// Parses a reference. Invalid input still produces a `Reference`, which keeps the original
    /// string and reports [Reference::is_valid] as false.
    pub fn new<S: AsRef<str>>(value: S) -> Self {
        let value = value.as_ref();
        let variant = Self::parse(value);
        Self {
            variant,
            input: value.to_owned(),
        }
    }

    fn parse(value: &str) -> Variant {
        if value.is_empty() || value == "/" {
            return Variant::Error(Error::Empty);
        }

        let path = match value.strip_prefix('/') {
            Some(path) => path,
            None => return Variant::PlainName,
        };

        path.split('/')
            .map(|part| {
                if part.is_empty() {
                    Err(Error::DoubleOrTrailingSlash)
                } else {
                    Reference::unescape_path(part)
                }
            })
            .collect::<Result<Vec<String>, Error>>()
            .map_or_else(Variant::Error, Variant::Pointer)
    }

    /// Returns true if the reference is valid.
    pub fn is_valid(&self) -> bool {
        !matches!(&self.variant, Variant::Error(_))
    }

    /// Describes why the reference is invalid, or returns an empty string if it is valid.
    pub fn error(&self) -> String {
        match &self.variant {
            Variant::Error(e) => e.to_string(),
            _ => String::new(),
        }
    }

    /// Returns the number of path components: 1 for a plain name, the number of slash-delimited
    /// components for a path, and 0 for an invalid reference.
    ///
    /// ```
    /// # use ld_evaluation_engine::Reference;
    /// assert_eq!(Reference::new("a").depth(), 1);
    /// assert_eq!(Reference::new("/a/b").depth(), 2);
    /// ```
    pub fn depth(&self) -> usize {
        match &self.variant {
            Variant::Pointer(components) => components.len(),
            Variant::PlainName => 1,
            Variant::Error(_) => 0,
        }
    }

    /// Retrieves a single unescaped path component, or None if `index` is out of range.
    ///
    /// ```
    /// # use ld_evaluation_engine::Reference;
    /// assert_eq!(Reference::new("a").component(0), Some("a"));
    /// assert_eq!(Reference::new("/a/b").component(1), Some("b"));
    /// assert_eq!(Reference::new("/a/b").component(2), None);
    /// ```
    pub fn component(&self, index: usize) -> Option<&str> {
        match (&self.variant, index) {
            (Variant::Pointer(components), _) => components.get(index).map(String::as_str),
            (Variant::PlainName, 0) => Some(&self.input),
            _ => None,
        }
    }

    // True when the reference addresses the context's "kind" attribute.
    pub(crate) fn is_kind(&self) -> bool {
        matches!((self.depth(), self.component(0)), (1, Some("kind")))
    }

    fn unescape_path(path: &str) -> Result<String, Error> {
        if !path.contains('~') {
            return Ok(path.to_string());
        }

        let mut out = String::with_capacity(path.len());
        let mut chars = path.chars();
        while let Some(c) = chars.next() {
            if c != '~' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(Error::InvalidEscapeSequence),
            }
        }

        Ok(out)
    }
}

impl Default for Reference {
    /// A default [Reference] is empty and invalid.
    fn default() -> Self {
        Reference::new("")
    }
}

/// Displays the input string used to construct the [Reference].
impl Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.input)
    }
}

impl<S> From<S> for Reference
where
    S: AsRef<str>,
{
    fn from(reference: S) -> Self {
        Reference::new(reference)
    }
}

impl From<Reference> for String {
    fn from(r: Reference) -> Self {
        r.input
    }
}

/// An attribute name from data that predates context kinds. It always names a top-level
/// attribute, even when it begins with '/'.
#[derive(Debug, PartialEq)]
pub(crate) struct AttributeName(String);

impl AttributeName {
    pub(crate) fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Reference {
    // Flag and segment data written since context kinds existed uses reference syntax;
    // older data, which has no context kind beside the attribute, names attributes literally.
    pub(crate) fn from_flag_data(attribute: String, has_context_kind: bool) -> Self {
        if has_context_kind {
            Reference::new(attribute)
        } else {
            Reference::from(AttributeName::new(attribute))
        }
    }
}

impl From<AttributeName> for Reference {
    /// A name starting with '/' would otherwise be read as a path, so it is escaped into a
    /// single-component path instead.
    fn from(name: AttributeName) -> Self {
        if !name.0.starts_with('/') {
            return Self::new(name.0);
        }
        let mut escaped = name.0.replace('~', "~0").replace('/', "~1");
        escaped.insert(0, '/');
        Self::new(escaped)
    }
}

#[cfg(test)]
pub(crate) mod proptest_generators {
    use super::{AttributeName, Reference};
    use proptest::prelude::*;

    prop_compose! {
        // Either a plain name (no leading slash) or a path of non-empty, correctly escaped
        // components.
        pub(crate) fn any_valid_ref_string()(s in "([^/].*|(/([^/~]|~[01])+)+)") -> String {
            s
        }
    }

    prop_compose! {
        pub(crate) fn any_valid_ref()(s in any_valid_ref_string()) -> Reference {
            Reference::new(s)
        }
    }

    prop_compose! {
        pub(crate) fn any_ref_from_attribute_name()(s in any_valid_ref_string()) -> Reference {
            Reference::from(AttributeName(s))
        }
    }
}
