use super::attribute_reference::Reference;
use crate::AttributeValue;
use log::warn;
use maplit::hashmap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Kind describes the type of entity represented by a [Context].
///
/// The meaning of a kind is up to the application. The default kind is ["user"](Kind::user); to
/// construct any other kind, see [Kind::try_from].
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Kind(Cow<'static, str>);

const USER_KIND: &str = "user";
const MULTI_KIND: &str = "multi";

impl Kind {
    pub fn is_user(&self) -> bool {
        self == USER_KIND
    }

    /// The kind of every multi-kind context.
    pub fn is_multi(&self) -> bool {
        self == MULTI_KIND
    }

    pub fn user() -> Self {
        Self(Cow::Borrowed(USER_KIND))
    }

    pub(crate) fn multi() -> Self {
        Self(Cow::Borrowed(MULTI_KIND))
    }

    #[cfg(test)]
    // unvalidated
    pub(crate) fn from(s: &str) -> Self {
        Kind(Cow::Owned(s.to_owned()))
    }

    fn validate(name: &str) -> Result<(), String> {
        if name.is_empty() {
            return Err("context kind cannot be empty".to_string());
        }
        if name == "kind" || name == MULTI_KIND {
            return Err(format!("context kind cannot be '{}'", name));
        }
        match name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')))
        {
            Some(c) => Err(format!("context kind contains disallowed character '{}'", c)),
            None => Ok(()),
        }
    }
}

impl AsRef<str> for Kind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for Kind {
    fn eq(&self, other: &&str) -> bool {
        self.as_ref() == *other
    }
}

impl PartialEq<str> for Kind {
    fn eq(&self, other: &str) -> bool {
        self.as_ref() == other
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::user()
    }
}

impl TryFrom<String> for Kind {
    type Error = String;

    /// A valid kind is non-empty, is neither "kind" nor "multi", and contains only ASCII
    /// letters, digits, `-`, `.` and `_`.
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == USER_KIND {
            return Ok(Kind::user());
        }
        Kind::validate(&value)?;
        Ok(Kind(Cow::Owned(value)))
    }
}

impl TryFrom<&str> for Kind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<Kind> for String {
    fn from(kind: Kind) -> Self {
        kind.0.into_owned()
    }
}


/// Context is the subject of a flag evaluation: a collection of attributes describing one or
/// more entities, each identified by a [Kind] and a key.
///
/// A single-kind context is created with [crate::ContextBuilder]; a context made of several
/// kinds at once (say a user and the device they are on) is created with
/// [crate::MultiContextBuilder]. Contexts can also be deserialized from JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    // For multi-kind contexts this is always Kind::multi().
    pub(super) kind: Kind,
    // Present only for multi-kind contexts, sorted by kind.
    pub(super) contexts: Option<Vec<Context>>,
    pub(super) name: Option<String>,
    pub(super) anonymous: bool,
    pub(super) attributes: HashMap<String, AttributeValue>,
    // Only legacy user JSON can set this; it perturbs non-experiment bucketing.
    pub(super) secondary: Option<String>,
    // Empty for multi-kind contexts.
    pub(super) key: String,
}

impl Context {
    /// Returns true if the context is a multi-kind context.
    pub fn is_multi(&self) -> bool {
        self.kind.is_multi()
    }

    /// Looks up the value of an attribute, or of a property nested within one, by reference.
    ///
    /// Built-in attributes ("kind", "key", "name", "anonymous") are addressable alongside custom
    /// ones. On a multi-kind context the only addressable attribute is "kind"; use
    /// [Context::as_kind] to select one of its contexts first.
    pub fn get_value(&self, reference: &Reference) -> Option<AttributeValue> {
        if !reference.is_valid() {
            return None;
        }
        if self.is_multi() {
            if !reference.is_kind() {
                warn!("only 'kind' can be read from a multi-kind context");
                return None;
            }
            return Some(AttributeValue::String(self.kind.to_string()));
        }

        let root = self.top_level_attribute(reference.component(0)?)?;
        (1..reference.depth()).try_fold(root, |value, depth| match value {
            AttributeValue::Object(mut fields) => fields.remove(reference.component(depth)?),
            _ => None,
        })
    }

    /// Empty for a multi-kind context, which has no key of its own.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    /// Returns the single-kind context of the given kind: `self` if it is that kind, or the
    /// matching member of a multi-kind context.
    pub fn as_kind(&self, kind: &Kind) -> Option<&Context> {
        match &self.contexts {
            Some(contexts) => contexts.iter().find(|c| c.kind() == kind),
            None => (self.kind == *kind).then_some(self),
        }
    }

    /// Every kind in this context, mapped to that kind's key.
    pub fn context_keys(&self) -> HashMap<&Kind, &str> {
        match &self.contexts {
            Some(contexts) => contexts
                .iter()
                .map(|context| (context.kind(), context.key()))
                .collect(),
            None => hashmap! { self.kind() => self.key() },
        }
    }

    /// Kinds in sorted order for a multi-kind context.
    pub fn kinds(&self) -> Vec<&Kind> {
        match &self.contexts {
            Some(contexts) => contexts.iter().map(Context::kind).collect(),
            None => vec![self.kind()],
        }
    }

    pub(crate) fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    fn top_level_attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "kind" => Some(AttributeValue::String(self.kind.to_string())),
            "key" => Some(AttributeValue::String(self.key.clone())),
            "name" => self.name.clone().map(AttributeValue::String),
            "anonymous" => Some(AttributeValue::Bool(self.anonymous)),
            _ => self.attributes.get(name).cloned(),
        }
    }
}
