use std::collections::HashMap;

use itertools::Itertools;
use log::warn;

use super::context::{Context, Kind};
use crate::AttributeValue;

/// Builds a single-kind [Context] with a given key.
///
/// Unless changed, the context is of kind "user", is not anonymous, and has no attributes other
/// than its key. To combine several kinds into one context see [MultiContextBuilder].
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    kind: String,
    key: String,
    name: Option<String>,
    anonymous: bool,
    secondary: Option<String>,
    attributes: HashMap<String, AttributeValue>,
    // legacy user JSON may carry an empty key
    allow_empty_key: bool,
}

impl ContextBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            kind: Kind::user().to_string(),
            key: key.into(),
            name: None,
            anonymous: false,
            secondary: None,
            attributes: HashMap::new(),
            allow_empty_key: false,
        }
    }

    /// Sets the context's kind, "user" by default. An invalid kind (see [Kind::try_from]) is
    /// reported when [ContextBuilder::build] is called.
    pub fn kind(&mut self, kind: impl Into<String>) -> &mut Self {
        self.kind = kind.into();
        self
    }

    /// The key must not be empty by the time [ContextBuilder::build] runs.
    pub fn key(&mut self, key: impl Into<String>) -> &mut Self {
        self.key = key.into();
        self
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Anonymous contexts expose this flag to clauses as the "anonymous" attribute.
    pub fn anonymous(&mut self, value: bool) -> &mut Self {
        self.anonymous = value;
        self
    }

    pub fn set_bool(&mut self, attribute_name: &str, value: bool) -> &mut Self {
        self.set_value(attribute_name, value.into())
    }

    /// Numbers have a single type, so there is no separate integer setter.
    pub fn set_float(&mut self, attribute_name: &str, value: f64) -> &mut Self {
        self.set_value(attribute_name, value.into())
    }

    pub fn set_string(&mut self, attribute_name: &str, value: impl Into<String>) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::String(value.into()))
    }

    /// Like [ContextBuilder::try_set_value], silently dropping rejected values.
    pub fn set_value(&mut self, attribute_name: &str, value: AttributeValue) -> &mut Self {
        self.try_set_value(attribute_name, value);
        self
    }

    /// Sets any attribute and reports whether the value was accepted.
    ///
    /// "kind" and "key" only take strings, "name" a string or null, and "anonymous" a boolean.
    /// "_meta" and the empty name are never settable. Any other attribute is removed by null.
    pub fn try_set_value(&mut self, attribute_name: &str, value: AttributeValue) -> bool {
        if attribute_name.is_empty() {
            warn!("ignoring attribute with an empty name");
            return false;
        }
        if let Some(accepted) = self.try_set_builtin(attribute_name, &value) {
            return accepted;
        }

        if value == AttributeValue::Null {
            self.attributes.remove(attribute_name);
        } else {
            self.attributes.insert(attribute_name.to_owned(), value);
        }
        true
    }

    // None when `attribute_name` is not a built-in attribute.
    fn try_set_builtin(&mut self, attribute_name: &str, value: &AttributeValue) -> Option<bool> {
        let accepted = match (attribute_name, value) {
            ("kind", AttributeValue::String(kind)) => {
                self.kind = kind.clone();
                true
            }
            ("key", AttributeValue::String(key)) => {
                self.key = key.clone();
                true
            }
            ("name", AttributeValue::String(name)) => {
                self.name = Some(name.clone());
                true
            }
            ("name", AttributeValue::Null) => {
                self.name = None;
                true
            }
            ("anonymous", AttributeValue::Bool(anonymous)) => {
                self.anonymous = *anonymous;
                true
            }
            ("kind" | "key" | "name" | "anonymous" | "_meta", _) => false,
            _ => return None,
        };
        Some(accepted)
    }

    /// Sets the legacy secondary key. Only reachable from legacy user JSON.
    pub(in crate::contexts) fn secondary(&mut self, value: impl Into<String>) -> &mut Self {
        self.secondary = Some(value.into());
        self
    }

    pub(super) fn allow_empty_key(&mut self) -> &mut Self {
        self.allow_empty_key = true;
        self
    }

    /// Creates an immutable context from the builder's current properties, or describes why
    /// they are invalid.
    pub fn build(&self) -> Result<Context, String> {
        let kind = Kind::try_from(self.kind.clone())?;
        if self.key.is_empty() && !self.allow_empty_key {
            return Err("context key must not be empty".to_string());
        }

        Ok(Context {
            kind,
            contexts: None,
            key: self.key.clone(),
            name: self.name.clone(),
            anonymous: self.anonymous,
            secondary: self.secondary.clone(),
            attributes: self.attributes.clone(),
        })
    }
}

/// Builds a multi-kind [Context] out of single-kind contexts.
#[derive(Clone, Debug, Default)]
pub struct MultiContextBuilder {
    contexts: Vec<Context>,
}

impl MultiContextBuilder {
    /// At least one context must be added before building.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(contexts: Vec<Context>) -> Self {
        let mut builder = Self::new();
        contexts.into_iter().for_each(|context| {
            builder.add_context(context);
        });
        builder
    }

    /// Adds a context. A multi-kind context is flattened into its members. Adding two contexts
    /// of the same kind is reported by [MultiContextBuilder::build].
    pub fn add_context(&mut self, context: Context) -> &mut Self {
        match context.contexts {
            Some(members) => self.contexts.extend(members),
            None => self.contexts.push(context),
        }
        self
    }

    /// Creates the context. With a single member, that member is returned as-is.
    pub fn build(&self) -> Result<Context, String> {
        if let [single] = self.contexts.as_slice() {
            return Ok(single.clone());
        }
        if self.contexts.is_empty() {
            return Err("a multi-kind context needs at least one member".to_string());
        }
        if !self.contexts.iter().map(Context::kind).all_unique() {
            return Err("a multi-kind context may hold each kind only once".to_string());
        }

        let members = self
            .contexts
            .iter()
            .sorted_by(|a, b| a.kind.cmp(&b.kind))
            .cloned()
            .collect();
        Ok(Context {
            kind: Kind::multi(),
            contexts: Some(members),
            key: String::new(),
            name: None,
            anonymous: false,
            secondary: None,
            attributes: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextBuilder, MultiContextBuilder};
    use crate::contexts::context::Kind;
    use crate::AttributeValue;
    use test_case::test_case;

    #[test]
    fn builder_can_create_correct_context() {
        let context = ContextBuilder::new("key")
            .kind(Kind::user())
            .name("Name")
            .secondary("Secondary")
            .anonymous(true)
            .build()
            .expect("Failed to build context");

        assert!(!context.is_multi());
        assert!(context.kind().is_user());
        assert_eq!(context.name(), Some("Name"));
        assert_eq!(context.secondary(), Some("Secondary"));
        assert!(context.anonymous());
    }

    #[test_case("multi"; "multi is reserved")]
    #[test_case("kind"; "kind is reserved")]
    #[test_case(""; "empty")]
    #[test_case(" "; "whitespace")]
    fn build_fails_on_invalid_kinds(kind: &str) {
        assert!(ContextBuilder::new("key").kind(kind).build().is_err());
    }

    #[test]
    fn build_fails_on_empty_key() {
        assert!(ContextBuilder::new("").build().is_err());
        assert!(ContextBuilder::new("").allow_empty_key().build().is_ok());
    }

    #[test_case("", AttributeValue::Bool(true), false)]
    #[test_case("kind", AttributeValue::Bool(true), false)]
    #[test_case("kind", AttributeValue::String("org".to_string()), true)]
    #[test_case("key", AttributeValue::Bool(true), false)]
    #[test_case("name", AttributeValue::Bool(true), false)]
    #[test_case("name", AttributeValue::Null, true)]
    #[test_case("anonymous", AttributeValue::String("yes".to_string()), false)]
    #[test_case("anonymous", AttributeValue::Bool(true), true)]
    #[test_case("_meta", AttributeValue::Bool(true), false)]
    #[test_case("secondary", AttributeValue::Bool(true), true; "secondary is an ordinary attribute")]
    #[test_case("custom", AttributeValue::Bool(true), true)]
    fn try_set_value_enforces_builtin_types(
        attribute_name: &str,
        value: AttributeValue,
        expected: bool,
    ) {
        let mut builder = ContextBuilder::new("key");
        assert_eq!(builder.try_set_value(attribute_name, value), expected);
    }

    #[test]
    fn setting_null_removes_attribute() {
        let mut builder = ContextBuilder::new("key");
        builder.set_string("team", "a");
        assert_eq!(builder.build().unwrap().attributes.len(), 1);

        builder.set_value("team", AttributeValue::Null);
        assert!(builder.build().unwrap().attributes.is_empty());
    }

    #[test]
    fn multi_builder_sorts_and_rejects_duplicate_kinds() {
        let user = ContextBuilder::new("u").build().unwrap();
        let org = ContextBuilder::new("o").kind("org").build().unwrap();

        let multi = MultiContextBuilder::of(vec![user.clone(), org])
            .build()
            .expect("Failed to create multi context");
        assert!(multi.is_multi());
        assert_eq!(multi.kinds(), vec![&Kind::from("org"), &Kind::user()]);

        let other_user = ContextBuilder::new("u2").build().unwrap();
        assert!(MultiContextBuilder::of(vec![user, other_user])
            .build()
            .is_err());
    }

    #[test]
    fn multi_builder_with_one_context_returns_it() {
        let org = ContextBuilder::new("o").kind("org").build().unwrap();
        let built = MultiContextBuilder::of(vec![org.clone()]).build().unwrap();
        assert_eq!(built, org);
    }

    #[test]
    fn multi_builder_must_contain_another_context() {
        assert!(MultiContextBuilder::new().build().is_err());
    }

    #[test]
    fn multi_builder_flattens_multi_contexts() {
        let build = |key: &str, kind: &str| ContextBuilder::new(key).kind(kind).build().unwrap();

        let catdog = MultiContextBuilder::of(vec![build("c", "cat"), build("d", "dog")])
            .build()
            .unwrap();
        let rabbitferret = MultiContextBuilder::of(vec![build("r", "rabbit"), build("f", "ferret")])
            .build()
            .unwrap();

        let chimera = MultiContextBuilder::of(vec![catdog, rabbitferret])
            .build()
            .unwrap();

        assert_eq!(chimera.kinds().len(), 4);
        for k in ["cat", "dog", "rabbit", "ferret"] {
            assert!(chimera.as_kind(&Kind::from(k)).is_some());
        }
    }
}
