use super::context::{Context, Kind};
use super::context_builder::{ContextBuilder, MultiContextBuilder};
use crate::util::is_false;
use crate::AttributeValue;
use serde::de::Error;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

// Attributes a legacy user carried at the top level. Custom attributes of the same name are
// shadowed by them.
const LEGACY_USER_BUILT_INS: &[&str] = &[
    "kind",
    "key",
    "name",
    "anonymous",
    "ip",
    "email",
    "firstName",
    "lastName",
    "avatar",
    "country",
];

#[derive(Debug, Default, Deserialize, Serialize)]
struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secondary: Option<String>,
}

// The body of a single-kind context, shared by the single-kind form and each member of the
// multi-kind form.
#[derive(Debug, Deserialize, Serialize)]
struct ContextAttributes {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    anonymous: bool,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    meta: Option<Meta>,
    #[serde(flatten)]
    attributes: HashMap<String, AttributeValue>,
}

#[derive(Serialize)]
struct SingleKindContext<'a> {
    kind: &'a Kind,
    #[serde(flatten)]
    body: ContextAttributes,
}

impl ContextAttributes {
    fn into_context(self, kind: Kind) -> Result<Context, String> {
        if self.attributes.contains_key("kind") {
            return Err(format!("context of kind '{}' redefines its kind", kind));
        }

        let mut builder = ContextBuilder::new(self.key);
        builder.kind(kind).anonymous(self.anonymous);
        if let Some(name) = self.name {
            builder.name(name);
        }
        if let Some(secondary) = self.meta.and_then(|meta| meta.secondary) {
            builder.secondary(secondary);
        }
        for (name, value) in self.attributes {
            if !builder.try_set_value(&name, value) {
                return Err(format!("attribute '{}' has an invalid value", name));
            }
        }
        builder.build()
    }
}

impl From<&Context> for ContextAttributes {
    fn from(context: &Context) -> Self {
        Self {
            key: context.key.clone(),
            name: context.name.clone(),
            anonymous: context.anonymous,
            meta: context.secondary.clone().map(|secondary| Meta {
                secondary: Some(secondary),
            }),
            attributes: context.attributes.clone(),
        }
    }
}

// JSON for a user written before contexts existed. It has no "kind" property.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFormat {
    key: String,
    secondary: Option<String>,
    name: Option<String>,
    anonymous: Option<bool>,
    ip: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    avatar: Option<String>,
    country: Option<String>,
    custom: Option<HashMap<String, AttributeValue>>,
}

impl UserFormat {
    fn into_context(self) -> Result<Context, String> {
        let mut builder = ContextBuilder::new(self.key);
        builder
            .allow_empty_key()
            .anonymous(self.anonymous.unwrap_or_default());
        if let Some(name) = self.name {
            builder.name(name);
        }
        if let Some(secondary) = self.secondary {
            builder.secondary(secondary);
        }

        let built_ins = [
            ("ip", self.ip),
            ("email", self.email),
            ("firstName", self.first_name),
            ("lastName", self.last_name),
            ("avatar", self.avatar),
            ("country", self.country),
        ];
        for (attribute, value) in built_ins {
            if let Some(value) = value {
                builder.set_string(attribute, value);
            }
        }

        for (attribute, value) in self.custom.into_iter().flatten() {
            if !LEGACY_USER_BUILT_INS.contains(&attribute.as_str()) {
                builder.set_value(&attribute, value);
            }
        }

        builder.build()
    }
}

impl<'de> Deserialize<'de> for Context {
    /// Accepts the single-kind form (`{"kind": "org", "key": ...}`), the multi-kind form
    /// (`{"kind": "multi", "org": {"key": ...}, ...}`) and legacy user JSON (no "kind").
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = Map::<String, Value>::deserialize(deserializer)?;

        let context = match map.remove("kind") {
            None => serde_json::from_value::<UserFormat>(Value::Object(map))
                .map_err(D::Error::custom)?
                .into_context(),
            Some(Value::String(kind)) if kind == "multi" => {
                let mut builder = MultiContextBuilder::new();
                for (kind, body) in map {
                    let kind = Kind::try_from(kind).map_err(D::Error::custom)?;
                    let body: ContextAttributes =
                        serde_json::from_value(body).map_err(D::Error::custom)?;
                    builder.add_context(body.into_context(kind).map_err(D::Error::custom)?);
                }
                builder.build()
            }
            Some(kind) => {
                let kind = Kind::deserialize(kind).map_err(D::Error::custom)?;
                serde_json::from_value::<ContextAttributes>(Value::Object(map))
                    .map_err(D::Error::custom)?
                    .into_context(kind)
            }
        };

        context.map_err(D::Error::custom)
    }
}

impl Serialize for Context {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.contexts {
            Some(contexts) => {
                let mut map = serializer.serialize_map(Some(contexts.len() + 1))?;
                map.serialize_entry("kind", &self.kind)?;
                for context in contexts {
                    map.serialize_entry(context.kind.as_ref(), &ContextAttributes::from(context))?;
                }
                map.end()
            }
            None => SingleKindContext {
                kind: &self.kind,
                body: ContextAttributes::from(self),
            }
            .serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::contexts::context::Kind;
    use crate::{AttributeValue, Context, ContextBuilder, MultiContextBuilder, Reference};
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn deserializes_single_kind_context() {
        let context: Context = serde_json::from_value(json!({
            "kind": "org",
            "key": "org-key",
            "name": "Org",
            "anonymous": true,
            "tier": "gold",
            "address": {"city": "Westview"}
        }))
        .unwrap();

        assert_eq!(context.kind(), &Kind::from("org"));
        assert_eq!(context.key(), "org-key");
        assert_eq!(context.name(), Some("Org"));
        assert!(context.anonymous());
        assert_eq!(
            context.get_value(&Reference::new("tier")),
            Some(AttributeValue::from("gold"))
        );
        assert_eq!(
            context.get_value(&Reference::new("/address/city")),
            Some(AttributeValue::from("Westview"))
        );
    }

    #[test]
    fn deserializes_multi_kind_context() {
        let context: Context = serde_json::from_value(json!({
            "kind": "multi",
            "user": {"key": "user-key"},
            "org": {"key": "org-key", "name": "Org"}
        }))
        .unwrap();

        assert!(context.is_multi());
        assert_eq!(context.kinds(), vec![&Kind::from("org"), &Kind::user()]);
        let org = context.as_kind(&Kind::from("org")).unwrap();
        assert_eq!(org.name(), Some("Org"));
    }

    #[test]
    fn deserializes_legacy_user() {
        let context: Context = serde_json::from_value(json!({
            "key": "user-key",
            "secondary": "abc",
            "email": "test@example.com",
            "firstName": "Wanda",
            "custom": {"groups": ["a", "b"], "email": "shadowed", "kind": "org"},
            "privateAttributeNames": ["email"]
        }))
        .unwrap();

        assert!(context.kind().is_user());
        assert_eq!(context.secondary(), Some("abc"));
        assert_eq!(
            context.get_value(&Reference::new("email")),
            Some(AttributeValue::from("test@example.com"))
        );
        assert_eq!(
            context.get_value(&Reference::new("firstName")),
            Some(AttributeValue::from("Wanda"))
        );
        assert_eq!(
            context.get_value(&Reference::new("groups")),
            Some(AttributeValue::from(vec!["a", "b"]))
        );
    }

    #[test]
    fn legacy_user_may_have_empty_key() {
        let context: Context = serde_json::from_value(json!({"key": ""})).unwrap();
        assert_eq!(context.key(), "");
    }

    #[test_case(json!({"kind": "org", "key": ""}); "empty key")]
    #[test_case(json!({"kind": "kind", "key": "a"}); "reserved kind")]
    #[test_case(json!({"kind": 3, "key": "a"}); "non-string kind")]
    #[test_case(json!({"kind": "org"}); "missing key")]
    #[test_case(json!({"kind": "org", "key": "a", "anonymous": "yes"}); "wrong anonymous type")]
    #[test_case(json!({"kind": "multi"}); "empty multi")]
    #[test_case(json!({"kind": "multi", "org": {"key": "a", "kind": "user"}}); "nested kind")]
    #[test_case(json!([1, 2]); "not an object")]
    fn rejects_invalid_contexts(input: serde_json::Value) {
        assert_that!(serde_json::from_value::<Context>(input)).is_err();
    }

    #[test]
    fn serializes_single_kind_context() {
        let context = ContextBuilder::new("org-key")
            .kind("org")
            .name("Org")
            .set_bool("verified", true)
            .build()
            .unwrap();

        assert_json_eq!(
            serde_json::to_value(&context).unwrap(),
            json!({"kind": "org", "key": "org-key", "name": "Org", "verified": true})
        );
    }

    #[test]
    fn serializes_multi_kind_context_and_secondary() {
        let user: Context =
            serde_json::from_value(json!({"key": "user-key", "secondary": "s"})).unwrap();
        let org = ContextBuilder::new("org-key").kind("org").build().unwrap();
        let multi = MultiContextBuilder::of(vec![user, org]).build().unwrap();

        let json = serde_json::to_value(&multi).unwrap();
        assert_json_eq!(
            json,
            json!({
                "kind": "multi",
                "org": {"key": "org-key"},
                "user": {"key": "user-key", "_meta": {"secondary": "s"}}
            })
        );

        let parsed: Context = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, multi);
    }
}
