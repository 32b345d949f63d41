use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::contexts::context::Kind;
use crate::eval::{self, Detail, EvalError, Reason};
use crate::flag_value::FlagValue;
use crate::rule::FlagRule;
use crate::variation::{BucketResult, VariationIndex, VariationOrRollout};
use crate::Context;

/// A feature flag: its targeting configuration and the variations it can serve.
///
/// Every field may be omitted, and list fields may also be `null`. A deleted flag arrives as a
/// bare `{"key", "version", "deleted": true}` tombstone.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Flag {
    pub key: String,
    pub version: u64,
    pub deleted: bool,

    pub(crate) on: bool,
    #[serde_as(as = "DefaultOnNull")]
    pub(crate) prerequisites: Vec<Prereq>,
    #[serde_as(as = "DefaultOnNull")]
    pub(crate) targets: Vec<Target>,
    #[serde_as(as = "DefaultOnNull")]
    pub(crate) context_targets: Vec<Target>,
    #[serde_as(as = "DefaultOnNull")]
    pub(crate) rules: Vec<FlagRule>,
    pub(crate) fallthrough: VariationOrRollout,
    pub(crate) off_variation: Option<VariationIndex>,
    #[serde_as(as = "DefaultOnNull")]
    variations: Vec<FlagValue>,
    salt: String,

    pub track_events: bool,
    pub track_events_fallthrough: bool,
    pub debug_events_until_date: Option<u64>,
}

/// Another flag that must be on, and serving `variation`, before this flag's targeting applies.
#[derive(Clone, Debug, Deserialize)]
pub struct Prereq {
    pub(crate) key: String,
    pub(crate) variation: VariationIndex,
}

/// Context keys of one kind that are served a fixed variation. Legacy `targets` omit the
/// kind, which then defaults to "user".
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Target {
    #[serde(default)]
    pub(crate) context_kind: Kind,
    #[serde(default)]
    pub(crate) values: Vec<String>,
    pub(crate) variation: VariationIndex,
}

impl Flag {
    /// Returns the variation at `index` with the given reason, or a `MalformedFlag` error if
    /// the index is out of range.
    pub fn variation(&self, index: VariationIndex, reason: Reason) -> Detail<&FlagValue> {
        match self.variations.get(index) {
            Some(value) => Detail {
                value: Some(value),
                variation_index: Some(index),
                ..Detail::empty(reason)
            },
            None => Detail::err(eval::Error::MalformedFlag),
        }
    }

    /// Returns the off variation, or no value at all if the flag has none.
    pub fn off_value(&self, reason: Reason) -> Detail<&FlagValue> {
        match self.off_variation {
            Some(index) => self.variation(index, reason),
            None => Detail::empty(reason),
        }
    }

    pub(crate) fn resolve_variation_or_rollout(
        &self,
        vr: &VariationOrRollout,
        context: &Context,
    ) -> Result<BucketResult, EvalError> {
        vr.variation(&self.key, context, &self.salt)
    }

    /// Returns true if an evaluation with this reason should produce full analytics events,
    /// either because it was part of an experiment or because tracking is enabled for the rule
    /// or fallthrough that produced it.
    pub fn is_experimentation_enabled(&self, reason: &Reason) -> bool {
        match reason {
            _ if reason.is_in_experiment() => true,
            Reason::Fallthrough { .. } => self.track_events_fallthrough,
            Reason::RuleMatch { rule_index, .. } => self
                .rules
                .get(*rule_index)
                .map(|rule| rule.track_events)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_newer_than(&self, flag: &Flag) -> bool {
        self.version > flag.version
    }

    #[cfg(test)]
    pub fn new_boolean_flag_with_segment_match(segment_keys: Vec<&str>) -> Self {
        Self {
            key: "feature".to_string(),
            version: 1,
            on: true,
            rules: vec![FlagRule::new_segment_match(segment_keys)],
            fallthrough: VariationOrRollout::Variation { variation: 0 },
            off_variation: Some(0),
            variations: vec![false.into(), true.into()],
            salt: "xyz".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Store;
    use crate::test_common::TestStore;
    use spectral::prelude::*;

    use super::Flag;
    use crate::eval::Reason::{self, *};
    use test_case::test_case;
    use crate::flag_value::FlagValue;
    use crate::variation::VariationOrRollout;

    #[test]
    fn parses_flag_with_omitted_and_null_fields() {
        let flag: Flag = serde_json::from_str(
            r#"{
                "key": "flag",
                "version": 42,
                "on": true,
                "targets": null,
                "rules": null,
                "fallthrough": {"variation": 1},
                "variations": [false, true]
            }"#,
        )
        .unwrap();

        assert_that!(flag.targets).is_empty();
        assert_that!(flag.context_targets).is_empty();
        assert_that!(flag.rules).is_empty();
        assert_that!(flag.prerequisites).is_empty();
        assert_that!(flag.off_variation).is_none();
        assert!(!flag.deleted);
    }

    #[test]
    fn parses_deleted_flag_tombstone() {
        let flag: Flag =
            serde_json::from_str(r#"{"key": "gone", "version": 7, "deleted": true}"#).unwrap();
        assert!(flag.deleted);
        assert!(!flag.on);
        assert_that!(flag.variations).is_empty();
        assert!(matches!(
            flag.fallthrough,
            VariationOrRollout::Malformed(_)
        ));
    }

    #[test]
    fn legacy_targets_default_to_user_kind() {
        let store = TestStore::new();
        let flag = store.flag("flagWithContextTarget").unwrap().unwrap();

        assert!(flag.targets[0].context_kind.is_user());
        assert_eq!(flag.context_targets[0].context_kind.as_ref(), "org");
    }

    #[test]
    fn variation_out_of_range_is_malformed() {
        let store = TestStore::new();
        let flag = store.flag("flag").unwrap().unwrap();

        let detail = flag.variation(1, Off);
        assert_that!(detail.value).contains_value(&FlagValue::Bool(true));

        let detail = flag.variation(2, Off);
        assert_that!(detail.value).is_none();
        assert_that!(detail.variation_index).is_none();
        assert_that!(detail.reason).is_equal_to(Error {
            error: crate::eval::Error::MalformedFlag,
        });
    }

    fn rule_match(rule_index: usize, in_experiment: bool) -> Reason {
        RuleMatch {
            rule_index,
            rule_id: String::new(),
            in_experiment,
        }
    }

    #[test_case("flag", Off, false; "off never tracks")]
    #[test_case("flag", Fallthrough { in_experiment: false }, false; "untracked fallthrough")]
    #[test_case("flagWithRuleExclusion", Fallthrough { in_experiment: false }, true; "trackEventsFallthrough")]
    #[test_case("flagWithRuleExclusion", rule_match(0, false), true; "rule trackEvents")]
    #[test_case("flagWithExperiment", Fallthrough { in_experiment: true }, true; "experiment fallthrough")]
    #[test_case("flagWithExperiment", Fallthrough { in_experiment: false }, false; "fallthrough outside experiment")]
    #[test_case("flagWithExperiment", rule_match(42, true), true; "reason decides even without the rule")]
    #[test_case("flagWithExperiment", rule_match(42, false), false; "unknown rule index")]
    fn experimentation_follows_reason_then_tracking(flag_key: &str, reason: Reason, expected: bool) {
        let store = TestStore::new();
        let flag = store.flag(flag_key).unwrap().unwrap();
        assert_eq!(flag.is_experimentation_enabled(&reason), expected);
    }

    #[test]
    fn newer_version_wins() {
        let store = TestStore::new();
        let older = store.flag("flag").unwrap().unwrap();
        let mut newer = older.clone();
        newer.version += 1;

        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older.clone()));
    }
}
