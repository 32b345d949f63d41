use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::bucketing::{bucket, BucketPrefix};
use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::{EvalError, EvaluationScope};
use crate::rule::Clause;
use crate::variation::VariationWeight;

/// A reusable set of contexts that flag rules can target with a `segmentMatch` clause.
///
/// Membership is either listed inline (keys and rules) or, for an unbounded ("big") segment,
/// held by an external store queried through a [crate::BigSegmentProvider].
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Segment {
    pub key: String,
    pub version: u64,
    pub deleted: bool,

    #[serde_as(as = "DefaultOnNull")]
    pub included: Vec<String>,
    #[serde_as(as = "DefaultOnNull")]
    pub excluded: Vec<String>,
    #[serde_as(as = "DefaultOnNull")]
    included_contexts: Vec<SegmentTarget>,
    #[serde_as(as = "DefaultOnNull")]
    excluded_contexts: Vec<SegmentTarget>,
    #[serde_as(as = "DefaultOnNull")]
    rules: Vec<SegmentRule>,
    salt: String,

    // Big segment settings. Without a generation the segment cannot be queried.
    pub unbounded: bool,
    unbounded_context_kind: Kind,
    generation: Option<i64>,
}

// Context keys of one kind that are listed in a segment.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SegmentTarget {
    #[serde(default)]
    context_kind: Kind,
    #[serde(default)]
    values: Vec<String>,
}

impl SegmentTarget {
    fn contains(&self, context: &Context) -> bool {
        context
            .as_kind(&self.context_kind)
            .is_some_and(|context| self.values.iter().any(|value| value == context.key()))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "IntermediateSegmentRule")]
struct SegmentRule {
    clauses: Vec<Clause>,
    weight: Option<VariationWeight>,
    bucket_by: Option<Reference>,
    rollout_context_kind: Kind,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntermediateSegmentRule {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    clauses: Vec<Clause>,
    #[serde(default)]
    weight: Option<VariationWeight>,
    #[serde(default)]
    bucket_by: Option<String>,
    #[serde(default)]
    rollout_context_kind: Option<Kind>,
}

impl From<IntermediateSegmentRule> for SegmentRule {
    fn from(rule: IntermediateSegmentRule) -> Self {
        let has_context_kind = rule.rollout_context_kind.is_some();
        Self {
            clauses: rule.clauses,
            weight: rule.weight,
            bucket_by: rule
                .bucket_by
                .map(|attr| Reference::from_flag_data(attr, has_context_kind)),
            rollout_context_kind: rule.rollout_context_kind.unwrap_or_default(),
        }
    }
}

impl Segment {
    pub fn is_newer_than(&self, segment: &Segment) -> bool {
        self.version > segment.version
    }

    /// Decides whether `context` belongs to this segment. Nested `segmentMatch` clauses and
    /// big segment lookups go through `scope`.
    pub(crate) fn contains(
        &self,
        context: &Context,
        scope: &mut EvaluationScope,
    ) -> Result<bool, EvalError> {
        if self.unbounded {
            if let Some(member) = self.unbounded_membership(context, scope) {
                return Ok(member);
            }
        } else if lists(&self.included, &self.included_contexts, context) {
            return Ok(true);
        } else if lists(&self.excluded, &self.excluded_contexts, context) {
            return Ok(false);
        }

        for rule in &self.rules {
            if rule.matches(context, &self.key, &self.salt, scope)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// The name this segment is stored under in a big segment store, if it has a generation.
    pub fn unbounded_segment_ref(&self) -> Option<String> {
        self.generation
            .map(|generation| format!("{}.g{}", self.key, generation))
    }

    // A definite answer from the big segment store, or None to let the rules decide.
    fn unbounded_membership(
        &self,
        context: &Context,
        scope: &mut EvaluationScope,
    ) -> Option<bool> {
        let context_key = match context.as_kind(&self.unbounded_context_kind) {
            Some(context) => context.key(),
            None => return Some(false),
        };
        let segment_ref = self.unbounded_segment_ref();
        scope
            .big_segments
            .is_member(context_key, segment_ref.as_deref())
    }
}

// Legacy key lists only name user contexts.
fn lists(user_keys: &[String], targets: &[SegmentTarget], context: &Context) -> bool {
    let user_listed = context
        .as_kind(&Kind::user())
        .is_some_and(|user| user_keys.iter().any(|key| key == user.key()));
    user_listed || targets.iter().any(|target| target.contains(context))
}

impl SegmentRule {
    fn matches(
        &self,
        context: &Context,
        key: &str,
        salt: &str,
        scope: &mut EvaluationScope,
    ) -> Result<bool, EvalError> {
        for clause in &self.clauses {
            if !clause.matches(context, scope)? {
                return Ok(false);
            }
        }

        // an unweighted rule includes every context its clauses match
        match self.weight {
            Some(weight) if weight >= 0.0 => {
                let prefix = BucketPrefix::KeyAndSalt(key, salt);
                let bucket = bucket(
                    context,
                    &self.rollout_context_kind,
                    self.bucket_by.as_ref(),
                    prefix,
                    false,
                )?;
                Ok(bucket.map_or(false, |bucket| bucket < weight / 100_000.0))
            }
            _ => Ok(true),
        }
    }
}
