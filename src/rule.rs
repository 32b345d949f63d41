use log::{error, warn};
use regex::Regex;
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

use crate::attribute_value::AttributeValue;
use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::{EvalError, EvaluationScope};
use crate::variation::VariationOrRollout;

/// A single condition within a [FlagRule] or segment rule.
///
/// The attribute is read from the context of kind `context_kind`; a clause on the `kind`
/// attribute instead tests the kinds present in the context.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "IntermediateClause")]
pub struct Clause {
    context_kind: Kind,
    attribute: Reference,
    negate: bool,
    op: Op,
    values: Vec<AttributeValue>,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntermediateClause {
    #[serde(default)]
    context_kind: Option<Kind>,
    #[serde(default)]
    attribute: String,
    #[serde(default)]
    negate: bool,
    op: Op,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    values: Vec<AttributeValue>,
}

impl From<IntermediateClause> for Clause {
    fn from(clause: IntermediateClause) -> Self {
        let has_context_kind = clause.context_kind.is_some();
        Self {
            context_kind: clause.context_kind.unwrap_or_default(),
            attribute: Reference::from_flag_data(clause.attribute, has_context_kind),
            negate: clause.negate,
            op: clause.op,
            values: clause.values,
        }
    }
}

/// A targeting rule: when every clause matches, the context is served the rule's variation or
/// rollout.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    #[serde(default)]
    pub id: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
    #[serde(default)]
    pub track_events: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
enum Op {
    In,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SegmentMatch,
    SemVerEqual,
    SemVerGreaterThan,
    SemVerLessThan,
    // operators added after this engine was written never match
    #[serde(other)]
    Unknown,
}

impl Clause {
    pub(crate) fn matches(
        &self,
        context: &Context,
        scope: &mut EvaluationScope,
    ) -> Result<bool, EvalError> {
        if let Op::SegmentMatch = self.op {
            self.matches_segment(context, scope)
        } else {
            self.matches_non_segment(context)
        }
    }

    fn maybe_negate(&self, matched: bool) -> bool {
        self.negate ^ matched
    }

    // Matches if the context is in any listed segment. Non-string values name no segment.
    fn matches_segment(
        &self,
        context: &Context,
        scope: &mut EvaluationScope,
    ) -> Result<bool, EvalError> {
        let mut in_any = false;
        for segment_key in self.values.iter().filter_map(AttributeValue::as_str) {
            in_any = scope.segment_match(segment_key, context)?;
            if in_any {
                break;
            }
        }
        Ok(self.maybe_negate(in_any))
    }

    pub(crate) fn matches_non_segment(&self, context: &Context) -> Result<bool, EvalError> {
        if !self.attribute.is_valid() {
            return Err(EvalError::InvalidReference(
                self.attribute.to_string(),
                self.attribute.error(),
            ));
        }

        if self.attribute.is_kind() {
            let any_match = context.kinds().into_iter().any(|kind| {
                let kind = AttributeValue::String(kind.to_string());
                self.values
                    .iter()
                    .any(|clause_val| self.op.matches(&kind, clause_val))
            });
            return Ok(self.maybe_negate(any_match));
        }

        let context = match context.as_kind(&self.context_kind) {
            Some(context) => context,
            None => return Ok(false),
        };

        // a missing or null attribute never matches, even when negated
        let context_val = match context.get_value(&self.attribute) {
            None | Some(AttributeValue::Null) => return Ok(false),
            Some(v) => v,
        };

        let any_match = context_val.any(|context_val_v| {
            self.values
                .iter()
                .any(|clause_val| self.op.matches(context_val_v, clause_val))
        });

        Ok(self.maybe_negate(any_match))
    }

    #[cfg(test)]
    pub(crate) fn new_match(attribute: &str, value: AttributeValue) -> Self {
        Self {
            context_kind: Kind::user(),
            attribute: Reference::new(attribute),
            negate: false,
            op: Op::Matches,
            values: vec![value],
        }
    }

    #[cfg(test)]
    pub(crate) fn new_segment_match(segment_keys: Vec<&str>) -> Self {
        Self {
            context_kind: Kind::user(),
            attribute: Reference::new("key"),
            negate: false,
            op: Op::SegmentMatch,
            values: segment_keys.into_iter().map(AttributeValue::from).collect(),
        }
    }
}

impl FlagRule {
    /// Rules match if _all_ of their clauses do. A rule without clauses matches everything.
    pub(crate) fn matches(
        &self,
        context: &Context,
        scope: &mut EvaluationScope,
    ) -> Result<bool, EvalError> {
        for clause in &self.clauses {
            if !clause.matches(context, scope)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn new_segment_match(segment_keys: Vec<&str>) -> Self {
        Self {
            id: "segment-rule".to_string(),
            clauses: vec![Clause::new_segment_match(segment_keys)],
            variation_or_rollout: VariationOrRollout::Variation { variation: 1 },
            track_events: false,
        }
    }
}

impl Op {
    /// Compares one context value against one clause value. Operands that cannot be read as the
    /// operator's type make the comparison false.
    fn matches(&self, lhs: &AttributeValue, rhs: &AttributeValue) -> bool {
        let text = AttributeValue::as_str;
        let number = AttributeValue::to_f64;
        let time = AttributeValue::to_datetime;
        let version = AttributeValue::as_semver;

        match self {
            Op::In => lhs == rhs,
            Op::StartsWith => both(lhs, rhs, text, |l, r| l.starts_with(r)),
            Op::EndsWith => both(lhs, rhs, text, |l, r| l.ends_with(r)),
            Op::Contains => both(lhs, rhs, text, |l, r| l.contains(r)),
            Op::Matches => both(lhs, rhs, text, regex_match),
            Op::LessThan => both(lhs, rhs, number, |l, r| l < r),
            Op::LessThanOrEqual => both(lhs, rhs, number, |l, r| l <= r),
            Op::GreaterThan => both(lhs, rhs, number, |l, r| l > r),
            Op::GreaterThanOrEqual => both(lhs, rhs, number, |l, r| l >= r),
            Op::Before => both(lhs, rhs, time, |l, r| l < r),
            Op::After => both(lhs, rhs, time, |l, r| l > r),
            Op::SemVerEqual => both(lhs, rhs, version, |l, r| l == r),
            Op::SemVerLessThan => both(lhs, rhs, version, |l, r| l < r),
            Op::SemVerGreaterThan => both(lhs, rhs, version, |l, r| l > r),
            Op::SegmentMatch => {
                error!("segmentMatch reached value comparison; it is resolved per clause");
                false
            }
            Op::Unknown => false,
        }
    }
}

fn both<'a, T>(
    lhs: &'a AttributeValue,
    rhs: &'a AttributeValue,
    read: impl Fn(&'a AttributeValue) -> Option<T>,
    test: impl FnOnce(T, T) -> bool,
) -> bool {
    match (read(lhs), read(rhs)) {
        (Some(l), Some(r)) => test(l, r),
        _ => false,
    }
}

fn regex_match(text: &str, pattern: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!("invalid regex {:?} in 'matches' clause: {}", pattern, e);
            false
        }
    }
}
