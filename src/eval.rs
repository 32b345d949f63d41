use std::collections::HashSet;

use log::{debug, warn};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::big_segments::{BigSegmentProvider, BigSegmentsQuery, BigSegmentsStatus};
use crate::contexts::context::Kind;
use crate::flag::{Flag, Target};
use crate::flag_value::FlagValue;
use crate::segment::Segment;
use crate::store::{Store, StoreError};
use crate::util::is_false;
use crate::variation::{BucketResult, VariationIndex};
use crate::Context;

/// Structural problems found while evaluating. These never reach the caller as errors; the
/// top-level evaluation turns them into a [Reason::Error].
#[derive(Debug, Error)]
pub(crate) enum EvalError {
    #[error("prerequisite cycle through flag {0}")]
    PrerequisiteCycle(String),
    #[error("segment cycle through segment {0}")]
    SegmentCycle(String),
    #[error("invalid attribute reference {0}: {1}")]
    InvalidReference(String, String),
    #[error("context has no {0} kind to bucket by")]
    MissingContextKind(Kind),
    #[error("rule or fallthrough has neither a variation nor a usable rollout")]
    MissingVariation,
    #[error("prerequisite {0} could not be evaluated")]
    MalformedPrerequisite(String),
    #[error("store lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl EvalError {
    fn error_kind(&self) -> Error {
        match self {
            EvalError::Store(_) => Error::Exception,
            _ => Error::MalformedFlag,
        }
    }
}

/// The result of evaluating one prerequisite flag, reported so that the caller can emit
/// analytics events for it.
#[derive(Clone, Debug)]
pub struct PrerequisiteEvaluation {
    /// The prerequisite [Flag] that was evaluated.
    pub prerequisite_flag: Flag,
    /// The key of the flag that declared [PrerequisiteEvaluation::prerequisite_flag] as a
    /// prerequisite.
    pub prerequisite_of: String,
    /// The result of evaluating the prerequisite flag.
    pub detail: Detail<FlagValue>,
}

/// Everything an evaluation produces.
#[derive(Clone, Debug)]
pub struct Evaluation<'a> {
    /// The flag's value and the reason it was chosen.
    pub detail: Detail<&'a FlagValue>,
    /// Every prerequisite evaluated along the way, innermost first and in declaration order.
    pub prerequisite_evaluations: Vec<PrerequisiteEvaluation>,
}

const PREALLOCATED_PREREQUISITE_CHAIN_SIZE: usize = 20;
const PREALLOCATED_SEGMENT_CHAIN_SIZE: usize = 20;

pub(crate) struct EvaluationStack {
    pub(crate) prerequisite_flag_chain: HashSet<String>,
    pub(crate) segment_chain: HashSet<String>,
}

impl EvaluationStack {
    fn new() -> Self {
        // Up to this many levels of nested prerequisites or nested segments fit before the chains
        // need to grow.
        Self {
            prerequisite_flag_chain: HashSet::with_capacity(PREALLOCATED_PREREQUISITE_CHAIN_SIZE),
            segment_chain: HashSet::with_capacity(PREALLOCATED_SEGMENT_CHAIN_SIZE),
        }
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new()
    }
}

// State for a single top-level evaluation. Nothing here outlives the call.
pub(crate) struct EvaluationScope<'a> {
    store: &'a dyn Store,
    pub(crate) big_segments: BigSegmentsQuery<'a>,
    stack: EvaluationStack,
    prerequisite_evaluations: Vec<PrerequisiteEvaluation>,
}

impl<'a> EvaluationScope<'a> {
    pub(crate) fn new(
        store: &'a dyn Store,
        big_segments: Option<&'a dyn BigSegmentProvider>,
    ) -> Self {
        Self {
            store,
            big_segments: BigSegmentsQuery::new(big_segments),
            stack: EvaluationStack::default(),
            prerequisite_evaluations: Vec::new(),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<Flag>, EvalError> {
        Ok(self.store.flag(key)?.filter(|flag| !flag.deleted))
    }

    fn segment(&self, key: &str) -> Result<Option<Segment>, EvalError> {
        Ok(self.store.segment(key)?.filter(|segment| !segment.deleted))
    }

    /// Returns whether `context` is in the segment with key `segment_key`. An unknown segment
    /// contains nobody.
    pub(crate) fn segment_match(
        &mut self,
        segment_key: &str,
        context: &Context,
    ) -> Result<bool, EvalError> {
        if self.stack.segment_chain.contains(segment_key) {
            return Err(EvalError::SegmentCycle(segment_key.to_string()));
        }

        let segment = match self.segment(segment_key)? {
            Some(segment) => segment,
            None => return Ok(false),
        };

        self.stack.segment_chain.insert(segment_key.to_string());
        let result = segment.contains(context, self);
        self.stack.segment_chain.remove(segment_key);

        result
    }

    fn evaluate_flag<'f>(
        &mut self,
        flag: &'f Flag,
        context: &Context,
    ) -> Result<Detail<&'f FlagValue>, EvalError> {
        if !flag.on {
            return Ok(flag.off_value(Reason::Off));
        }

        self.stack.prerequisite_flag_chain.insert(flag.key.clone());
        let failed_prerequisite = self.check_prerequisites(flag, context);
        self.stack.prerequisite_flag_chain.remove(&flag.key);

        if let Some(prerequisite_key) = failed_prerequisite? {
            return Ok(flag.off_value(Reason::PrerequisiteFailed { prerequisite_key }));
        }

        if let Some(variation_index) = any_target_match_variation(context, flag) {
            return Ok(flag.variation(variation_index, Reason::TargetMatch));
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            if rule.matches(context, self)? {
                let BucketResult {
                    variation_index,
                    in_experiment,
                } = flag.resolve_variation_or_rollout(&rule.variation_or_rollout, context)?;
                let reason = Reason::RuleMatch {
                    rule_index,
                    rule_id: rule.id.clone(),
                    in_experiment,
                };
                return Ok(flag.variation(variation_index, reason));
            }
        }

        let BucketResult {
            variation_index,
            in_experiment,
        } = flag.resolve_variation_or_rollout(&flag.fallthrough, context)?;
        Ok(flag.variation(variation_index, Reason::Fallthrough { in_experiment }))
    }

    // Key of the first unsatisfied prerequisite, if any. Every existing prerequisite is
    // evaluated and recorded. A missing one ends the check.
    fn check_prerequisites(
        &mut self,
        flag: &Flag,
        context: &Context,
    ) -> Result<Option<String>, EvalError> {
        let mut first_failed: Option<String> = None;

        for prereq in &flag.prerequisites {
            if self.stack.prerequisite_flag_chain.contains(&prereq.key) {
                return Err(EvalError::PrerequisiteCycle(prereq.key.clone()));
            }

            let prereq_flag = match self.flag(&prereq.key)? {
                Some(prereq_flag) => prereq_flag,
                None => return Ok(Some(first_failed.unwrap_or_else(|| prereq.key.clone()))),
            };

            let mut detail = self.evaluate_flag(&prereq_flag, context)?;
            let satisfied = prereq_flag.on && detail.variation_index == Some(prereq.variation);
            let malformed = matches!(detail.reason, Reason::Error { .. });
            detail.big_segments_status = self.big_segments.status();
            let detail = detail.map(FlagValue::clone);

            self.prerequisite_evaluations.push(PrerequisiteEvaluation {
                prerequisite_flag: prereq_flag,
                prerequisite_of: flag.key.clone(),
                detail,
            });

            if malformed {
                return Err(EvalError::MalformedPrerequisite(prereq.key.clone()));
            }
            if !satisfied && first_failed.is_none() {
                first_failed = Some(prereq.key.clone());
            }
        }

        Ok(first_failed)
    }
}

/// Evaluates flags against the flags and segments held by a [Store], optionally resolving big
/// segment membership through a [BigSegmentProvider].
///
/// An Evaluator holds only references, so it is cheap to create one per call. Evaluations share
/// no state with each other.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    store: &'a dyn Store,
    big_segments: Option<&'a dyn BigSegmentProvider>,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            big_segments: None,
        }
    }

    /// Uses `provider` to look up big segment membership. Without one, every big segment
    /// reports [BigSegmentsStatus::NotConfigured] and only its rules can match.
    pub fn with_big_segments(mut self, provider: &'a dyn BigSegmentProvider) -> Self {
        self.big_segments = Some(provider);
        self
    }

    /// Evaluate a feature flag for the specified [Context].
    ///
    /// The evaluator does not know anything about analytics events; generating any appropriate
    /// events is the responsibility of the caller, using the returned
    /// [Evaluation::prerequisite_evaluations] for prerequisites.
    pub fn evaluate<'f>(&self, flag: &'f Flag, context: &Context) -> Evaluation<'f> {
        let mut scope = EvaluationScope::new(self.store, self.big_segments);

        let mut detail = match scope.evaluate_flag(flag, context) {
            Ok(detail) => detail,
            Err(e) => {
                warn!("could not evaluate flag {}: {}", flag.key, e);
                Detail::err(e.error_kind())
            }
        };
        detail.big_segments_status = scope.big_segments.status();
        debug!("evaluated flag {}: {:?}", flag.key, detail.reason);

        Evaluation {
            detail,
            prerequisite_evaluations: scope.prerequisite_evaluations,
        }
    }
}

/// Evaluate a feature flag for the specified [Context], with no big segment provider.
///
/// Shorthand for `Evaluator::new(store).evaluate(flag, context)`.
pub fn evaluate<'f>(store: &dyn Store, flag: &'f Flag, context: &Context) -> Evaluation<'f> {
    Evaluator::new(store).evaluate(flag, context)
}

fn any_target_match_variation(context: &Context, flag: &Flag) -> Option<VariationIndex> {
    if flag.context_targets.is_empty() {
        return flag
            .targets
            .iter()
            .find_map(|target| target_match_variation(context, target));
    }

    // A user-kind context target with no values marks where the legacy user targets with the
    // same variation are checked.
    for context_target in &flag.context_targets {
        let found = if context_target.context_kind.is_user() && context_target.values.is_empty() {
            flag.targets
                .iter()
                .filter(|target| target.variation == context_target.variation)
                .find_map(|target| target_match_variation(context, target))
        } else {
            target_match_variation(context, context_target)
        };
        if found.is_some() {
            return found;
        }
    }

    None
}

fn target_match_variation(context: &Context, target: &Target) -> Option<VariationIndex> {
    let context = context.as_kind(&target.context_kind)?;
    let key = context.key();
    target
        .values
        .iter()
        .any(|value| value == key)
        .then_some(target.variation)
}

/// The outcome of evaluating one flag: the served value (if any), where it sits in the flag's
/// variation list, and the [Reason] it was chosen.
#[derive(Clone, Debug, PartialEq)]
pub struct Detail<T> {
    /// The served variation. `None` when evaluation failed, or when the flag is off and has no
    /// off variation.
    pub value: Option<T>,

    /// Position of [Detail::value] in the flag's variations. Absent whenever the value did not
    /// come from the flag itself, including after a caller-supplied default was substituted.
    pub variation_index: Option<VariationIndex>,

    pub reason: Reason,

    /// The worst big segment store status seen while producing this result, or `None` if no
    /// big segment was consulted. It is serialized as part of the reason.
    pub big_segments_status: Option<BigSegmentsStatus>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailJson<'a, T> {
    value: &'a Option<T>,
    variation_index: Option<VariationIndex>,
    reason: ReasonJson<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReasonJson<'a> {
    #[serde(flatten)]
    reason: &'a Reason,
    #[serde(skip_serializing_if = "Option::is_none")]
    big_segments_status: Option<BigSegmentsStatus>,
}

/// Serializes as `{"value": ..., "variationIndex": ..., "reason": {...}}`, with
/// `bigSegmentsStatus` inside the reason when a big segment was consulted.
impl<T: Serialize> Serialize for Detail<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DetailJson {
            value: &self.value,
            variation_index: self.variation_index,
            reason: ReasonJson {
                reason: &self.reason,
                big_segments_status: self.big_segments_status,
            },
        }
        .serialize(serializer)
    }
}

impl<T> Detail<T> {
    /// No value and no variation index, only a reason.
    pub fn empty(reason: Reason) -> Detail<T> {
        Detail {
            value: None,
            variation_index: None,
            reason,
            big_segments_status: None,
        }
    }

    /// An error result that serves the caller's `default`.
    pub fn err_default(error: Error, default: T) -> Detail<T> {
        Detail {
            value: Some(default),
            ..Detail::err(error)
        }
    }

    /// An error result with nothing to serve.
    pub fn err(error: Error) -> Detail<T> {
        Detail::empty(Reason::Error { error })
    }

    fn with_value<U>(self, value: Option<U>) -> Detail<U> {
        Detail {
            value,
            variation_index: self.variation_index,
            reason: self.reason,
            big_segments_status: self.big_segments_status,
        }
    }

    /// Converts the value with `f`, keeping the index and reason.
    pub fn map<U, F>(self, f: F) -> Detail<U>
    where
        F: FnOnce(T) -> U,
    {
        let (value, rest) = self.split();
        rest.with_value(value.map(f))
    }

    fn split(self) -> (Option<T>, Detail<()>) {
        let Detail {
            value,
            variation_index,
            reason,
            big_segments_status,
        } = self;
        (
            value,
            Detail {
                value: None,
                variation_index,
                reason,
                big_segments_status,
            },
        )
    }

    /// Turns a valueless result into an `e` error. Results that carry a value are unchanged.
    pub fn should_have_value(self, e: Error) -> Detail<T> {
        match self.value {
            Some(_) => self,
            None => Detail {
                reason: Reason::Error { error: e },
                ..self
            },
        }
    }

    /// Fallible conversion of the value, used for typed reads such as "give me a bool".
    ///
    /// A valueless result serves `default` under its existing reason. A value that `f` rejects
    /// becomes an `e` error serving `default`.
    pub fn try_map<U, F>(self, f: F, default: U, e: Error) -> Detail<U>
    where
        F: FnOnce(T) -> Option<U>,
    {
        let (value, rest) = self.split();
        match value {
            None => rest.with_value(Some(default)),
            Some(value) => match f(value) {
                Some(converted) => rest.with_value(Some(converted)),
                None => Detail {
                    big_segments_status: rest.big_segments_status,
                    ..Detail::err_default(e, default)
                },
            },
        }
    }

    /// Serves `default` when there is no value. The reason is kept as is.
    pub fn or(self, default: T) -> Detail<T> {
        self.or_else(|| default)
    }

    /// Lazy form of [Detail::or].
    pub fn or_else<F>(self, default: F) -> Detail<T>
    where
        F: FnOnce() -> T,
    {
        match self.value {
            Some(_) => self,
            None => Detail {
                value: Some(default()),
                variation_index: None,
                ..self
            },
        }
    }
}

/// Why an evaluation produced its value. Serializes as an object tagged by `kind`, e.g.
/// `{"kind": "RULE_MATCH", "ruleIndex": 0, "ruleId": "r"}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Reason {
    /// The flag is switched off.
    Off,
    /// The context key is listed in one of the flag's targets.
    TargetMatch,
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        rule_index: usize,
        /// Omitted from JSON when the rule has no id.
        #[serde(skip_serializing_if = "String::is_empty")]
        rule_id: String,
        /// Set when the rule's rollout is an experiment and the chosen bucket is tracked.
        #[serde(skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    /// A prerequisite was off or served the wrong variation, so the flag served its off value.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed {
        /// First prerequisite, in flag order, that was not satisfied.
        prerequisite_key: String,
    },
    /// No target or rule matched.
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        #[serde(skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    Error {
        #[serde(rename = "errorKind")]
        error: Error,
    },
}

impl Reason {
    pub fn is_in_experiment(&self) -> bool {
        matches!(
            self,
            Reason::RuleMatch {
                in_experiment: true,
                ..
            } | Reason::Fallthrough {
                in_experiment: true
            }
        )
    }
}

/// Error kinds reported through [Reason::Error].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Error {
    /// Flag data has not been loaded yet.
    ClientNotReady,
    /// No flag exists under the requested key.
    FlagNotFound,
    /// No usable context was supplied.
    UserNotSpecified,
    /// The flag data is inconsistent: a variation index out of range, a rollout on a missing
    /// context kind, or a prerequisite or segment cycle.
    MalformedFlag,
    /// The served value had a different type than the caller asked for.
    WrongType,
    /// Evaluation was cut short by something outside the flag data, such as a store failure.
    Exception,
}
