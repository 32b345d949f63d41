use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// Health of the big segment store, as reported alongside an evaluation that consulted at least
/// one big segment.
///
/// Variants are ordered by severity: when several queries report different statuses, the
/// greatest one is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum BigSegmentsStatus {
    /// The store answered and its data is up to date.
    Healthy,
    /// The store answered but its data may be out of date.
    Stale,
    /// The store could not be queried.
    StoreError,
    /// No store is configured, or the segment has no generation and cannot be looked up.
    NotConfigured,
}

impl BigSegmentsStatus {
    fn worst(self, other: BigSegmentsStatus) -> BigSegmentsStatus {
        self.max(other)
    }
}

/// The big segments one context key belongs to, as returned by a [BigSegmentProvider].
///
/// Segments are identified by segment reference, `"{segment key}.g{generation}"`. A reference
/// can be explicitly included, explicitly excluded, or absent; inclusion wins if a reference
/// appears in both lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BigSegmentMembership {
    included: HashSet<String>,
    excluded: HashSet<String>,
}

impl BigSegmentMembership {
    pub fn new<I, E, S>(included: I, excluded: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            included: included.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `Some(true)` if included, `Some(false)` if excluded, and `None` if the store has
    /// nothing to say about this segment.
    pub fn check(&self, segment_ref: &str) -> Option<bool> {
        if self.included.contains(segment_ref) {
            Some(true)
        } else if self.excluded.contains(segment_ref) {
            Some(false)
        } else {
            None
        }
    }
}

/// Answers big segment membership queries for the evaluator.
///
/// The provider is queried with the context's key; any hashing of that key for storage is up to
/// the implementation. A `None` membership means the store knows nothing about the context, so
/// each segment's rules decide.
pub trait BigSegmentProvider {
    fn query(&self, context_key: &str) -> (Option<BigSegmentMembership>, BigSegmentsStatus);
}

// Membership lookups made during a single evaluation. Each context key is queried at most once.
pub(crate) struct BigSegmentsQuery<'a> {
    provider: Option<&'a dyn BigSegmentProvider>,
    memberships: HashMap<String, Option<BigSegmentMembership>>,
    status: Option<BigSegmentsStatus>,
}

impl<'a> BigSegmentsQuery<'a> {
    pub(crate) fn new(provider: Option<&'a dyn BigSegmentProvider>) -> Self {
        Self {
            provider,
            memberships: HashMap::new(),
            status: None,
        }
    }

    /// Looks up `context_key` in the big segment named by `segment_ref`, which is `None` when
    /// the segment has no generation.
    ///
    /// `Some` is a definite answer. `None` means the store said nothing about the segment, or
    /// no provider is configured, and the segment's rules decide.
    pub(crate) fn is_member(
        &mut self,
        context_key: &str,
        segment_ref: Option<&str>,
    ) -> Option<bool> {
        let Some(segment_ref) = segment_ref else {
            self.observe(BigSegmentsStatus::NotConfigured);
            return Some(false);
        };
        let Some(provider) = self.provider else {
            self.observe(BigSegmentsStatus::NotConfigured);
            return None;
        };

        if !self.memberships.contains_key(context_key) {
            let (membership, status) = provider.query(context_key);
            self.observe(status);
            self.memberships.insert(context_key.to_owned(), membership);
        }

        self.memberships
            .get(context_key)
            .and_then(Option::as_ref)
            .and_then(|membership| membership.check(segment_ref))
    }

    /// The worst status seen so far, or `None` if no big segment was consulted.
    pub(crate) fn status(&self) -> Option<BigSegmentsStatus> {
        self.status
    }

    fn observe(&mut self, status: BigSegmentsStatus) {
        self.status = Some(match self.status {
            Some(current) => current.worst(status),
            None => status,
        });
    }
}

#[cfg(test)]
pub(crate) mod test_provider {
    use super::*;
    use std::cell::Cell;

    pub(crate) struct TestProvider {
        pub(crate) membership: Option<BigSegmentMembership>,
        pub(crate) status: BigSegmentsStatus,
        pub(crate) queries: Cell<usize>,
    }

    impl TestProvider {
        pub(crate) fn new(
            membership: Option<BigSegmentMembership>,
            status: BigSegmentsStatus,
        ) -> Self {
            Self {
                membership,
                status,
                queries: Cell::new(0),
            }
        }
    }

    impl BigSegmentProvider for TestProvider {
        fn query(&self, _context_key: &str) -> (Option<BigSegmentMembership>, BigSegmentsStatus) {
            self.queries.set(self.queries.get() + 1);
            (self.membership.clone(), self.status)
        }
    }
}
