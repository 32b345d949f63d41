//! Evaluates feature flags for a [Context].
//!
//! Flags and segments come from a [Store]. An [Evaluator] applies a flag's prerequisites,
//! targets, rules and fallthrough in order and explains its choice with a [Reason]. Big segment
//! membership is resolved through an optional [BigSegmentProvider].

mod attribute_value;
mod big_segments;
mod bucketing;
mod contexts;
mod eval;
mod flag;
mod flag_value;
mod rule;
mod segment;
mod store;
mod test_common;
mod util;
mod variation;

pub use attribute_value::*;
pub use big_segments::{BigSegmentMembership, BigSegmentProvider, BigSegmentsStatus};
pub use contexts::attribute_reference::Reference;
pub use contexts::context::{Context, Kind};
pub use contexts::context_builder::{ContextBuilder, MultiContextBuilder};
pub use eval::*;
pub use flag::*;
pub use flag_value::*;
pub use rule::*;
pub use segment::*;
pub use store::*;
pub use variation::*;
