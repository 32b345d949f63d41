use serde::Deserialize;

use crate::bucketing::{bucket, BucketPrefix};
use crate::contexts::attribute_reference::Reference;
use crate::contexts::context::{Context, Kind};
use crate::eval::EvalError;

pub type VariationIndex = usize;

#[derive(Debug, PartialEq)]
pub(crate) struct BucketResult {
    pub variation_index: VariationIndex,
    pub in_experiment: bool,
}

impl BucketResult {
    fn fixed(variation_index: VariationIndex) -> Self {
        BucketResult {
            variation_index,
            in_experiment: false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum RolloutKind {
    #[default]
    Rollout,
    Experiment,
}

/// A percentage rollout: the context is bucketed and assigned the first variation whose
/// cumulative weight exceeds its bucket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "IntermediateRollout")]
pub struct Rollout {
    kind: RolloutKind,
    context_kind: Kind,
    bucket_by: Option<Reference>,
    variations: Vec<WeightedVariation>,
    seed: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntermediateRollout {
    #[serde(default)]
    kind: RolloutKind,
    context_kind: Option<Kind>,
    bucket_by: Option<String>,
    variations: Vec<WeightedVariation>,
    seed: Option<i64>,
}

impl From<IntermediateRollout> for Rollout {
    fn from(rollout: IntermediateRollout) -> Self {
        let has_context_kind = rollout.context_kind.is_some();
        Self {
            kind: rollout.kind,
            context_kind: rollout.context_kind.unwrap_or_default(),
            bucket_by: rollout
                .bucket_by
                .map(|attr| Reference::from_flag_data(attr, has_context_kind)),
            variations: rollout.variations,
            seed: rollout.seed,
        }
    }
}

impl Rollout {
    #[cfg(test)]
    fn with_variations<V: Into<Vec<WeightedVariation>>>(variations: V) -> Self {
        Rollout {
            kind: RolloutKind::Rollout,
            context_kind: Kind::user(),
            bucket_by: None,
            seed: None,
            variations: variations.into(),
        }
    }

    pub(crate) fn is_experiment(&self) -> bool {
        self.kind == RolloutKind::Experiment
    }
}

/// How a rule or fallthrough picks its variation: a fixed index, or a weighted rollout.
///
/// Data carrying neither form still deserializes, as `Malformed`, and fails only when it is
/// used. When both are present the fixed variation wins.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VariationOrRollout {
    Variation { variation: VariationIndex },
    Rollout { rollout: Rollout },
    Malformed(serde_json::Value),
}

impl Default for VariationOrRollout {
    fn default() -> Self {
        VariationOrRollout::Malformed(serde_json::Value::Null)
    }
}

pub(crate) type VariationWeight = f32;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WeightedVariation {
    pub variation: VariationIndex,
    pub weight: VariationWeight,
    #[serde(default)]
    pub untracked: bool,
}

impl WeightedVariation {
    #[cfg(test)]
    fn new(variation: VariationIndex, weight: VariationWeight) -> Self {
        WeightedVariation {
            variation,
            weight,
            untracked: false,
        }
    }

    fn as_bucket_result(&self, is_experiment: bool) -> BucketResult {
        BucketResult {
            variation_index: self.variation,
            in_experiment: is_experiment && !self.untracked,
        }
    }
}

impl VariationOrRollout {
    /// Picks the variation for `context`. Rollouts hash with `flag_key` and `salt` unless they
    /// carry a seed.
    pub(crate) fn variation(
        &self,
        flag_key: &str,
        context: &Context,
        salt: &str,
    ) -> Result<BucketResult, EvalError> {
        let rollout = match self {
            VariationOrRollout::Variation { variation } => return Ok(BucketResult::fixed(*variation)),
            VariationOrRollout::Rollout { rollout } => rollout,
            VariationOrRollout::Malformed(_) => return Err(EvalError::MissingVariation),
        };
        let last = rollout.variations.last().ok_or(EvalError::MissingVariation)?;

        let prefix = rollout
            .seed
            .map_or(BucketPrefix::KeyAndSalt(flag_key, salt), BucketPrefix::Seed);
        let is_experiment = rollout.is_experiment();
        let bucket = bucket(
            context,
            &rollout.context_kind,
            rollout.bucket_by.as_ref(),
            prefix,
            is_experiment,
        )?
        .ok_or_else(|| EvalError::MissingContextKind(rollout.context_kind.clone()))?;

        // weights are in units of 1/100000; a bucket past the running total of every weight,
        // which rounding can produce, lands in the last variation
        let mut upper = 0.0;
        let chosen = rollout
            .variations
            .iter()
            .find(|weighted| {
                upper += weighted.weight / 100_000.0;
                bucket < upper
            })
            .unwrap_or(last);
        Ok(chosen.as_bucket_result(is_experiment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextBuilder, MultiContextBuilder};
    use proptest::prelude::*;
    use spectral::prelude::*;
    use test_case::test_case;

    const HASH_KEY: &str = "hashKey";
    const SALT: &str = "saltyA";

    fn user(key: &str) -> Context {
        ContextBuilder::new(key).build().unwrap()
    }

    fn weighted(weights: &[(VariationIndex, VariationWeight)]) -> Vec<WeightedVariation> {
        weights
            .iter()
            .map(|&(variation, weight)| WeightedVariation::new(variation, weight))
            .collect()
    }

    fn rollout(rollout: Rollout) -> VariationOrRollout {
        VariationOrRollout::Rollout { rollout }
    }

    fn all_to_one() -> Rollout {
        Rollout::with_variations(weighted(&[(1, 100_000.0)]))
    }

    fn tracked_experiment() -> Rollout {
        let mut variations = weighted(&[(1, 20_000.0), (0, 20_000.0), (0, 60_000.0)]);
        variations[2].untracked = true;
        Rollout {
            kind: RolloutKind::Experiment,
            seed: Some(42),
            ..Rollout::with_variations(variations)
        }
    }

    #[test_case(r#"{"variation": 4}"#, VariationOrRollout::Variation { variation: 4 })]
    #[test_case(
        r#"{"rollout": {"variations": [{"variation": 1, "weight": 100000}]}}"#,
        rollout(all_to_one());
        "plain rollout"
    )]
    #[test_case(
        r#"{"rollout": {"bucketBy": "/bucket", "variations": [{"variation": 1, "weight": 100000}]}}"#,
        rollout(Rollout { bucket_by: Some(Reference::new("/~1bucket")), ..all_to_one() });
        "kindless bucketBy is a literal attribute name"
    )]
    #[test_case(
        r#"{"rollout": {"contextKind": "org", "bucketBy": "/address/city",
                        "variations": [{"variation": 1, "weight": 100000}]}}"#,
        rollout(Rollout {
            context_kind: Kind::from("org"),
            bucket_by: Some(Reference::new("/address/city")),
            ..all_to_one()
        });
        "bucketBy with a kind is a reference path"
    )]
    #[test_case(
        r#"{"rollout": {"kind": "experiment", "seed": 42, "variations": [
            {"variation": 1, "weight": 20000},
            {"variation": 0, "weight": 20000},
            {"variation": 0, "weight": 60000, "untracked": true}
        ]}}"#,
        rollout(tracked_experiment());
        "experiment"
    )]
    #[test_case("{}", VariationOrRollout::Malformed(serde_json::json!({})); "neither form")]
    #[test_case(
        r#"{"variation": 1, "rollout": {"variations": [{"variation": 1, "weight": 100000}]}}"#,
        VariationOrRollout::Variation { variation: 1 };
        "both forms prefer the fixed variation"
    )]
    fn parses_variation_or_rollout(json: &str, expected: VariationOrRollout) {
        let parsed: VariationOrRollout = serde_json::from_str(json).unwrap();
        assert_that!(parsed).is_equal_to(expected);
    }

    // Buckets for HASH_KEY/SALT: userKeyA 0.42157587, userKeyB 0.6708485, userKeyC 0.10343106
    #[test_case("userKeyA", 0)]
    #[test_case("userKeyB", 1)]
    #[test_case("userKeyC", 0)]
    fn rollout_picks_by_cumulative_weight(key: &str, expected: VariationIndex) {
        let split = rollout(Rollout::with_variations(weighted(&[(0, 60_000.0), (1, 40_000.0)])));

        assert_that!(split.variation(HASH_KEY, &user(key), SALT)).is_ok_containing(BucketResult {
            variation_index: expected,
            in_experiment: false,
        });
    }

    // Seed 61 buckets: userKeyA 0.09801207, userKeyB 0.14483777, userKeyC 0.9242641
    #[test_case("userKeyA", 0, true)]
    #[test_case("userKeyB", 1, true)]
    #[test_case("userKeyC", 0, false; "untracked bucket is outside the experiment")]
    fn experiment_tracks_only_tracked_buckets(key: &str, expected: VariationIndex, tracked: bool) {
        let mut variations = weighted(&[(0, 10_000.0), (1, 20_000.0), (0, 70_000.0)]);
        variations[2].untracked = true;
        let experiment = rollout(Rollout {
            seed: Some(61),
            kind: RolloutKind::Experiment,
            ..Rollout::with_variations(variations)
        });

        assert_that!(experiment.variation(HASH_KEY, &user(key), SALT)).is_ok_containing(
            BucketResult {
                variation_index: expected,
                in_experiment: tracked,
            },
        );
    }

    #[test]
    fn bucket_past_total_weight_gets_last_variation() {
        // userKeyD buckets at 0.7816281, far past the 0.00006 these weights cover
        let short = rollout(Rollout::with_variations(weighted(&[(0, 1.0), (1, 2.0), (2, 3.0)])));

        assert_that!(short.variation(HASH_KEY, &user("userKeyD"), SALT)).is_ok_containing(
            BucketResult {
                variation_index: 2,
                in_experiment: false,
            },
        );
    }

    #[test]
    fn rollout_for_missing_context_kind_is_an_error() {
        let rollout = VariationOrRollout::Rollout {
            rollout: Rollout {
                context_kind: Kind::from("org"),
                ..Rollout::with_variations(vec![WeightedVariation::new(0, 100_000.0)])
            },
        };

        assert_that!(rollout.variation(HASH_KEY, &user("userKeyA"), SALT)).is_err();

        let multi = MultiContextBuilder::new()
            .add_context(user("userKeyA"))
            .add_context(ContextBuilder::new("org-key").kind("org").build().unwrap())
            .build()
            .unwrap();
        assert_that!(rollout.variation(HASH_KEY, &multi, SALT)).is_ok_containing(BucketResult {
            variation_index: 0,
            in_experiment: false,
        });
    }

    #[test]
    fn malformed_and_empty_rollouts_are_errors() {
        let malformed = VariationOrRollout::Malformed(serde_json::json!({}));
        assert_that!(malformed.variation(HASH_KEY, &user("userKeyA"), SALT)).is_err();

        let empty = VariationOrRollout::Rollout {
            rollout: Rollout::with_variations(vec![]),
        };
        assert_that!(empty.variation(HASH_KEY, &user("userKeyA"), SALT)).is_err();
    }

    proptest! {
        #[test]
        fn seeded_rollouts_ignore_flag_key_and_salt(
            key in "\\PC+",
            flag_key_1 in "\\PC*",
            flag_key_2 in "\\PC*",
            salt_1 in "\\PC*",
            salt_2 in "\\PC*",
        ) {
            let rollout = VariationOrRollout::Rollout {
                rollout: Rollout {
                    seed: Some(61),
                    ..Rollout::with_variations(weighted(&[
                        (0, 25_000.0),
                        (1, 25_000.0),
                        (2, 25_000.0),
                        (3, 25_000.0),
                    ]))
                },
            };
            let context = user(&key);

            let first = rollout.variation(&flag_key_1, &context, &salt_1).unwrap();
            let second = rollout.variation(&flag_key_2, &context, &salt_2).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn full_rollout_always_selects_a_variation(key in "\\PC+", weight in 0.0_f32..100_000.0) {
            let rollout = VariationOrRollout::Rollout {
                rollout: Rollout::with_variations(weighted(&[(0, weight), (1, 100_000.0 - weight)])),
            };

            let result = rollout.variation(HASH_KEY, &user(&key), SALT).unwrap();
            prop_assert!(result.variation_index <= 1);
        }
    }
}
