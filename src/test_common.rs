#![cfg(test)]

use crate::flag::Flag;
use crate::segment::Segment;
use crate::store::{Store, StoreError};
use maplit::hashmap;
use std::collections::HashMap;

pub struct TestStore {
    flags: HashMap<String, Flag>,
    segments: HashMap<String, Segment>,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            flags: hashmap! {
                "flag".to_string() => serde_json::from_str(r#"{
                        "key": "flag", "version": 42, "on": false,
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithRuleExclusion".to_string() => serde_json::from_str(r#"{
                        "key": "flag", "version": 42, "on": false,
                        "rules": [
                            {
                                "variation": 0, "id": "6a7755ac-e47a-40ea-9579-a09dd5f061bd",
                                "clauses": [
                                    {
                                        "attribute": "platform", "op": "in",
                                        "values": ["web", "aem", "ios"]
                                    }
                                ],
                                "trackEvents": true
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty",
                        "trackEventsFallthrough": true, "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithMatchesOpOnGroups".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithMatchesOpOnGroups", "version": 42, "on": true,
                        "rules": [
                            {
                                "variation": 0, "id": "6a7755ac-e47a-40ea-9579-a09dd5f061bd",
                                "clauses": [{"attribute": "groups", "op": "matches", "values": ["^\\w+"]}],
                                "trackEvents": true
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty",
                        "trackEventsFallthrough": true, "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithMatchesOpOnKinds".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithMatchesOpOnKinds", "version": 42, "on": true,
                        "rules": [
                            {
                                "variation": 0, "id": "6a7755ac-e47a-40ea-9579-a09dd5f061bd",
                                "clauses": [{"attribute": "kind", "op": "matches", "values": ["^[ou]"]}],
                                "trackEvents": true
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty",
                        "trackEventsFallthrough": true, "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithMatchesOpOnKindsAttributeReference".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithMatchesOpOnKindsAttributeReference", "version": 42,
                        "on": true,
                        "rules": [
                            {
                                "variation": 0, "id": "6a7755ac-e47a-40ea-9579-a09dd5f061bd",
                                "clauses": [
                                    {
                                        "attribute": "/kind", "op": "matches",
                                        "values": ["^[ou]"], "contextKind": "arbitrary"
                                    }
                                ],
                                "trackEvents": true
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty",
                        "trackEventsFallthrough": true, "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithMatchesOpOnKindsPlainAttributeReference".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithMatchesOpOnKindsPlainAttributeReference", "version": 42,
                        "on": true,
                        "rules": [
                            {
                                "variation": 0, "id": "6a7755ac-e47a-40ea-9579-a09dd5f061bd",
                                "clauses": [
                                    {
                                        "attribute": "kind", "op": "matches",
                                        "values": ["^[ou]"], "contextKind": "arbitrary"
                                    }
                                ],
                                "trackEvents": true
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty",
                        "trackEventsFallthrough": true, "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithTrackAndDebugEvents".to_string() => serde_json::from_str(r#"{
                        "key": "flag", "version": 42, "on": false,
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty", "trackEvents": true,
                        "trackEventsFallthrough": true, "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithExperiment".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithExperiment", "version": 42, "on": true,
                        "fallthrough": {
                            "rollout": {
                                "kind": "experiment", "seed": 61,
                                "variations": [
                                    {"variation": 0, "weight": 10000},
                                    {"variation": 1, "weight": 20000},
                                    {"variation": 0, "weight": 70000, "untracked": true}
                                ]
                            }
                        },
                        "offVariation": 0, "variations": [false, true], "salt": "salty",
                        "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithExperimentTargetingContext".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithExperimentTargetingContext", "version": 42, "on": true,
                        "fallthrough": {
                            "rollout": {
                                "kind": "experiment", "contextKind": "org", "seed": 61,
                                "variations": [
                                    {"variation": 0, "weight": 10000},
                                    {"variation": 1, "weight": 20000},
                                    {"variation": 0, "weight": 70000, "untracked": true}
                                ]
                            }
                        },
                        "offVariation": 0, "variations": [false, true], "salt": "salty",
                        "debugEventsUntilDate": 1500000000
                    }"#).unwrap(),
                "flagWithRolloutBucketBy".to_string() => serde_json::from_str(r#"{
                        "key": "rollout", "on": true,
                        "rules": [
                            {
                                "rollout": {
                                    "variations": [
                                        {"variation": 0, "weight": 50000},
                                        {"variation": 1, "weight": 50000},
                                        {"variation": 2, "weight": 0}
                                    ],
                                    "bucketBy": "ld_quid"
                                },
                                "id": "6a7755ac-e47a-40ea-9579-a09dd5f061bd",
                                "clauses": [
                                    {
                                        "attribute": "platform", "op": "in",
                                        "values": ["web", "aem", "ios"]
                                    }
                                ]
                            }
                        ],
                        "fallthrough": {"variation": 2}, "offVariation": 1,
                        "variations": ["rollout1", "rollout2", "rollout3"],
                        "salt": "ce2634f116d741a7ad1b7ef363f6f9bc", "version": 7
                    }"#).unwrap(),
                "flagWithTarget".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithTarget", "version": 42, "on": false,
                        "targets": [{"values": ["bob"], "variation": 0}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithContextTarget".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithContextTarget", "version": 42, "on": true,
                        "targets": [{"values": ["bob"], "variation": 1}],
                        "contextTargets": [
                            {"contextKind": "org", "values": ["LaunchDarkly"], "variation": 1},
                            {"contextKind": "user", "values": [], "variation": 1}
                        ],
                        "fallthrough": {"variation": 0}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithMissingPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithMissingPrereq", "version": 42, "on": true,
                        "prerequisites": [{"key": "badPrereq", "variation": 1}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithOffPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithOffPrereq", "version": 42, "on": true,
                        "prerequisites": [{"key": "offPrereq", "variation": 1}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithFirstPrereqAsPrereqToSecondPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithFirstPrereqAsPrereqToSecondPrereq", "version": 42,
                        "on": true,
                        "prerequisites": [
                            {"key": "prereq", "variation": 1},
                            {"key": "flagWithSatisfiedPrereq", "variation": 1}
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithNestedPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithNestedPrereq", "version": 42, "on": true,
                        "prerequisites": [{"key": "flagWithSatisfiedPrereq", "variation": 1}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithSatisfiedPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithSatisfiedPrereq", "version": 42, "on": true,
                        "prerequisites": [{"key": "prereq", "variation": 1}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "prereq".to_string() => serde_json::from_str(r#"{
                        "key": "prereq", "version": 42, "on": true,
                        "targets": [{"values": ["bob"], "variation": 0}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "offPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "offPrereq", "version": 42, "on": false,
                        "fallthrough": {"variation": 1}, "offVariation": 1,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithInRule".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithInRule", "version": 42, "on": false,
                        "rules": [
                            {
                                "id": "in-rule",
                                "clauses": [{"attribute": "team", "op": "in", "values": ["Avengers"]}],
                                "variation": 0
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithSegmentMatchRule".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithSegmentMatchRule", "version": 42, "on": true,
                        "rules": [
                            {
                                "id": "match-rule",
                                "clauses": [
                                    {
                                        "contextKind": "user", "attribute": "key",
                                        "op": "segmentMatch", "values": ["segment"]
                                    }
                                ],
                                "variation": 0
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithPrereqWhichDuplicatesSegmentRuleCheck".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithPrereqWhichDuplicatesSegmentRuleCheck", "version": 42,
                        "on": true,
                        "rules": [
                            {
                                "id": "match-rule",
                                "clauses": [
                                    {
                                        "contextKind": "user", "attribute": "key",
                                        "op": "segmentMatch", "values": ["segment"]
                                    }
                                ],
                                "variation": 0
                            }
                        ],
                        "prerequisites": [{"key": "flagWithSegmentMatchRule", "variation": 0}],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithMalformedRule".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithMalformedRule", "version": 42, "on": false,
                        "rules": [
                            {
                                "id": "in-rule",
                                "clauses": [{"attribute": "key", "op": "in", "values": ["yes"]}]
                            }
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithFailedThenSatisfiedPrereq".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithFailedThenSatisfiedPrereq", "version": 3, "on": true,
                        "prerequisites": [
                            {"key": "offPrereq", "variation": 1},
                            {"key": "prereq", "variation": 1}
                        ],
                        "fallthrough": {"variation": 1}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
                "flagWithBigSegmentMatchRule".to_string() => serde_json::from_str(r#"{
                        "key": "flagWithBigSegmentMatchRule", "version": 5, "on": true,
                        "rules": [
                            {
                                "id": "big-rule",
                                "clauses": [
                                    {
                                        "attribute": "key", "op": "segmentMatch",
                                        "values": ["bigSegment"]
                                    }
                                ],
                                "variation": 1
                            }
                        ],
                        "fallthrough": {"variation": 0}, "offVariation": 0,
                        "variations": [false, true], "salt": "salty"
                    }"#).unwrap(),
            },
            segments: hashmap! {
                "bigSegment".to_string() => serde_json::from_str(r#"{
                        "key": "bigSegment", "included": ["bob"], "unbounded": true,
                        "generation": 2, "salt": "salty", "version": 1
                    }"#).unwrap(),
                "segment".to_string() => serde_json::from_str(r#"{
                        "key": "segment", "included": ["alice"],
                        "includedContexts": [{"values": [], "contextKind": "user"}],
                        "salt": "salty", "version": 1
                    }"#).unwrap()
            },
        }
    }

    pub fn new_from_json_str(flag_json: &str, segment_json: &str) -> Self {
        let flags = serde_json::from_str(flag_json).unwrap();
        let segments = serde_json::from_str(segment_json).unwrap();

        Self { flags, segments }
    }

    /// Builds a store from JSON items, each filed under its own `key`.
    pub fn from_items(flags: Vec<serde_json::Value>, segments: Vec<serde_json::Value>) -> Self {
        fn by_key<T: serde::de::DeserializeOwned>(
            items: Vec<serde_json::Value>,
        ) -> HashMap<String, T> {
            items
                .into_iter()
                .map(|item| {
                    let key = item["key"].as_str().unwrap().to_string();
                    (key, serde_json::from_value(item).unwrap())
                })
                .collect()
        }

        Self {
            flags: by_key(flags),
            segments: by_key(segments),
        }
    }

    pub fn update_flag(&mut self, flag_key: &str, fun: fn(&mut Flag)) {
        let flag = self.flags.get_mut(flag_key).unwrap();
        fun(flag);
    }
}

impl Store for TestStore {
    fn flag(&self, flag_key: &str) -> Result<Option<Flag>, StoreError> {
        Ok(self.flags.get(flag_key).cloned())
    }

    fn segment(&self, segment_key: &str) -> Result<Option<Segment>, StoreError> {
        Ok(self.segments.get(segment_key).cloned())
    }
}
