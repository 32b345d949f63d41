use std::collections::HashMap;
use std::sync::RwLock;

use serde::Deserialize;
use thiserror::Error;

use crate::flag::Flag;
use crate::segment::Segment;

/// Error returned by a [Store] lookup that could not be answered. A missing or deleted item is
/// not an error; lookups return `Ok(None)` for those.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store lock was poisoned by a panicking writer")]
    Poisoned,
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Store is an interface for a data store that holds feature flags and segments.
///
/// Implementations return `Ok(None)` for unknown keys and for items that have been deleted.
/// The evaluator calls these from whichever thread evaluates, so shared implementations must
/// synchronize internally.
pub trait Store {
    /// Retrieve the flag with key `flag_key`.
    fn flag(&self, flag_key: &str) -> Result<Option<Flag>, StoreError>;

    /// Retrieve the segment with key `segment_key`.
    fn segment(&self, segment_key: &str) -> Result<Option<Segment>, StoreError>;
}

/// A full data set, in the shape the flag delivery service sends it: flags and segments keyed
/// by their keys.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AllData {
    #[serde(default)]
    pub flags: HashMap<String, Flag>,
    #[serde(default)]
    pub segments: HashMap<String, Segment>,
}

trait Versioned {
    fn key(&self) -> &str;
    fn is_newer_than(&self, other: &Self) -> bool;
}

impl Versioned for Flag {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_newer_than(&self, other: &Self) -> bool {
        Flag::is_newer_than(self, other)
    }
}

impl Versioned for Segment {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_newer_than(&self, other: &Self) -> bool {
        Segment::is_newer_than(self, other)
    }
}

fn upsert<T: Versioned>(items: &mut HashMap<String, T>, item: T) -> bool {
    match items.get(item.key()) {
        Some(existing) if !item.is_newer_than(existing) => false,
        _ => {
            items.insert(item.key().to_owned(), item);
            true
        }
    }
}

/// An in-memory [Store] that can be shared between threads.
///
/// Deleted items are kept as tombstones so that an out-of-order update carrying an older version
/// cannot resurrect them.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<AllData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole data set.
    pub fn init(&self, data: AllData) -> Result<(), StoreError> {
        let mut guard = self.data.write().map_err(|_| StoreError::Poisoned)?;
        *guard = data;
        Ok(())
    }

    /// Stores `flag` unless an item with the same key and an equal or greater version is already
    /// present. Returns whether the flag was stored.
    pub fn upsert_flag(&self, flag: Flag) -> Result<bool, StoreError> {
        let mut guard = self.data.write().map_err(|_| StoreError::Poisoned)?;
        Ok(upsert(&mut guard.flags, flag))
    }

    /// Stores `segment` under the same versioning rule as [MemoryStore::upsert_flag].
    pub fn upsert_segment(&self, segment: Segment) -> Result<bool, StoreError> {
        let mut guard = self.data.write().map_err(|_| StoreError::Poisoned)?;
        Ok(upsert(&mut guard.segments, segment))
    }
}

impl Store for MemoryStore {
    fn flag(&self, flag_key: &str) -> Result<Option<Flag>, StoreError> {
        let guard = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.flags.get(flag_key).filter(|f| !f.deleted).cloned())
    }

    fn segment(&self, segment_key: &str) -> Result<Option<Segment>, StoreError> {
        let guard = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .segments
            .get(segment_key)
            .filter(|s| !s.deleted)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;

    fn flag(key: &str, version: u64, deleted: bool) -> Flag {
        serde_json::from_value(json!({
            "key": key,
            "version": version,
            "deleted": deleted,
            "on": true,
            "fallthrough": {"variation": 0},
            "variations": [version]
        }))
        .unwrap()
    }

    fn segment(key: &str, version: u64, deleted: bool) -> Segment {
        serde_json::from_value(json!({
            "key": key,
            "version": version,
            "deleted": deleted,
            "included": ["alice"]
        }))
        .unwrap()
    }

    #[test]
    fn init_replaces_everything() {
        let store = MemoryStore::new();
        store.upsert_flag(flag("old", 1, false)).unwrap();

        let data: AllData = serde_json::from_value(json!({
            "flags": {"new": {"key": "new", "version": 1}},
            "segments": {"seg": {"key": "seg", "version": 3}}
        }))
        .unwrap();
        store.init(data).unwrap();

        assert_that!(store.flag("old").unwrap()).is_none();
        assert_that!(store.flag("new").unwrap()).is_some();
        assert_that!(store.segment("seg").unwrap()).is_some();
    }

    #[test]
    fn upsert_requires_strictly_greater_version() {
        let store = MemoryStore::new();
        assert!(store.upsert_flag(flag("f", 2, false)).unwrap());
        assert!(!store.upsert_flag(flag("f", 2, false)).unwrap());
        assert!(!store.upsert_flag(flag("f", 1, false)).unwrap());
        assert_eq!(store.flag("f").unwrap().unwrap().version, 2);

        assert!(store.upsert_flag(flag("f", 3, false)).unwrap());
        assert_eq!(store.flag("f").unwrap().unwrap().version, 3);
    }

    #[test]
    fn deleted_items_are_tombstones() {
        let store = MemoryStore::new();
        store.upsert_segment(segment("s", 1, false)).unwrap();
        assert_that!(store.segment("s").unwrap()).is_some();

        assert!(store.upsert_segment(segment("s", 2, true)).unwrap());
        assert_that!(store.segment("s").unwrap()).is_none();

        // an older update arriving late must not resurrect it
        assert!(!store.upsert_segment(segment("s", 1, false)).unwrap());
        assert_that!(store.segment("s").unwrap()).is_none();

        assert!(store.upsert_segment(segment("s", 3, false)).unwrap());
        assert_that!(store.segment("s").unwrap()).is_some();
    }

    #[test]
    fn unknown_keys_are_not_errors() {
        let store = MemoryStore::new();
        assert_that!(store.flag("nope").unwrap()).is_none();
        assert_that!(store.segment("nope").unwrap()).is_none();
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let store = MemoryStore::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.data.write().unwrap();
            panic!("writer failed");
        }));

        assert!(matches!(store.flag("f"), Err(StoreError::Poisoned)));
        assert!(matches!(
            store.upsert_flag(flag("f", 1, false)),
            Err(StoreError::Poisoned)
        ));
    }
}
