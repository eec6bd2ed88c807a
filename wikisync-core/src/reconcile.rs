//! Reconciliation: decide which keys to upsert and which to delete by
//! comparing the source listing against the index listing.
//!
//! Pure functions over two timestamped key listings. Running the pipeline
//! twice with no source changes therefore yields an empty plan on the
//! second run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contract::Stamp;

/// How the upsert set is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Timestamp diff against the index.
    Incremental,
    /// Re-publish every indexed key, delete nothing.
    Force,
    /// Publish every source key, delete nothing. For an empty or freshly
    /// created index, where `Force` would find nothing to do.
    Rebuild,
    /// Exactly one key, no diffing, no deletions.
    Single(String),
}

/// The reconciliation result: keys to create-or-update and keys to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub upsert: Vec<String>,
    pub delete: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upsert.len() + self.delete.len()
    }
}

/// Computes the plan for the given mode.
pub fn plan(mode: &Mode, source: &[Stamp], indexed: &[Stamp]) -> Plan {
    match mode {
        Mode::Incremental => diff(source, indexed),
        Mode::Force => Plan {
            upsert: indexed.iter().map(|s| s.key.clone()).collect(),
            delete: Vec::new(),
        },
        Mode::Rebuild => Plan {
            upsert: source.iter().map(|s| s.key.clone()).collect(),
            delete: Vec::new(),
        },
        Mode::Single(key) => Plan {
            upsert: vec![key.clone()],
            delete: Vec::new(),
        },
    }
}

/// Timestamp diff of source items against indexed items.
///
/// - new: present in source, absent from the index
/// - stale: present in both, source strictly newer (equal timestamps are
///   NOT stale, so items written during the same run are not re-written)
/// - deleted: present in the index, absent from source
pub fn diff(source: &[Stamp], indexed: &[Stamp]) -> Plan {
    let source_by_key: HashMap<&str, DateTime<Utc>> =
        source.iter().map(|s| (s.key.as_str(), s.modified)).collect();
    let indexed_by_key: HashMap<&str, DateTime<Utc>> = indexed
        .iter()
        .map(|s| (s.key.as_str(), s.modified))
        .collect();

    let mut upsert: Vec<String> = source
        .iter()
        .filter(|s| !indexed_by_key.contains_key(s.key.as_str()))
        .map(|s| s.key.clone())
        .collect();
    upsert.extend(
        source
            .iter()
            .filter(|s| {
                indexed_by_key
                    .get(s.key.as_str())
                    .is_some_and(|indexed_at| s.modified > *indexed_at)
            })
            .map(|s| s.key.clone()),
    );

    let delete = indexed
        .iter()
        .filter(|s| !source_by_key.contains_key(s.key.as_str()))
        .map(|s| s.key.clone())
        .collect();

    Plan { upsert, delete }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp(key: &str, minute: u32) -> Stamp {
        Stamp::new(key, Utc.with_ymd_and_hms(2019, 1, 1, 0, minute, 0).unwrap())
    }

    #[test]
    fn new_and_stale_keys_are_upserted_and_missing_keys_deleted() {
        // source {A: t=10, B: t=5}, index {A: t=5, C: t=1}
        let source = vec![stamp("A", 10), stamp("B", 5)];
        let indexed = vec![stamp("A", 5), stamp("C", 1)];
        let plan = diff(&source, &indexed);
        assert_eq!(plan.upsert, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(plan.delete, vec!["C".to_string()]);
    }

    #[test]
    fn diff_is_idempotent() {
        let source = vec![stamp("A", 10), stamp("B", 5)];
        let indexed = vec![stamp("A", 10), stamp("B", 5)];
        assert!(diff(&source, &indexed).is_empty());
    }

    #[test]
    fn equal_timestamps_are_not_stale() {
        let source = vec![stamp("A", 7)];
        let indexed = vec![stamp("A", 7)];
        assert!(diff(&source, &indexed).upsert.is_empty());
        let source = vec![stamp("A", 8)];
        assert_eq!(diff(&source, &indexed).upsert, vec!["A".to_string()]);
    }

    #[test]
    fn index_only_keys_are_deleted_never_upserted() {
        let source = vec![];
        let indexed = vec![stamp("gone", 3)];
        let plan = diff(&source, &indexed);
        assert_eq!(plan.delete, vec!["gone".to_string()]);
        assert!(plan.upsert.is_empty());
    }

    #[test]
    fn force_returns_every_indexed_key() {
        let source = vec![stamp("A", 1)];
        let indexed = vec![stamp("A", 1), stamp("B", 1)];
        let plan = plan(&Mode::Force, &source, &indexed);
        assert_eq!(plan.upsert, vec!["A".to_string(), "B".to_string()]);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn rebuild_returns_every_source_key() {
        let source = vec![stamp("A", 1), stamp("B", 1)];
        let plan = plan(&Mode::Rebuild, &source, &[]);
        assert_eq!(plan.upsert, vec!["A".to_string(), "B".to_string()]);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn single_bypasses_diffing() {
        let source = vec![stamp("A", 1)];
        let indexed = vec![stamp("B", 1)];
        let plan = plan(&Mode::Single("Sanji Abe".to_string()), &source, &indexed);
        assert_eq!(plan.upsert, vec!["Sanji Abe".to_string()]);
        assert!(plan.delete.is_empty());
    }
}
