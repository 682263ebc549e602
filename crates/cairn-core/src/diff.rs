//! Generic string-keyed map diffing.
//!
//! Custom-category maps and the routing table are persisted one blob per key.
//! A [`MapDiff`] captures exactly which keys must be (re)uploaded and which
//! pointers must be dropped; unchanged keys appear in neither set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Difference between two string-keyed maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDiff<V> {
    /// Keys that were added or whose value changed, with the new value.
    pub upserts: BTreeMap<String, V>,
    /// Keys that were removed.
    pub deletes: BTreeSet<String>,
}

impl<V> Default for MapDiff<V> {
    fn default() -> Self {
        Self {
            upserts: BTreeMap::new(),
            deletes: BTreeSet::new(),
        }
    }
}

impl<V> MapDiff<V> {
    /// Returns true if the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Returns the number of keys touched by the diff.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }
}

impl<V: Clone> MapDiff<V> {
    /// Applies this diff to `target` in place.
    pub fn apply(&self, target: &mut BTreeMap<String, V>) {
        for key in &self.deletes {
            target.remove(key);
        }
        for (key, value) in &self.upserts {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Computes the diff turning `previous` into `current`.
///
/// Keys are visited in order, so the resulting sets are deterministic.
#[must_use]
pub fn diff_maps<V: Clone + PartialEq>(
    previous: &BTreeMap<String, V>,
    current: &BTreeMap<String, V>,
) -> MapDiff<V> {
    let upserts = current
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let deletes = previous
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();
    MapDiff { upserts, deletes }
}

/// A collaborator that knows how to diff its own string-keyed map.
///
/// The persistence layer treats the result as opaque: it only uploads the
/// upserted values and drops pointers for the deleted keys.
pub trait StringKeyDiffProvider<V> {
    /// Returns the diff, or `None` if the provider has nothing to report.
    fn provide_diff(&self) -> Option<&MapDiff<V>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(entries: &[(&str, i32)]) -> BTreeMap<String, i32> {
        entries.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_diff_upserts_and_deletes() {
        let previous = map(&[("a", 1), ("b", 2), ("c", 3)]);
        let current = map(&[("a", 1), ("b", 20), ("d", 4)]);

        let diff = diff_maps(&previous, &current);
        assert_eq!(diff.upserts, map(&[("b", 20), ("d", 4)]));
        assert_eq!(diff.deletes, BTreeSet::from(["c".to_string()]));
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn test_unchanged_maps_yield_empty_diff() {
        let m = map(&[("a", 1)]);
        assert!(diff_maps(&m, &m).is_empty());
    }

    proptest! {
        #[test]
        fn prop_apply_reconstructs_current(
            previous in prop::collection::btree_map("[a-e]", 0..4i32, 0..5),
            current in prop::collection::btree_map("[a-e]", 0..4i32, 0..5),
        ) {
            let diff = diff_maps(&previous, &current);
            let mut rebuilt = previous.clone();
            diff.apply(&mut rebuilt);
            prop_assert_eq!(&rebuilt, &current);

            // Unchanged keys are never touched.
            for (key, value) in &current {
                if previous.get(key) == Some(value) {
                    prop_assert!(!diff.upserts.contains_key(key));
                }
            }
        }
    }
}
