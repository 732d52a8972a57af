//! Set rollup: distinct value hashes

use super::hashing::{hash_number, hash_str};
use crate::types::{Number, Points};
use std::collections::BTreeSet;

/// Hashes of the distinct values seen in a slot
///
/// Only the hashes are kept, so `count` is an approximation of cardinality
/// when two values collide.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetRollup {
    hashes: BTreeSet<i32>,
}

impl SetRollup {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value by hashing it
    pub fn with_value(mut self, value: Number) -> Self {
        self.hashes.insert(hash_number(value));
        self
    }

    /// Add a string value by hashing it
    pub fn with_str(mut self, value: &str) -> Self {
        self.hashes.insert(hash_str(value));
        self
    }

    /// Add an already hashed value
    pub fn with_hash(mut self, hash: i32) -> Self {
        self.hashes.insert(hash);
        self
    }

    /// Build from raw values
    pub fn from_raw(points: &Points<Number>) -> Self {
        Self {
            hashes: points.values().map(|v| hash_number(*v)).collect(),
        }
    }

    /// Union of finer sets
    pub fn merge(points: &Points<SetRollup>) -> Self {
        Self {
            hashes: points
                .values()
                .flat_map(|s| s.hashes.iter().copied())
                .collect(),
        }
    }

    /// Distinct hashes in ascending order
    pub fn hashes(&self) -> &BTreeSet<i32> {
        &self.hashes
    }

    /// Whether a value's hash is present
    pub fn contains(&self, value: Number) -> bool {
        self.hashes.contains(&hash_number(value))
    }

    /// Number of distinct hashes
    pub fn count(&self) -> usize {
        self.hashes.len()
    }

    /// True if not empty
    pub fn has_data(&self) -> bool {
        !self.hashes.is_empty()
    }
}

impl FromIterator<i32> for SetRollup {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}
