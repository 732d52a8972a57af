//! Enum rollup: occurrence counts per string value

use super::hashing::hash_enum_value;
use crate::types::Points;
use std::collections::BTreeMap;

/// Per-value occurrence counts keyed by the value's hash
///
/// The original strings are kept when known, for display only; they are not
/// persisted and do not take part in equality.
#[derive(Debug, Clone, Default)]
pub struct EnumRollup {
    counts: BTreeMap<i64, u64>,
    string_values: BTreeMap<i64, String>,
}

impl PartialEq for EnumRollup {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
    }
}

impl EnumRollup {
    /// Empty rollup
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` occurrences of a string value
    pub fn with_enum_value(mut self, value: &str, count: u64) -> Self {
        let hash = hash_enum_value(value);
        let entry = self.counts.entry(hash).or_insert(0);
        *entry = entry.saturating_add(count);
        self.string_values
            .entry(hash)
            .or_insert_with(|| value.to_string());
        self
    }

    /// Add `count` occurrences of an already hashed value
    pub fn with_hashed_value(mut self, hash: i64, count: u64) -> Self {
        let entry = self.counts.entry(hash).or_insert(0);
        *entry = entry.saturating_add(count);
        self
    }

    /// Build from raw string samples
    pub fn from_strings(points: &Points<String>) -> Self {
        points
            .values()
            .fold(Self::new(), |acc, v| acc.with_enum_value(v, 1))
    }

    /// Sum counts across finer rollups
    pub fn merge(points: &Points<EnumRollup>) -> Self {
        let mut merged = Self::new();
        for rollup in points.values() {
            for (hash, count) in &rollup.counts {
                merged = merged.with_hashed_value(*hash, *count);
            }
            for (hash, value) in &rollup.string_values {
                merged
                    .string_values
                    .entry(*hash)
                    .or_insert_with(|| value.clone());
            }
        }
        merged
    }

    /// Hash to occurrence count
    pub fn counts(&self) -> &BTreeMap<i64, u64> {
        &self.counts
    }

    /// Occurrences of a string value
    pub fn count_of(&self, value: &str) -> u64 {
        self.counts
            .get(&hash_enum_value(value))
            .copied()
            .unwrap_or(0)
    }

    /// Known strings, by hash
    pub fn string_values(&self) -> &BTreeMap<i64, String> {
        &self.string_values
    }

    /// Number of distinct values
    pub fn count(&self) -> usize {
        self.counts.len()
    }

    /// True if any value was counted
    pub fn has_data(&self) -> bool {
        !self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Points<String> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64, v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_strings() {
        let rollup = EnumRollup::from_strings(&strings(&["up", "down", "up"]));
        assert_eq!(rollup.count(), 2);
        assert_eq!(rollup.count_of("up"), 2);
        assert_eq!(rollup.count_of("down"), 1);
        assert_eq!(rollup.count_of("sideways"), 0);
        assert_eq!(
            rollup.string_values().get(&hash_enum_value("up")).map(String::as_str),
            Some("up")
        );
    }

    #[test]
    fn test_merge_sums_counts() {
        let a = EnumRollup::from_strings(&strings(&["a", "b"]));
        let b = EnumRollup::from_strings(&strings(&["b", "c", "c"]));
        let merged = EnumRollup::merge(&vec![(0, a), (1, b)].into_iter().collect());
        assert_eq!(merged.count_of("a"), 1);
        assert_eq!(merged.count_of("b"), 2);
        assert_eq!(merged.count_of("c"), 2);
    }

    #[test]
    fn test_equality_ignores_strings() {
        let named = EnumRollup::new().with_enum_value("x", 1);
        let hashed = EnumRollup::new().with_hashed_value(hash_enum_value("x"), 1);
        assert_eq!(named, hashed);
    }
}
