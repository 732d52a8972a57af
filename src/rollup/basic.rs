//! Basic rollup: count, average, variance, min and max

use super::canonical_order;
use super::stat::{StatSummary, StatsAccumulator};
use crate::types::{Number, Points};

/// Summary statistics over numeric samples
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BasicRollup {
    stats: StatSummary,
}

impl BasicRollup {
    /// Wrap an existing summary
    pub fn new(stats: StatSummary) -> Self {
        Self { stats }
    }

    /// The empty rollup (`count == 0`)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start accumulating a rollup
    pub fn builder() -> BasicRollupBuilder {
        BasicRollupBuilder::default()
    }

    /// Build from raw numeric samples
    pub fn from_raw(points: &Points<Number>) -> Self {
        points
            .values()
            .fold(Self::builder(), |b, v| b.with_sample(*v))
            .build()
    }

    /// Merge finer rollups into one
    ///
    /// The result does not depend on the order of the inputs.
    pub fn merge(points: &Points<BasicRollup>) -> Self {
        let inputs = canonical_order(points, |a, b| a.stats.canonical_cmp(&b.stats));
        if let [single] = inputs.as_slice() {
            return **single;
        }
        inputs
            .into_iter()
            .fold(Self::builder(), |b, r| b.with_rollup(r))
            .build()
    }

    /// Number of samples summarised
    pub fn count(&self) -> u64 {
        self.stats.count
    }

    /// Mean
    pub fn average(&self) -> Number {
        self.stats.average
    }

    /// Population variance
    pub fn variance(&self) -> Number {
        self.stats.variance
    }

    /// Minimum
    pub fn min(&self) -> Number {
        self.stats.min
    }

    /// Maximum
    pub fn max(&self) -> Number {
        self.stats.max
    }

    /// All stats together
    pub fn stats(&self) -> &StatSummary {
        &self.stats
    }

    /// True if at least one sample was summarised
    pub fn has_data(&self) -> bool {
        self.stats.count > 0
    }
}

/// Accumulates samples or partial rollups into a [`BasicRollup`]
#[derive(Debug, Clone, Default)]
pub struct BasicRollupBuilder {
    acc: StatsAccumulator,
}

impl BasicRollupBuilder {
    /// Add one raw sample
    pub fn with_sample(mut self, value: Number) -> Self {
        self.acc.add_sample(value);
        self
    }

    /// Add a partial rollup
    pub fn with_rollup(mut self, rollup: &BasicRollup) -> Self {
        self.acc.add_summary(&rollup.stats);
        self
    }

    /// Finish
    pub fn build(self) -> BasicRollup {
        BasicRollup::new(self.acc.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(values: &[i64]) -> Points<Number> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 1000, Number::Long(*v)))
            .collect()
    }

    #[test]
    fn test_from_raw_integers() {
        let rollup = BasicRollup::from_raw(&raw(&[10, 20, 30]));
        assert_eq!(rollup.count(), 3);
        assert_eq!(rollup.average(), Number::Long(20));
        assert_eq!(rollup.min(), Number::Long(10));
        assert_eq!(rollup.max(), Number::Long(30));
        match rollup.variance() {
            Number::Double(v) => assert!((v - 200.0 / 3.0).abs() < 1e-9),
            other => panic!("variance must be floating point, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_weighted() {
        let first = BasicRollup::from_raw(&raw(&[10, 20, 30]));
        let second = BasicRollup::from_raw(&raw(&[100]));
        let merged = BasicRollup::merge(&vec![(0, first), (300_000, second)].into_iter().collect());
        assert_eq!(merged.count(), 4);
        assert_eq!(merged.average(), Number::Long(40));
        assert_eq!(merged.min(), Number::Long(10));
        assert_eq!(merged.max(), Number::Long(100));
    }

    #[test]
    fn test_merge_matches_raw_variance() {
        let a = BasicRollup::from_raw(&raw(&[1, 2, 3, 4]));
        let b = BasicRollup::from_raw(&raw(&[5, 6, 7, 8]));
        let merged = BasicRollup::merge(&vec![(0, a), (1, b)].into_iter().collect());
        let direct = BasicRollup::from_raw(&raw(&[1, 2, 3, 4, 5, 6, 7, 8]));
        assert!((merged.variance().to_f64() - direct.variance().to_f64()).abs() < 1e-9);
    }

    #[test]
    fn test_merge_singleton_is_identity() {
        let values: Points<Number> = vec![(0, Number::Double(0.1)), (1, Number::Double(0.7))]
            .into_iter()
            .collect();
        let rollup = BasicRollup::from_raw(&values);
        let merged = BasicRollup::merge(&vec![(0, rollup)].into_iter().collect());
        assert_eq!(merged, rollup);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(BasicRollup::from_raw(&Points::new()), BasicRollup::empty());
        assert_eq!(BasicRollup::merge(&Points::new()), BasicRollup::empty());
        assert!(!BasicRollup::empty().has_data());
    }

    #[test]
    fn test_merge_skips_empty_partials() {
        let a = BasicRollup::from_raw(&raw(&[4, 6]));
        let merged = BasicRollup::merge(&vec![(0, a), (1, BasicRollup::empty())].into_iter().collect());
        assert_eq!(merged.count(), 2);
        assert_eq!(merged.min(), Number::Long(4));
        assert_eq!(merged.average(), Number::Long(5));
    }
}
