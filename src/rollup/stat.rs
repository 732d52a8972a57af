//! Tagged statistics and their accumulators
//!
//! - Welford's algorithm for mean/variance over raw samples
//! - Chan's parallel formula for combining partial variances
//! - Kahan summation for floating point sums
//!
//! Averages remember whether every input was integral; if so the result is an
//! exact integer ([`Number::Long`]) computed with integer division.

use crate::types::Number;
use std::cmp::Ordering;

/// Stat block discriminator used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatType {
    /// Mean of the samples
    Average = 0,
    /// Population variance of the samples
    Variance = 1,
    /// Smallest sample
    Min = 2,
    /// Largest sample
    Max = 3,
}

impl StatType {
    /// Wire byte
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte
    pub fn from_byte(b: u8) -> Option<StatType> {
        match b {
            0 => Some(StatType::Average),
            1 => Some(StatType::Variance),
            2 => Some(StatType::Min),
            3 => Some(StatType::Max),
            _ => None,
        }
    }
}

/// Count, average, variance, min and max of a set of samples
///
/// A summary with `count == 0` is the empty sentinel; its stats are all
/// `Long(0)` and carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSummary {
    /// Number of samples summarised
    pub count: u64,
    /// Mean
    pub average: Number,
    /// Population variance
    pub variance: Number,
    /// Minimum
    pub min: Number,
    /// Maximum
    pub max: Number,
}

impl StatSummary {
    /// The empty summary
    pub const EMPTY: StatSummary = StatSummary {
        count: 0,
        average: Number::Long(0),
        variance: Number::Long(0),
        min: Number::Long(0),
        max: Number::Long(0),
    };

    /// Build a summary, normalising `count == 0` to [`StatSummary::EMPTY`]
    pub fn new(count: u64, average: Number, variance: Number, min: Number, max: Number) -> Self {
        if count == 0 {
            return Self::EMPTY;
        }
        Self {
            count,
            average,
            variance,
            min,
            max,
        }
    }

    /// Value of one stat
    pub fn get(&self, stat: StatType) -> Number {
        match stat {
            StatType::Average => self.average,
            StatType::Variance => self.variance,
            StatType::Min => self.min,
            StatType::Max => self.max,
        }
    }

    /// Total order over summaries, used to fold merge inputs deterministically
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| self.average.total_cmp(&other.average))
            .then_with(|| self.variance.total_cmp(&other.variance))
            .then_with(|| self.min.total_cmp(&other.min))
            .then_with(|| self.max.total_cmp(&other.max))
    }
}

impl Default for StatSummary {
    fn default() -> Self {
        Self::EMPTY
    }
}

// =============================================================================
// Accumulators
// =============================================================================

/// Kahan summation for accurate floating-point sums
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    /// Add a value to the sum
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// Current sum
    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

/// Running average that stays integral while every input is integral
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageAccumulator {
    count: u64,
    long_sum: i128,
    double_sum: KahanSum,
    floating: bool,
}

impl AverageAccumulator {
    /// Add one raw sample
    pub fn add(&mut self, value: Number) {
        self.add_weighted(value, 1);
    }

    /// Add a partial average that summarised `count` samples
    pub fn add_weighted(&mut self, average: Number, count: u64) {
        if count == 0 {
            return;
        }
        self.count += count;
        match average {
            Number::Long(v) => self.long_sum += v as i128 * count as i128,
            Number::Double(v) => {
                self.floating = true;
                self.double_sum.add(v * count as f64);
            }
        }
    }

    /// Current average, `Long(0)` when empty
    pub fn result(&self) -> Number {
        if self.count == 0 {
            return Number::Long(0);
        }
        if self.floating {
            Number::Double((self.long_sum as f64 + self.double_sum.sum()) / self.count as f64)
        } else {
            Number::Long((self.long_sum / self.count as i128) as i64)
        }
    }
}

/// Welford state for population variance
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl VarianceAccumulator {
    /// Add one raw sample
    #[inline]
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Combine a partial `(count, mean, population variance)` using Chan's formula
    pub fn add_partial(&mut self, count: u64, mean: f64, variance: f64) {
        self.merge(&VarianceAccumulator {
            count,
            mean,
            m2: variance * count as f64,
        });
    }

    /// Merge another accumulator into this one
    pub fn merge(&mut self, other: &VarianceAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }

        let combined_count = self.count + other.count;
        let delta = other.mean - self.mean;
        let new_mean = self.mean + delta * (other.count as f64 / combined_count as f64);
        let new_m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64 / combined_count as f64);

        self.count = combined_count;
        self.mean = new_mean;
        self.m2 = new_m2;
    }

    /// Population variance, `0.0` when empty
    #[inline]
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Accumulates a [`StatSummary`] from raw samples or partial summaries
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAccumulator {
    count: u64,
    average: AverageAccumulator,
    variance: VarianceAccumulator,
    min: Option<Number>,
    max: Option<Number>,
}

impl StatsAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one raw sample
    pub fn add_sample(&mut self, value: Number) {
        self.count += 1;
        self.average.add(value);
        self.variance.add(value.to_f64());
        self.track_extremes(value, value);
    }

    /// Add a partial summary; empty summaries contribute nothing
    pub fn add_summary(&mut self, summary: &StatSummary) {
        if summary.count == 0 {
            return;
        }
        self.count += summary.count;
        self.average.add_weighted(summary.average, summary.count);
        self.variance.add_partial(
            summary.count,
            summary.average.to_f64(),
            summary.variance.to_f64(),
        );
        self.track_extremes(summary.min, summary.max);
    }

    fn track_extremes(&mut self, min: Number, max: Number) {
        self.min = Some(match self.min {
            Some(cur) if cur.total_cmp(&min) != Ordering::Greater => cur,
            _ => min,
        });
        self.max = Some(match self.max {
            Some(cur) if cur.total_cmp(&max) != Ordering::Less => cur,
            _ => max,
        });
    }

    /// Number of samples seen so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Summary of everything added
    pub fn summary(&self) -> StatSummary {
        StatSummary::new(
            self.count,
            self.average.result(),
            Number::Double(self.variance.variance()),
            self.min.unwrap_or_default(),
            self.max.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_average_stays_integral() {
        let mut avg = AverageAccumulator::default();
        for v in [2, 4, 4] {
            avg.add(Number::Long(v));
        }
        assert_eq!(avg.result(), Number::Long(3));
    }

    #[test]
    fn test_double_average() {
        let mut avg = AverageAccumulator::default();
        for v in [2.0, 4.0, 4.0] {
            avg.add(Number::Double(v));
        }
        match avg.result() {
            Number::Double(v) => assert!((v - 10.0 / 3.0).abs() < 1e-12),
            other => panic!("expected double, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_average_is_floating() {
        let mut avg = AverageAccumulator::default();
        avg.add(Number::Long(1));
        avg.add(Number::Double(2.0));
        assert_eq!(avg.result(), Number::Double(1.5));
    }

    #[test]
    fn test_weighted_average() {
        let mut avg = AverageAccumulator::default();
        avg.add_weighted(Number::Long(20), 3);
        avg.add_weighted(Number::Long(100), 1);
        assert_eq!(avg.result(), Number::Long(40));
    }

    #[test]
    fn test_welford_population_variance() {
        let mut var = VarianceAccumulator::default();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0] {
            var.add(v);
        }
        assert!((var.variance() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_variance_combination() {
        let mut left = VarianceAccumulator::default();
        for v in [10.0, 30.0, 20.0] {
            left.add(v);
        }
        let mut right = VarianceAccumulator::default();
        for v in [40.0, 70.0, 60.0, 50.0] {
            right.add(v);
        }

        let mut combined = VarianceAccumulator::default();
        combined.add_partial(3, 20.0, left.variance());
        combined.add_partial(4, 55.0, right.variance());
        assert!((combined.variance() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_extremes_keep_tag() {
        let mut acc = StatsAccumulator::new();
        acc.add_sample(Number::Long(5));
        acc.add_sample(Number::Double(7.5));
        acc.add_sample(Number::Long(-2));
        let s = acc.summary();
        assert_eq!(s.min, Number::Long(-2));
        assert_eq!(s.max, Number::Double(7.5));
        assert_eq!(s.count, 3);
    }

    #[test]
    fn test_empty_summary() {
        let acc = StatsAccumulator::new();
        assert_eq!(acc.summary(), StatSummary::EMPTY);
        assert_eq!(
            StatSummary::new(0, Number::Long(9), Number::Long(9), Number::Long(9), Number::Long(9)),
            StatSummary::EMPTY
        );
    }

    #[test]
    fn test_stat_type_bytes() {
        for t in [StatType::Average, StatType::Variance, StatType::Min, StatType::Max] {
            assert_eq!(StatType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(StatType::from_byte(4), None);
    }
}
