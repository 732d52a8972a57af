//! Gauge rollup: basic stats plus the latest observed value

use super::basic::{BasicRollup, BasicRollupBuilder};
use super::canonical_order;
use crate::types::{Number, Points};
use std::cmp::Ordering;

/// Basic statistics plus the most recent `(timestamp, value)`
///
/// When two candidates share a timestamp the numerically larger value wins,
/// and a `Double` wins over an equal `Long`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GaugeRollup {
    basic: BasicRollup,
    latest_timestamp: i64,
    latest_value: Number,
}

impl GaugeRollup {
    /// Assemble a gauge from its parts
    pub fn new(basic: BasicRollup, latest_timestamp: i64, latest_value: Number) -> Self {
        Self {
            basic,
            latest_timestamp,
            latest_value,
        }
    }

    /// The empty gauge
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from raw samples; the latest value is the last point
    pub fn from_raw(points: &Points<Number>) -> Self {
        let basic = BasicRollup::from_raw(points);
        match points.last() {
            Some((ts, value)) => Self::new(basic, ts, *value),
            None => Self::empty(),
        }
    }

    /// Merge finer gauges
    pub fn merge(points: &Points<GaugeRollup>) -> Self {
        let inputs = canonical_order(points, Self::canonical_cmp);
        if let [single] = inputs.as_slice() {
            return **single;
        }

        let mut builder = BasicRollupBuilder::default();
        let mut latest: Option<(i64, Number)> = None;
        for gauge in inputs.into_iter().filter(|g| g.has_data()) {
            builder = builder.with_rollup(&gauge.basic);
            let candidate = (gauge.latest_timestamp, gauge.latest_value);
            latest = match latest {
                Some(current) if Self::latest_cmp(current, candidate) != Ordering::Less => {
                    Some(current)
                }
                _ => Some(candidate),
            };
        }

        match latest {
            Some((ts, value)) => Self::new(builder.build(), ts, value),
            None => Self::empty(),
        }
    }

    fn latest_cmp(a: (i64, Number), b: (i64, Number)) -> Ordering {
        a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
    }

    fn canonical_cmp(a: &GaugeRollup, b: &GaugeRollup) -> Ordering {
        a.basic
            .stats()
            .canonical_cmp(b.basic.stats())
            .then_with(|| {
                Self::latest_cmp(
                    (a.latest_timestamp, a.latest_value),
                    (b.latest_timestamp, b.latest_value),
                )
            })
    }

    /// Underlying basic stats
    pub fn basic(&self) -> &BasicRollup {
        &self.basic
    }

    /// Timestamp of the latest value
    pub fn latest_timestamp(&self) -> i64 {
        self.latest_timestamp
    }

    /// Latest value
    pub fn latest_value(&self) -> Number {
        self.latest_value
    }

    /// Number of samples summarised
    pub fn count(&self) -> u64 {
        self.basic.count()
    }

    /// True if at least one sample was summarised
    pub fn has_data(&self) -> bool {
        self.basic.has_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(values: &[(i64, i64)]) -> Points<Number> {
        values.iter().map(|(t, v)| (*t, Number::Long(*v))).collect()
    }

    #[test]
    fn test_latest_from_raw() {
        let set0 = GaugeRollup::from_raw(&points(&[(0, 10), (1, 30), (2, 20)]));
        assert_eq!(set0.latest_value(), Number::Long(20));
        assert_eq!(set0.latest_timestamp(), 2);
        let set1 = GaugeRollup::from_raw(&points(&[(3, 40), (4, 70), (5, 60), (6, 50)]));
        assert_eq!(set1.latest_value(), Number::Long(50));
    }

    #[test]
    fn test_merge_gauges() {
        let set0 = GaugeRollup::from_raw(&points(&[(0, 10), (1, 30), (2, 20)]));
        let set1 = GaugeRollup::from_raw(&points(&[(3, 40), (4, 70), (5, 60), (6, 50)]));
        let merged = GaugeRollup::merge(&vec![(0, set0), (3, set1)].into_iter().collect());

        assert_eq!(merged.count(), 7);
        assert_eq!(merged.basic().average(), Number::Long(40));
        assert_eq!(merged.basic().min(), Number::Long(10));
        assert_eq!(merged.basic().max(), Number::Long(70));
        assert_eq!(merged.latest_value(), Number::Long(50));
        assert_eq!(merged.latest_timestamp(), 6);
        assert!((merged.basic().variance().to_f64() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_latest_tie_break_is_deterministic() {
        let a = GaugeRollup::from_raw(&points(&[(5, 1)]));
        let b = GaugeRollup::from_raw(&points(&[(5, 9)]));
        let ab = GaugeRollup::merge(&vec![(0, a), (1, b)].into_iter().collect());
        let ba = GaugeRollup::merge(&vec![(0, b), (1, a)].into_iter().collect());
        assert_eq!(ab.latest_value(), Number::Long(9));
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_empty_gauge() {
        assert_eq!(GaugeRollup::from_raw(&Points::new()), GaugeRollup::empty());
        assert!(!GaugeRollup::merge(&Points::new()).has_data());
    }
}
