//! Timer rollup: duration statistics, rate and percentile means

use super::canonical_order;
use super::counter::{elapsed_secs, safe_div};
use super::stat::{AverageAccumulator, KahanSum, StatSummary, StatsAccumulator};
use crate::types::{Number, Points};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Percentiles computed when building a timer from raw durations
pub const DEFAULT_PERCENTILES: [(&str, f64); 5] = [
    ("50", 50.0),
    ("75", 75.0),
    ("98", 98.0),
    ("99", 99.0),
    ("999", 99.9),
];

/// Aggregated timings
///
/// Each percentile is stored as a single scalar. Merging averages the
/// percentile values of the inputs (mean of means).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimerRollup {
    sum: f64,
    count: u64,
    rate: f64,
    sample_count: u32,
    stats: StatSummary,
    percentiles: BTreeMap<String, Number>,
}

impl TimerRollup {
    /// Start assembling a timer
    pub fn builder() -> TimerRollupBuilder {
        TimerRollupBuilder::default()
    }

    /// Build from raw durations
    pub fn from_raw(points: &Points<Number>) -> Self {
        if points.is_empty() {
            return Self::default();
        }

        let mut stats = StatsAccumulator::new();
        let mut sum = KahanSum::default();
        let mut sorted: Vec<Number> = Vec::with_capacity(points.len());
        for value in points.values() {
            stats.add_sample(*value);
            sum.add(value.to_f64());
            sorted.push(*value);
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let percentiles = DEFAULT_PERCENTILES
            .iter()
            .map(|(name, p)| {
                let rank = ((p / 100.0) * n as f64).ceil() as usize;
                let idx = rank.clamp(1, n) - 1;
                (name.to_string(), sorted[idx])
            })
            .collect();

        Self {
            sum: sum.sum(),
            count: n as u64,
            rate: n as f64 / elapsed_secs(points),
            sample_count: n.min(u32::MAX as usize) as u32,
            stats: stats.summary(),
            percentiles,
        }
    }

    /// Merge finer timers
    pub fn merge(points: &Points<TimerRollup>) -> Self {
        let inputs = canonical_order(points, Self::canonical_cmp);
        if let [single] = inputs.as_slice() {
            return (*single).clone();
        }
        if inputs.is_empty() {
            return Self::default();
        }

        let mut sum = KahanSum::default();
        let mut seconds = KahanSum::default();
        let mut count = 0u64;
        let mut sample_count = 0u32;
        let mut stats = StatsAccumulator::new();
        let mut percentiles: BTreeMap<&str, AverageAccumulator> = BTreeMap::new();

        for timer in inputs {
            sum.add(timer.sum);
            count = count.saturating_add(timer.count);
            sample_count = sample_count.saturating_add(timer.sample_count);
            seconds.add(safe_div(timer.count as f64, timer.rate));
            stats.add_summary(&timer.stats);
            for (name, value) in &timer.percentiles {
                percentiles.entry(name.as_str()).or_default().add(*value);
            }
        }

        Self {
            sum: sum.sum(),
            count,
            rate: safe_div(count as f64, seconds.sum()),
            sample_count,
            stats: stats.summary(),
            percentiles: percentiles
                .into_iter()
                .map(|(name, acc)| (name.to_string(), acc.result()))
                .collect(),
        }
    }

    fn canonical_cmp(a: &TimerRollup, b: &TimerRollup) -> Ordering {
        a.count
            .cmp(&b.count)
            .then_with(|| a.sum.total_cmp(&b.sum))
            .then_with(|| a.rate.total_cmp(&b.rate))
            .then_with(|| a.sample_count.cmp(&b.sample_count))
            .then_with(|| a.stats.canonical_cmp(&b.stats))
            .then_with(|| percentiles_cmp(&a.percentiles, &b.percentiles))
    }

    /// Sum of all durations
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of timed events
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Events per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Number of samples summarised
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Average duration
    pub fn average(&self) -> Number {
        self.stats.average
    }

    /// Population variance of durations
    pub fn variance(&self) -> Number {
        self.stats.variance
    }

    /// Shortest duration
    pub fn min(&self) -> Number {
        self.stats.min
    }

    /// Longest duration
    pub fn max(&self) -> Number {
        self.stats.max
    }

    /// Duration stats
    pub fn stats(&self) -> &StatSummary {
        &self.stats
    }

    /// Percentile name to mean value
    pub fn percentiles(&self) -> &BTreeMap<String, Number> {
        &self.percentiles
    }

    /// Value of one percentile
    pub fn percentile(&self, name: &str) -> Option<Number> {
        self.percentiles.get(name).copied()
    }

    /// True if at least one sample was summarised
    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }
}

fn percentiles_cmp(a: &BTreeMap<String, Number>, b: &BTreeMap<String, Number>) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Assembles a [`TimerRollup`] from already-aggregated parts
#[derive(Debug, Clone, Default)]
pub struct TimerRollupBuilder {
    sum: f64,
    count: u64,
    rate: f64,
    sample_count: u32,
    average: Number,
    variance: Number,
    min: Number,
    max: Number,
    percentiles: BTreeMap<String, Number>,
}

impl TimerRollupBuilder {
    /// Sum of durations
    pub fn sum(mut self, sum: f64) -> Self {
        self.sum = sum;
        self
    }

    /// Number of timed events
    pub fn count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Events per second
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Number of samples summarised
    pub fn sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Average duration
    pub fn average(mut self, average: Number) -> Self {
        self.average = average;
        self
    }

    /// Variance of durations
    pub fn variance(mut self, variance: Number) -> Self {
        self.variance = variance;
        self
    }

    /// Shortest duration
    pub fn min(mut self, min: Number) -> Self {
        self.min = min;
        self
    }

    /// Longest duration
    pub fn max(mut self, max: Number) -> Self {
        self.max = max;
        self
    }

    /// Add or replace a percentile
    pub fn percentile(mut self, name: impl Into<String>, value: Number) -> Self {
        self.percentiles.insert(name.into(), value);
        self
    }

    /// Finish
    pub fn build(self) -> TimerRollup {
        TimerRollup {
            sum: self.sum,
            count: self.count,
            rate: self.rate,
            sample_count: self.sample_count,
            stats: StatSummary::new(self.count, self.average, self.variance, self.min, self.max),
            percentiles: self.percentiles,
        }
    }
}
