//! Counter rollup: total count, rate per second and sample count

use super::canonical_order;
use super::stat::KahanSum;
use crate::types::{Number, Points};
use std::cmp::Ordering;

/// Sum of counter increments over a slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterRollup {
    count: Number,
    rate: f64,
    sample_count: u32,
}

impl Default for CounterRollup {
    fn default() -> Self {
        Self {
            count: Number::Long(0),
            rate: 0.0,
            sample_count: 0,
        }
    }
}

/// Divide, yielding zero instead of infinity or NaN for a zero divisor
#[inline]
pub(crate) fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Seconds spanned by a set of points, never less than one
pub(crate) fn elapsed_secs<T>(points: &Points<T>) -> f64 {
    match (points.first(), points.last()) {
        (Some((first, _)), Some((last, _))) => ((last - first) as f64 / 1000.0).max(1.0),
        _ => 1.0,
    }
}

/// Sum that stays integral until an input is floating point or it overflows
#[derive(Debug, Clone, Copy, Default)]
struct NumberSum {
    long: i64,
    double: KahanSum,
    floating: bool,
}

impl NumberSum {
    fn add(&mut self, value: Number) {
        match value {
            Number::Long(v) if !self.floating => match self.long.checked_add(v) {
                Some(sum) => self.long = sum,
                None => {
                    self.floating = true;
                    self.double.add(self.long as f64);
                    self.double.add(v as f64);
                    self.long = 0;
                }
            },
            other => {
                if !self.floating {
                    self.floating = true;
                    self.double.add(self.long as f64);
                    self.long = 0;
                }
                self.double.add(other.to_f64());
            }
        }
    }

    fn result(&self) -> Number {
        if self.floating {
            Number::Double(self.double.sum())
        } else {
            Number::Long(self.long)
        }
    }
}

impl CounterRollup {
    /// Assemble a counter from its parts
    pub fn new(count: Number, rate: f64, sample_count: u32) -> Self {
        Self {
            count,
            rate,
            sample_count,
        }
    }

    /// Build from raw increments
    ///
    /// The rate is the total divided by the seconds between the first and last
    /// sample, with a floor of one second.
    pub fn from_raw(points: &Points<Number>) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let mut sum = NumberSum::default();
        for value in points.values() {
            sum.add(*value);
        }
        let count = sum.result();
        Self {
            count,
            rate: count.to_f64() / elapsed_secs(points),
            sample_count: points.len().min(u32::MAX as usize) as u32,
        }
    }

    /// Merge finer counters
    ///
    /// Counts and sample counts add. The combined rate is the total count over
    /// the total time implied by each input's own count and rate.
    pub fn merge(points: &Points<CounterRollup>) -> Self {
        let inputs = canonical_order(points, Self::canonical_cmp);
        if let [single] = inputs.as_slice() {
            return **single;
        }
        if inputs.is_empty() {
            return Self::default();
        }

        let mut total = NumberSum::default();
        let mut seconds = KahanSum::default();
        let mut sample_count = 0u32;
        for counter in inputs {
            total.add(counter.count);
            seconds.add(safe_div(counter.count.to_f64(), counter.rate));
            sample_count = sample_count.saturating_add(counter.sample_count);
        }
        let count = total.result();
        Self {
            count,
            rate: safe_div(count.to_f64(), seconds.sum()),
            sample_count,
        }
    }

    fn canonical_cmp(a: &CounterRollup, b: &CounterRollup) -> Ordering {
        a.count
            .total_cmp(&b.count)
            .then_with(|| a.rate.total_cmp(&b.rate))
            .then_with(|| a.sample_count.cmp(&b.sample_count))
    }

    /// Total count
    pub fn count(&self) -> Number {
        self.count
    }

    /// Count per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Number of raw samples summarised
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// True if at least one sample was summarised
    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }
}
