//! Histogram rollup: a bounded streaming histogram of `(mean, count)` bins
//!
//! Bins are kept sorted by mean. When an insert pushes the number of bins past
//! the capacity, the two adjacent bins whose means are closest are replaced by
//! their count-weighted mean. Ties pick the leftmost pair.

use crate::types::{Number, Points};
use std::cmp::Ordering;

/// Upper bound on bins kept by any histogram
pub const MAX_BIN_SIZE: usize = 64;

/// One histogram bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    /// Mean of the values in this bin
    pub mean: f64,
    /// Number of values in this bin
    pub count: u64,
}

impl Bin {
    /// Create a bin
    pub fn new(mean: f64, count: u64) -> Self {
        Self { mean, count }
    }

    fn order(a: &Bin, b: &Bin) -> Ordering {
        a.mean.total_cmp(&b.mean).then_with(|| a.count.cmp(&b.count))
    }
}

/// Bounded list of bins
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramRollup {
    bins: Vec<Bin>,
}

impl HistogramRollup {
    /// Empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from bins in any order
    ///
    /// Bins go through the same insert path as a merge: equal means are
    /// folded and at most [`MAX_BIN_SIZE`] bins are kept.
    pub fn from_bins(mut bins: Vec<Bin>) -> Self {
        bins.retain(|b| b.count > 0);
        bins.sort_by(Bin::order);
        let mut histogram = Self::new();
        for bin in bins {
            histogram.insert(bin, MAX_BIN_SIZE);
        }
        histogram
    }

    /// Build from raw values
    ///
    /// The bin limit follows Scott's rule, capped at [`MAX_BIN_SIZE`]. Values
    /// are inserted in timestamp order.
    pub fn from_raw(points: &Points<Number>) -> Self {
        let values: Vec<f64> = points.values().map(|v| v.to_f64()).collect();
        if values.is_empty() {
            return Self::new();
        }
        let capacity = scott_bin_count(&values);

        let mut histogram = Self::new();
        for value in values {
            histogram.insert(Bin::new(value, 1), capacity);
        }
        histogram
    }

    /// Merge finer histograms, keeping at most [`MAX_BIN_SIZE`] bins
    pub fn merge(points: &Points<HistogramRollup>) -> Self {
        let mut all: Vec<Bin> = points
            .values()
            .flat_map(|h| h.bins.iter().copied())
            .filter(|b| b.count > 0)
            .collect();
        all.sort_by(Bin::order);

        let mut histogram = Self::new();
        for bin in all {
            histogram.insert(bin, MAX_BIN_SIZE);
        }
        histogram
    }

    fn insert(&mut self, bin: Bin, capacity: usize) {
        let idx = self
            .bins
            .partition_point(|b| b.mean.total_cmp(&bin.mean) == Ordering::Less);
        match self.bins.get_mut(idx) {
            Some(existing) if existing.mean.total_cmp(&bin.mean) == Ordering::Equal => {
                existing.count = existing.count.saturating_add(bin.count);
            }
            _ => self.bins.insert(idx, bin),
        }

        while self.bins.len() > capacity.max(1) {
            self.collapse_closest();
        }
    }

    fn collapse_closest(&mut self) {
        let mut best = 0;
        let mut best_gap = f64::INFINITY;
        for i in 0..self.bins.len().saturating_sub(1) {
            let gap = self.bins[i + 1].mean - self.bins[i].mean;
            if gap < best_gap {
                best_gap = gap;
                best = i;
            }
        }
        if best + 1 >= self.bins.len() {
            return;
        }

        let right = self.bins.remove(best + 1);
        let left = &mut self.bins[best];
        let count = left.count.saturating_add(right.count);
        left.mean = (left.mean * left.count as f64 + right.mean * right.count as f64) / count as f64;
        left.count = count;
    }

    /// Bins in ascending mean order
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Number of bins
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Total number of values across all bins
    pub fn total_count(&self) -> u64 {
        self.bins.iter().map(|b| b.count).sum()
    }

    /// True if any value was recorded
    pub fn has_data(&self) -> bool {
        !self.bins.is_empty()
    }
}

/// Bin count from Scott's rule: `floor(3.5 * stddev / cbrt(n))`, clamped
fn scott_bin_count(values: &[f64]) -> usize {
    let n = values.len() as f64;
    if values.is_empty() {
        return 1;
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let bins = (3.5 * variance.sqrt() / n.cbrt()).floor();
    if bins.is_finite() {
        (bins as usize).clamp(1, MAX_BIN_SIZE)
    } else {
        MAX_BIN_SIZE
    }
}
