//! Time resolutions and slot arithmetic
//!
//! Every granularity divides the same 14-day rotation into a fixed number of
//! slots. Slot boundaries are aligned to the epoch, so two requests that cover
//! the same real slot always compute the same slot index.
//!
//! ```text
//! metrics_full ─▶ metrics_5m ─▶ metrics_20m ─▶ metrics_60m ─▶ metrics_240m ─▶ metrics_1440m
//!   (raw)          4032 slots     1008 slots     336 slots      84 slots        14 slots
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_rollup::granularity::Granularity;
//!
//! let g = Granularity::Min20;
//! assert_eq!(g.finer(), Some(Granularity::Min5));
//! assert_eq!(g.slot(1_200_000), 1);
//!
//! let ranges: Vec<_> = Granularity::Min5.ranges_for_interval(0, 600_000).unwrap().collect();
//! assert_eq!(ranges.len(), 3);
//! ```

use crate::error::ModelError;
use crate::types::{Range, Slot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slots per rotation at the finest rollup resolution
pub const BASE_SLOTS_PER_GRANULARITY: u32 = 4032;

/// Width of a base slot in milliseconds
pub const MILLISECONDS_IN_SLOT: i64 = 300_000;

/// Length of one full slot rotation (14 days)
pub const ROTATION_MILLIS: i64 = BASE_SLOTS_PER_GRANULARITY as i64 * MILLISECONDS_IN_SLOT;

/// One time-resolution tier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Granularity {
    /// Raw samples
    Full,
    /// 5 minute rollups
    Min5,
    /// 20 minute rollups
    Min20,
    /// 60 minute rollups
    Min60,
    /// 4 hour rollups
    Min240,
    /// 1 day rollups
    Min1440,
}

/// Point-count matching strategy for [`Granularity::for_points_in_interval`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionAlgorithm {
    /// Minimise the ratio between requested and available points
    Geometric,
    /// Minimise the absolute difference in point counts
    Linear,
    /// Never return more points than requested when a coarser tier exists
    LessThanEqual,
}

impl Granularity {
    /// All granularities, finest first
    pub const ALL: [Granularity; 6] = [
        Granularity::Full,
        Granularity::Min5,
        Granularity::Min20,
        Granularity::Min60,
        Granularity::Min240,
        Granularity::Min1440,
    ];

    /// Granularities that hold rollups (everything except full resolution)
    pub fn rollup_granularities() -> &'static [Granularity] {
        &Self::ALL[1..]
    }

    /// Coarsest configured granularity
    pub fn coarsest() -> Granularity {
        Granularity::Min1440
    }

    /// Storage name, e.g. `metrics_5m`
    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Full => "metrics_full",
            Granularity::Min5 => "metrics_5m",
            Granularity::Min20 => "metrics_20m",
            Granularity::Min60 => "metrics_60m",
            Granularity::Min240 => "metrics_240m",
            Granularity::Min1440 => "metrics_1440m",
        }
    }

    /// Short name, e.g. `5m`
    pub fn short_name(&self) -> &'static str {
        match self {
            Granularity::Full => "full",
            Granularity::Min5 => "5m",
            Granularity::Min20 => "20m",
            Granularity::Min60 => "60m",
            Granularity::Min240 => "240m",
            Granularity::Min1440 => "1440m",
        }
    }

    /// Slot width in milliseconds
    pub fn milliseconds(&self) -> i64 {
        match self {
            Granularity::Full | Granularity::Min5 => MILLISECONDS_IN_SLOT,
            Granularity::Min20 => 1_200_000,
            Granularity::Min60 => 3_600_000,
            Granularity::Min240 => 14_400_000,
            Granularity::Min1440 => 86_400_000,
        }
    }

    /// Slots per rotation
    pub fn num_slots(&self) -> u32 {
        (ROTATION_MILLIS / self.milliseconds()) as u32
    }

    fn index(&self) -> usize {
        *self as usize
    }

    /// Granularity this one rolls up from, `None` for full resolution
    pub fn finer(&self) -> Option<Granularity> {
        self.index()
            .checked_sub(1)
            .map(|i| Self::ALL[i])
    }

    /// Granularity this one rolls up into, `None` for the coarsest
    pub fn coarser(&self) -> Option<Granularity> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// [`Granularity::finer`] as a `Result`
    pub fn try_finer(&self) -> Result<Granularity, ModelError> {
        self.finer()
            .ok_or(ModelError::NoFinerGranularity(self.name()))
    }

    /// [`Granularity::coarser`] as a `Result`
    pub fn try_coarser(&self) -> Result<Granularity, ModelError> {
        self.coarser()
            .ok_or(ModelError::NoCoarserGranularity(self.name()))
    }

    /// True if `self` is strictly coarser than `other`
    pub fn is_coarser(&self, other: &Granularity) -> bool {
        self > other
    }

    /// Look up a granularity by storage name or short name
    pub fn from_name(name: &str) -> Result<Granularity, ModelError> {
        Self::ALL
            .iter()
            .find(|g| g.name() == name || g.short_name() == name)
            .copied()
            .ok_or_else(|| ModelError::UnknownGranularity(name.to_string()))
    }

    /// Slot holding `millis`
    ///
    /// Equal to `floor(millis / milliseconds) mod num_slots`.
    pub fn slot(&self, millis: i64) -> Slot {
        let base_slot = millis.rem_euclid(ROTATION_MILLIS) / MILLISECONDS_IN_SLOT;
        (self.num_slots() as i64 * base_slot / BASE_SLOTS_PER_GRANULARITY as i64) as Slot
    }

    /// Start of the slot holding `millis`; full resolution is not snapped
    pub fn snap_millis(&self, millis: i64) -> i64 {
        match self {
            Granularity::Full => millis,
            _ => self.snap_to_slot(millis),
        }
    }

    fn snap_to_slot(&self, millis: i64) -> i64 {
        millis.div_euclid(self.milliseconds()) * self.milliseconds()
    }

    /// Slot of this granularity that contains slot `finer_slot` of [`Granularity::finer`]
    pub fn slot_from_finer_slot(&self, finer_slot: Slot) -> Result<Slot, ModelError> {
        let finer = self.try_finer()?;
        if finer_slot >= finer.num_slots() {
            return Err(ModelError::InvalidSlot {
                granularity: finer.name(),
                slot: finer_slot,
                num_slots: finer.num_slots(),
            });
        }
        Ok((finer_slot as u64 * self.num_slots() as u64 / finer.num_slots() as u64) as Slot)
    }

    /// Absolute time range of `slot`, resolved against a reference time
    ///
    /// The result is the most recent occurrence of the slot at or before the
    /// rotation that holds `reference_millis`. A slot numbered after the
    /// reference slot resolves into the previous rotation.
    pub fn derive_range(&self, slot: Slot, reference_millis: i64) -> Result<Range, ModelError> {
        let num_slots = self.num_slots();
        if slot >= num_slots {
            return Err(ModelError::InvalidSlot {
                granularity: self.name(),
                slot,
                num_slots,
            });
        }
        let ref_slot = self.slot(reference_millis);
        let slot_diff = if slot > ref_slot {
            num_slots - slot + ref_slot
        } else {
            ref_slot - slot
        };
        let start = self.snap_to_slot(reference_millis) - slot_diff as i64 * self.milliseconds();
        Range::new(start, start + self.milliseconds() - 1)
    }

    /// Slot-aligned ranges covering `[from, to]`
    ///
    /// Full resolution yields the interval unchanged. Other granularities yield
    /// one range per slot the interval touches, each snapped to the exact slot
    /// bounds. The iterator is finite, ascending, non-overlapping and can be
    /// cloned to restart it.
    pub fn ranges_for_interval(&self, from: i64, to: i64) -> Result<IntervalRanges, ModelError> {
        Range::new(from, to)?;
        Ok(match self {
            Granularity::Full => IntervalRanges {
                step: 0,
                next: from,
                last: to,
                full_res: true,
                done: false,
            },
            _ => IntervalRanges {
                step: self.milliseconds(),
                next: self.snap_millis(from),
                last: self.snap_millis(to),
                full_res: false,
                done: false,
            },
        })
    }

    /// Ranges at this granularity that must be rolled to refresh the coarser
    /// slots overlapping `[from, to]`
    pub fn ranges_to_rollup(&self, from: i64, to: i64) -> Result<IntervalRanges, ModelError> {
        let coarser = self.try_coarser()?;
        let start = coarser.snap_millis(from);
        let stop = coarser.snap_millis(to) + coarser.milliseconds() - 1;
        self.ranges_for_interval(start, stop)
    }

    /// Map every slot range of this granularity overlapping `range` to the
    /// finer ranges it is computed from
    pub fn map_finer_ranges(&self, range: Range) -> Result<Vec<(Range, IntervalRanges)>, ModelError> {
        let finer = self.try_finer()?;
        self.ranges_for_interval(range.start(), range.stop())?
            .map(|slot_range| {
                let children = finer.ranges_for_interval(slot_range.start(), slot_range.stop())?;
                Ok((slot_range, children))
            })
            .collect()
    }

    /// Pick the granularity whose point count over `[from, to)` best matches `points`
    ///
    /// Full resolution is assumed to hold one point every `assumed_interval_ms`.
    pub fn for_points_in_interval(
        from: i64,
        to: i64,
        points: u32,
        algorithm: SelectionAlgorithm,
        assumed_interval_ms: i64,
    ) -> Result<Granularity, ModelError> {
        if from >= to {
            return Err(ModelError::InvalidRange {
                start: from,
                stop: to,
            });
        }
        let requested_duration = (to - from) as f64;
        let points = points.max(1) as f64;
        let available = |g: &Granularity| -> f64 {
            let width = match g {
                Granularity::Full => assumed_interval_ms.max(1),
                _ => g.milliseconds(),
            };
            requested_duration / width as f64
        };

        match algorithm {
            SelectionAlgorithm::Geometric => {
                let mut best = Granularity::Full;
                let mut best_ratio = f64::MAX;
                for g in Self::ALL.iter() {
                    let avail = available(g);
                    let ratio = if avail > points {
                        avail / points
                    } else {
                        points / avail
                    };
                    if ratio < best_ratio {
                        best_ratio = ratio;
                        best = *g;
                    } else {
                        break;
                    }
                }
                Ok(best)
            }
            SelectionAlgorithm::Linear => Ok(Self::closest_linear(points, available)),
            SelectionAlgorithm::LessThanEqual => {
                let g = Self::closest_linear(points, available);
                if available(&g) > points {
                    Ok(g.coarser().unwrap_or(g))
                } else {
                    Ok(g)
                }
            }
        }
    }

    fn closest_linear(points: f64, available: impl Fn(&Granularity) -> f64) -> Granularity {
        let mut best = Granularity::Full;
        let mut closest = f64::MAX;
        for g in Self::ALL.iter() {
            let diff = (points - available(g)).abs().floor();
            if diff < closest {
                closest = diff;
                best = *g;
            } else {
                break;
            }
        }
        best
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Granularity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Lazy sequence of slot-aligned ranges produced by [`Granularity::ranges_for_interval`]
#[derive(Debug, Clone)]
pub struct IntervalRanges {
    step: i64,
    next: i64,
    last: i64,
    full_res: bool,
    done: bool,
}

impl Iterator for IntervalRanges {
    type Item = Range;

    fn next(&mut self) -> Option<Range> {
        if self.done || self.next > self.last {
            return None;
        }
        if self.full_res {
            self.done = true;
            return Range::new(self.next, self.last).ok();
        }
        let start = self.next;
        let stop = start.checked_add(self.step - 1)?;
        match start.checked_add(self.step) {
            Some(n) => self.next = n,
            None => self.done = true,
        }
        Range::new(start, stop).ok()
    }
}
