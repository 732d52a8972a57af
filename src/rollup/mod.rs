//! Rollup variants and their merge algebra
//!
//! A rollup is an immutable statistical summary of the samples that fell in one
//! slot. Every variant can be built from raw samples (`from_raw`) or from finer
//! rollups of the same variant (`merge`). Merges are exactly independent of
//! input order: inputs are folded in a canonical order, not in timestamp order.
//!
//! | Type | Byte | Built from raw | Merge |
//! |------|------|----------------|-------|
//! | Basic | `r` | count/avg/var/min/max | weighted |
//! | Gauge | `G` | basic + last point | weighted + latest |
//! | Counter | `C` | sum + rate | sums, combined rate |
//! | Timer | `T` | stats + percentiles | weighted, mean of percentiles |
//! | Set | `S` | value hashes | union |
//! | Enum | `E` | (pre-aggregated only) | per-hash sum |
//! | Histogram | `H` | streaming bins | re-binned |

pub mod basic;
pub mod counter;
pub mod enums;
pub mod gauge;
pub mod hashing;
pub mod histogram;
pub mod set;
pub mod stat;
pub mod timer;

pub use basic::{BasicRollup, BasicRollupBuilder};
pub use counter::CounterRollup;
pub use enums::EnumRollup;
pub use gauge::GaugeRollup;
pub use histogram::{Bin, HistogramRollup, MAX_BIN_SIZE};
pub use set::SetRollup;
pub use stat::{StatSummary, StatType};
pub use timer::{TimerRollup, TimerRollupBuilder};

use crate::error::{CodecError, RollupError};
use crate::granularity::Granularity;
use crate::types::{Number, Points};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Merge inputs sorted by a total order over their contents
pub(crate) fn canonical_order<T>(
    points: &Points<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Vec<&T> {
    let mut inputs: Vec<&T> = points.values().collect();
    inputs.sort_by(|a, b| cmp(a, b));
    inputs
}

// =============================================================================
// RollupType
// =============================================================================

/// The closed set of rollup kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupType {
    /// Count, average, variance, min, max
    Basic,
    /// Basic plus latest value
    Gauge,
    /// Sum and rate
    Counter,
    /// Duration statistics
    Timer,
    /// Distinct values
    Set,
    /// String value counts
    Enum,
    /// Streaming histogram
    Histogram,
}

impl RollupType {
    /// Every rollup type
    pub const ALL: [RollupType; 7] = [
        RollupType::Basic,
        RollupType::Gauge,
        RollupType::Counter,
        RollupType::Timer,
        RollupType::Set,
        RollupType::Enum,
        RollupType::Histogram,
    ];

    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            RollupType::Basic => "basic",
            RollupType::Gauge => "gauge",
            RollupType::Counter => "counter",
            RollupType::Timer => "timer",
            RollupType::Set => "set",
            RollupType::Enum => "enum",
            RollupType::Histogram => "histogram",
        }
    }

    /// Single-byte tag
    pub fn type_byte(&self) -> u8 {
        match self {
            RollupType::Basic => b'r',
            RollupType::Gauge => b'G',
            RollupType::Counter => b'C',
            RollupType::Timer => b'T',
            RollupType::Set => b'S',
            RollupType::Enum => b'E',
            RollupType::Histogram => b'H',
        }
    }

    /// Parse a single-byte tag
    pub fn from_type_byte(b: u8) -> Result<RollupType, CodecError> {
        RollupType::ALL
            .into_iter()
            .find(|t| t.type_byte() == b)
            .ok_or_else(|| CodecError::UnsupportedType(format!("type byte 0x{:02x}", b)))
    }

    /// Whether data at `source` granularity is raw samples for this type
    ///
    /// Enum metrics are pre-aggregated at ingest, so their full resolution
    /// rows already hold enum rollups.
    pub fn input_is_raw(&self, source: Granularity) -> bool {
        source == Granularity::Full && *self != RollupType::Enum
    }

    /// Compute a rollup of this type from data read at `source` granularity
    pub fn compute(&self, source: Granularity, input: &RollupInput) -> Result<Rollup, RollupError> {
        match (input, self.input_is_raw(source)) {
            (RollupInput::Raw(points), true) => self.from_raw(points),
            (RollupInput::Rollups(points), false) => {
                if points.is_empty() {
                    return Ok(self.empty());
                }
                self.merge(points)
            }
            (RollupInput::Raw(_), false) => Err(self.unsupported("raw samples")),
            (RollupInput::Rollups(_), true) => Err(self.unsupported("finer rollups")),
        }
    }

    fn from_raw(&self, points: &Points<Number>) -> Result<Rollup, RollupError> {
        Ok(match self {
            RollupType::Basic => Rollup::Basic(BasicRollup::from_raw(points)),
            RollupType::Gauge => Rollup::Gauge(GaugeRollup::from_raw(points)),
            RollupType::Counter => Rollup::Counter(CounterRollup::from_raw(points)),
            RollupType::Timer => Rollup::Timer(TimerRollup::from_raw(points)),
            RollupType::Set => Rollup::Set(SetRollup::from_raw(points)),
            RollupType::Histogram => Rollup::Histogram(HistogramRollup::from_raw(points)),
            RollupType::Enum => return Err(self.unsupported("raw numeric samples")),
        })
    }

    fn merge(&self, points: &Points<Rollup>) -> Result<Rollup, RollupError> {
        Ok(match self {
            RollupType::Basic => Rollup::Basic(BasicRollup::merge(&self.narrow(points, Rollup::as_basic)?)),
            RollupType::Gauge => Rollup::Gauge(GaugeRollup::merge(&self.narrow(points, Rollup::as_gauge)?)),
            RollupType::Counter => {
                Rollup::Counter(CounterRollup::merge(&self.narrow(points, Rollup::as_counter)?))
            }
            RollupType::Timer => Rollup::Timer(TimerRollup::merge(&self.narrow(points, Rollup::as_timer)?)),
            RollupType::Set => Rollup::Set(SetRollup::merge(&self.narrow(points, Rollup::as_set)?)),
            RollupType::Enum => Rollup::Enum(EnumRollup::merge(&self.narrow(points, Rollup::as_enum)?)),
            RollupType::Histogram => {
                Rollup::Histogram(HistogramRollup::merge(&self.narrow(points, Rollup::as_histogram)?))
            }
        })
    }

    fn narrow<T: Clone>(
        &self,
        points: &Points<Rollup>,
        pick: impl Fn(&Rollup) -> Option<&T>,
    ) -> Result<Points<T>, RollupError> {
        points
            .iter()
            .map(|(ts, rollup)| match pick(rollup) {
                Some(inner) => Ok((*ts, inner.clone())),
                None => Err(RollupError::MixedVariants {
                    expected: self.name().to_string(),
                    found: rollup.rollup_type().name().to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|v| v.into_iter().collect())
    }

    /// The empty rollup of this type
    pub fn empty(&self) -> Rollup {
        match self {
            RollupType::Basic => Rollup::Basic(BasicRollup::empty()),
            RollupType::Gauge => Rollup::Gauge(GaugeRollup::empty()),
            RollupType::Counter => Rollup::Counter(CounterRollup::default()),
            RollupType::Timer => Rollup::Timer(TimerRollup::default()),
            RollupType::Set => Rollup::Set(SetRollup::new()),
            RollupType::Enum => Rollup::Enum(EnumRollup::new()),
            RollupType::Histogram => Rollup::Histogram(HistogramRollup::new()),
        }
    }

    fn unsupported(&self, input: &str) -> RollupError {
        RollupError::UnsupportedInput {
            rollup_type: self.name().to_string(),
            input: input.to_string(),
        }
    }
}

impl fmt::Display for RollupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RollupType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        RollupType::ALL
            .into_iter()
            .find(|t| t.name() == lower)
            .ok_or_else(|| CodecError::UnsupportedType(s.to_string()))
    }
}

// =============================================================================
// Rollup
// =============================================================================

/// Input to [`RollupType::compute`]
#[derive(Debug, Clone, PartialEq)]
pub enum RollupInput {
    /// Raw numeric samples from full resolution
    Raw(Points<Number>),
    /// Rollups from the next finer granularity
    Rollups(Points<Rollup>),
}

/// Any rollup value
#[derive(Debug, Clone, PartialEq)]
pub enum Rollup {
    /// [`BasicRollup`]
    Basic(BasicRollup),
    /// [`GaugeRollup`]
    Gauge(GaugeRollup),
    /// [`CounterRollup`]
    Counter(CounterRollup),
    /// [`TimerRollup`]
    Timer(TimerRollup),
    /// [`SetRollup`]
    Set(SetRollup),
    /// [`EnumRollup`]
    Enum(EnumRollup),
    /// [`HistogramRollup`]
    Histogram(HistogramRollup),
}

macro_rules! rollup_accessors {
    ($($variant:ident => $as_fn:ident, $ty:ty;)*) => {
        impl Rollup {
            $(
                #[doc = concat!("Borrow as [`", stringify!($ty), "`] if this is that variant")]
                pub fn $as_fn(&self) -> Option<&$ty> {
                    match self {
                        Rollup::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<$ty> for Rollup {
                fn from(inner: $ty) -> Self {
                    Rollup::$variant(inner)
                }
            }
        )*
    };
}

rollup_accessors! {
    Basic => as_basic, BasicRollup;
    Gauge => as_gauge, GaugeRollup;
    Counter => as_counter, CounterRollup;
    Timer => as_timer, TimerRollup;
    Set => as_set, SetRollup;
    Enum => as_enum, EnumRollup;
    Histogram => as_histogram, HistogramRollup;
}

impl Rollup {
    /// The variant's type tag
    pub fn rollup_type(&self) -> RollupType {
        match self {
            Rollup::Basic(_) => RollupType::Basic,
            Rollup::Gauge(_) => RollupType::Gauge,
            Rollup::Counter(_) => RollupType::Counter,
            Rollup::Timer(_) => RollupType::Timer,
            Rollup::Set(_) => RollupType::Set,
            Rollup::Enum(_) => RollupType::Enum,
            Rollup::Histogram(_) => RollupType::Histogram,
        }
    }

    /// True if the rollup summarises at least one sample
    pub fn has_data(&self) -> bool {
        match self {
            Rollup::Basic(r) => r.has_data(),
            Rollup::Gauge(r) => r.has_data(),
            Rollup::Counter(r) => r.has_data(),
            Rollup::Timer(r) => r.has_data(),
            Rollup::Set(r) => r.has_data(),
            Rollup::Enum(r) => r.has_data(),
            Rollup::Histogram(r) => r.has_data(),
        }
    }

    /// Merge rollups that must all be the same variant
    pub fn merge_all(points: &Points<Rollup>) -> Result<Rollup, RollupError> {
        let rollup_type = points
            .values()
            .next()
            .map(Rollup::rollup_type)
            .ok_or(RollupError::EmptyInput)?;
        rollup_type.merge(points)
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
    fn test_type_bytes_round_trip() {
        for t in RollupType::ALL {
            assert_eq!(RollupType::from_type_byte(t.type_byte()), Ok(t));
            assert_eq!(t.to_string().parse::<RollupType>(), Ok(t));
        }
        assert!(matches!(
            RollupType::from_type_byte(b'x'),
            Err(CodecError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_compute_from_full() {
        let rollup = RollupType::Basic
            .compute(Granularity::Full, &RollupInput::Raw(raw(&[1, 2, 3])))
            .unwrap();
        assert_eq!(rollup.as_basic().map(|b| b.count()), Some(3));
    }

    #[test]
    fn test_compute_from_finer_rollups() {
        let a = Rollup::from(BasicRollup::from_raw(&raw(&[1, 2])));
        let b = Rollup::from(BasicRollup::from_raw(&raw(&[3])));
        let input = RollupInput::Rollups(vec![(0, a), (300_000, b)].into_iter().collect());
        let rollup = RollupType::Basic.compute(Granularity::Min5, &input).unwrap();
        assert_eq!(rollup.as_basic().map(|b| b.count()), Some(3));
    }

    #[test]
    fn test_enum_rejects_raw_numbers() {
        assert!(!RollupType::Enum.input_is_raw(Granularity::Full));
        let err = RollupType::Enum
            .compute(Granularity::Full, &RollupInput::Raw(raw(&[1])))
            .unwrap_err();
        assert!(matches!(err, RollupError::UnsupportedInput { .. }));
    }

    #[test]
    fn test_merge_all_rejects_mixed_variants() {
        let points: Points<Rollup> = vec![
            (0, Rollup::from(BasicRollup::from_raw(&raw(&[1])))),
            (1, Rollup::from(SetRollup::from_raw(&raw(&[1])))),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            Rollup::merge_all(&points),
            Err(RollupError::MixedVariants { .. })
        ));
        assert_eq!(Rollup::merge_all(&Points::new()), Err(RollupError::EmptyInput));
    }

    #[test]
    fn test_empty_input_yields_empty_rollup() {
        let rollup = RollupType::Counter
            .compute(Granularity::Min20, &RollupInput::Rollups(Points::new()))
            .unwrap();
        assert!(!rollup.has_data());
    }
}
