//! Core data types used throughout the rollup store
//!
//! # Key Types
//!
//! - **`Locator`**: Identity of a metric (tenant + metric name)
//! - **`Number`**: A numeric value that remembers whether it is integral
//! - **`Sample`**: A raw ingested value (numeric, string or boolean)
//! - **`Range`**: Inclusive time window in milliseconds
//! - **`Points`**: Timestamp-ordered map used as rollup input
//!
//! # Example
//!
//! ```rust
//! use kuba_rollup::types::{shard_for, Locator, Number, Points, Range};
//!
//! let locator = Locator::new("acme", "web.requests");
//! assert_eq!(locator.db_key(), "acme.web.requests");
//! assert!(shard_for(&locator) < kuba_rollup::types::NUM_SHARDS);
//!
//! let range = Range::new(0, 299_999).unwrap();
//! assert!(range.contains(1500));
//!
//! let mut points = Points::new();
//! points.add(1000, Number::Long(10));
//! assert_eq!(points.len(), 1);
//! ```

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of scheduling shards locators are partitioned into
pub const NUM_SHARDS: u32 = 128;

/// Scheduling partition of locators, in `[0, NUM_SHARDS)`
pub type Shard = u32;

/// Index of a time bucket within a granularity's rotation
pub type Slot = u32;

const SHARD_HASH: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

// =============================================================================
// Locator
// =============================================================================

/// Immutable identity of a metric: `(tenant_id, metric_name)`
///
/// The canonical storage key is `tenant_id + "." + metric_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator {
    tenant_id: String,
    metric_name: String,
}

impl Locator {
    /// Separator between the tenant and metric name in the canonical key
    pub const SEPARATOR: char = '.';

    /// Create a locator from a tenant and a metric name
    pub fn new(tenant_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            metric_name: metric_name.into(),
        }
    }

    /// Build a locator whose metric name is the path components joined by `.`
    pub fn from_path_components<I, S>(tenant_id: impl Into<String>, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let metric_name = components
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self::new(tenant_id, metric_name)
    }

    /// Parse a canonical key, splitting at the first separator
    pub fn from_db_key(key: &str) -> Result<Self, ModelError> {
        match key.split_once(Self::SEPARATOR) {
            Some((tenant, metric)) if !tenant.is_empty() && !metric.is_empty() => {
                Ok(Self::new(tenant, metric))
            }
            _ => Err(ModelError::InvalidLocator(key.to_string())),
        }
    }

    /// Tenant that owns this metric
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Metric name within the tenant
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Canonical storage key
    pub fn db_key(&self) -> String {
        format!("{}{}{}", self.tenant_id, Self::SEPARATOR, self.metric_name)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.tenant_id, Self::SEPARATOR, self.metric_name)
    }
}

impl FromStr for Locator {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_key(s)
    }
}

/// Deterministic shard for a locator
///
/// CRC-32 of the canonical key modulo [`NUM_SHARDS`]. Stable across processes,
/// platforms and compiler versions.
pub fn shard_for(locator: &Locator) -> Shard {
    SHARD_HASH.checksum(locator.db_key().as_bytes()) % NUM_SHARDS
}

/// Validate a shard number
pub fn check_shard(shard: Shard) -> Result<Shard, ModelError> {
    if shard < NUM_SHARDS {
        Ok(shard)
    } else {
        Err(ModelError::InvalidShard { shard })
    }
}

// =============================================================================
// Number
// =============================================================================

/// A numeric value tagged as integral or floating point
///
/// Rollup statistics keep the tag so that aggregates over integral samples
/// stay exact integers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    /// Integral value
    Long(i64),
    /// Floating point value
    Double(f64),
}

impl Number {
    /// Value as `f64`
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Long(v) => v as f64,
            Number::Double(v) => v,
        }
    }

    /// Value as `i64`, truncating doubles toward zero
    pub fn to_i64(self) -> i64 {
        match self {
            Number::Long(v) => v,
            Number::Double(v) => v as i64,
        }
    }

    /// True for [`Number::Double`]
    pub fn is_floating_point(self) -> bool {
        matches!(self, Number::Double(_))
    }

    /// Total order: numeric comparison, then `Long` before `Double` on ties
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Number::Long(a), Number::Long(b)) => a.cmp(b),
            _ => self
                .to_f64()
                .total_cmp(&other.to_f64())
                .then_with(|| self.is_floating_point().cmp(&other.is_floating_point())),
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::Long(0)
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Long(v)
    }
}

impl From<i32> for Number {
    fn from(v: i32) -> Self {
        Number::Long(v as i64)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Double(v)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Long(v) => write!(f, "{}", v),
            Number::Double(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Sample
// =============================================================================

/// A raw ingested value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sample {
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Double precision float
    Double(f64),
    /// Single precision float, stored as a double
    Float(f32),
    /// String value (never rolled up)
    Str(String),
    /// Boolean value (never rolled up)
    Bool(bool),
}

impl Sample {
    /// Numeric view of the sample, `None` for strings and booleans
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Sample::Int(v) => Some(Number::Long(*v as i64)),
            Sample::Long(v) => Some(Number::Long(*v)),
            Sample::Double(v) => Some(Number::Double(*v)),
            Sample::Float(v) => Some(Number::Double(*v as f64)),
            Sample::Str(_) | Sample::Bool(_) => None,
        }
    }

    /// Short name of the value kind
    pub fn kind(&self) -> &'static str {
        match self {
            Sample::Int(_) => "int",
            Sample::Long(_) => "long",
            Sample::Double(_) => "double",
            Sample::Float(_) => "float",
            Sample::Str(_) => "string",
            Sample::Bool(_) => "bool",
        }
    }
}

impl From<Number> for Sample {
    fn from(n: Number) -> Self {
        match n {
            Number::Long(v) => Sample::Long(v),
            Number::Double(v) => Sample::Double(v),
        }
    }
}

// =============================================================================
// Range
// =============================================================================

/// Inclusive time window `[start, stop]` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    start: i64,
    stop: i64,
}

impl Range {
    /// Create a range, rejecting `start > stop`
    pub fn new(start: i64, stop: i64) -> Result<Self, ModelError> {
        if start > stop {
            return Err(ModelError::InvalidRange { start, stop });
        }
        Ok(Self { start, stop })
    }

    /// First millisecond covered
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Last millisecond covered
    pub fn stop(&self) -> i64 {
        self.stop
    }

    /// Check whether a timestamp falls inside the range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.stop
    }

    /// Milliseconds covered, both ends included
    pub fn duration_ms(&self) -> i64 {
        self.stop - self.start + 1
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.stop)
    }
}

// =============================================================================
// Points
// =============================================================================

/// Timestamp-ordered values used as rollup input
///
/// Adding a value at an existing timestamp replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Points<T> {
    points: BTreeMap<i64, T>,
}

impl<T> Points<T> {
    /// Create an empty set of points
    pub fn new() -> Self {
        Self {
            points: BTreeMap::new(),
        }
    }

    /// Insert a value at a timestamp
    pub fn add(&mut self, timestamp: i64, value: T) {
        self.points.insert(timestamp, value);
    }

    /// Value at a timestamp
    pub fn get(&self, timestamp: i64) -> Option<&T> {
        self.points.get(&timestamp)
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when there are no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate `(timestamp, value)` in timestamp order
    pub fn iter(&self) -> btree_map::Iter<'_, i64, T> {
        self.points.iter()
    }

    /// Iterate values in timestamp order
    pub fn values(&self) -> btree_map::Values<'_, i64, T> {
        self.points.values()
    }

    /// Earliest point
    pub fn first(&self) -> Option<(i64, &T)> {
        self.points.iter().next().map(|(ts, v)| (*ts, v))
    }

    /// Latest point
    pub fn last(&self) -> Option<(i64, &T)> {
        self.points.iter().next_back().map(|(ts, v)| (*ts, v))
    }

    /// Apply `f` to every value, keeping timestamps
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Points<U> {
        self.points.iter().map(|(ts, v)| (*ts, f(v))).collect()
    }
}

impl<T> Default for Points<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(i64, T)> for Points<T> {
    fn from_iter<I: IntoIterator<Item = (i64, T)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Points<T> {
    type Item = (i64, T);
    type IntoIter = btree_map::IntoIter<i64, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Points<T> {
    type Item = (&'a i64, &'a T);
    type IntoIter = btree_map::Iter<'a, i64, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
