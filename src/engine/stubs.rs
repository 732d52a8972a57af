//! In-memory implementation of [`MetricStore`]
//!
//! Intended for:
//! - **Unit and integration testing** without an external database
//! - **Development and prototyping** of rollup pipelines
//! - **Benchmarking** the codec and rollup paths end to end
//!
//! # Warning
//!
//! [`InMemoryMetricStore`] loses all data on drop and does not enforce TTLs.
//!
//! # Example
//!
//! ```rust
//! use kuba_rollup::engine::{InMemoryMetricStore, MetricStore, WriteRequest};
//! use kuba_rollup::granularity::Granularity;
//! use kuba_rollup::types::{Locator, Range};
//! use bytes::Bytes;
//!
//! # tokio_test_block_on(async {
//! let store = InMemoryMetricStore::new();
//! let locator = Locator::new("t1", "cpu");
//! store
//!     .put(vec![WriteRequest::new(
//!         locator.clone(),
//!         Granularity::Full,
//!         1_000,
//!         Bytes::from_static(&[0, b'l', 2]),
//!         86_400,
//!     )])
//!     .await
//!     .unwrap();
//! let cells = store
//!     .get_range(&locator, Granularity::Full, Range::new(0, 2_000).unwrap())
//!     .await
//!     .unwrap();
//! assert_eq!(cells.len(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::engine::traits::{Column, MetricStore, StoreStats, WriteRequest};
use crate::error::StorageError;
use crate::granularity::Granularity;
use crate::state::{DelayedLocator, SlotState, SlotStateKind};
use crate::types::{shard_for, Locator, Range, Shard, Slot};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Persisted slot state rows are keyed by state as well, so an Active and a
/// Rolled row for the same slot coexist
type SlotStateKey = (Granularity, Slot, SlotStateKind);

/// Atomic statistics for the in-memory store
#[derive(Debug, Default)]
struct StoreStatsAtomic {
    cells_written: AtomicU64,
    cells_read: AtomicU64,
    bytes_written: AtomicU64,
    slot_states_written: AtomicU64,
    delayed_locators: AtomicU64,
    errors: AtomicU64,
}

/// Metric store held entirely in memory
pub struct InMemoryMetricStore {
    /// Cells: (locator, granularity) -> timestamp -> payload
    cells: DashMap<(Locator, Granularity), BTreeMap<i64, Bytes>>,
    /// Locators seen per shard
    shard_locators: RwLock<HashMap<Shard, BTreeSet<Locator>>>,
    /// Slot state rows per shard
    slot_states: RwLock<HashMap<Shard, HashMap<SlotStateKey, SlotState>>>,
    /// Delayed locators per (granularity, slot, shard)
    delayed: RwLock<HashMap<(Granularity, Slot, Shard), BTreeSet<Locator>>>,
    /// Locators whose reads fail
    failing_reads: RwLock<HashSet<Locator>>,
    /// All writes fail while set
    unavailable: AtomicBool,
    clock: Arc<dyn Clock>,
    stats: StoreStatsAtomic,
}

impl InMemoryMetricStore {
    /// Create an empty store using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping slot state with `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cells: DashMap::new(),
            shard_locators: RwLock::new(HashMap::new()),
            slot_states: RwLock::new(HashMap::new()),
            delayed: RwLock::new(HashMap::new()),
            failing_reads: RwLock::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
            clock,
            stats: StoreStatsAtomic::default(),
        }
    }

    /// Make every read of `locator` fail until [`Self::clear_failures`]
    pub fn fail_reads_for(&self, locator: &Locator) {
        self.failing_reads.write().insert(locator.clone());
    }

    /// Make every write fail while `unavailable` is set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.failing_reads.write().clear();
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Payload of one cell
    pub fn get_cell(&self, locator: &Locator, granularity: Granularity, timestamp: i64) -> Option<Bytes> {
        self.cells
            .get(&(locator.clone(), granularity))
            .and_then(|cells| cells.get(&timestamp).cloned())
    }

    /// Number of cells stored at `granularity` across all locators
    pub fn cell_count(&self, granularity: Granularity) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.key().1 == granularity)
            .map(|entry| entry.value().len())
            .sum()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Unavailable("store marked unavailable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryMetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetricStore")
            .field("series", &self.cells.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    fn store_id(&self) -> &str {
        "in-memory-v1"
    }

    async fn put(&self, batch: Vec<WriteRequest>) -> Result<(), StorageError> {
        self.check_available()?;
        let mut shard_locators = self.shard_locators.write();
        for request in batch {
            self.stats.cells_written.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes_written
                .fetch_add(request.bytes.len() as u64, Ordering::Relaxed);
            shard_locators
                .entry(shard_for(&request.locator))
                .or_default()
                .insert(request.locator.clone());
            self.cells
                .entry((request.locator, request.granularity))
                .or_default()
                .insert(request.timestamp, request.bytes);
        }
        Ok(())
    }

    async fn get_range(
        &self,
        locator: &Locator,
        granularity: Granularity,
        range: Range,
    ) -> Result<Vec<Column>, StorageError> {
        if self.failing_reads.read().contains(locator) {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io(format!("injected read failure for {}", locator)));
        }
        let columns: Vec<Column> = self
            .cells
            .get(&(locator.clone(), granularity))
            .map(|cells| {
                cells
                    .range(range.start()..=range.stop())
                    .map(|(timestamp, bytes)| Column {
                        timestamp: *timestamp,
                        bytes: bytes.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.stats
            .cells_read
            .fetch_add(columns.len() as u64, Ordering::Relaxed);
        Ok(columns)
    }

    async fn put_slot_state(
        &self,
        shard: Shard,
        states: Vec<SlotState>,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        let now = self.clock.now_millis();
        let mut slot_states = self.slot_states.write();
        let rows = slot_states.entry(shard).or_default();
        for state in states {
            self.stats.slot_states_written.fetch_add(1, Ordering::Relaxed);
            let key = (state.granularity, state.slot, state.state);
            rows.insert(key, state.with_last_updated(now));
        }
        Ok(())
    }

    async fn get_slot_state(&self, shard: Shard) -> Result<Vec<SlotState>, StorageError> {
        let slot_states = self.slot_states.read();
        let mut rows: Vec<SlotState> = slot_states
            .get(&shard)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|s| (s.granularity, s.slot, s.last_updated));
        Ok(rows)
    }

    async fn insert_delayed_locator(&self, delayed: DelayedLocator) -> Result<(), StorageError> {
        self.check_available()?;
        let inserted = self
            .delayed
            .write()
            .entry((delayed.granularity, delayed.slot, delayed.shard))
            .or_default()
            .insert(delayed.locator);
        if inserted {
            self.stats.delayed_locators.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn get_delayed_locators(
        &self,
        granularity: Granularity,
        slot: Slot,
        shard: Shard,
    ) -> Result<Vec<Locator>, StorageError> {
        Ok(self
            .delayed
            .read()
            .get(&(granularity, slot, shard))
            .map(|locators| locators.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn locators_for_shard(&self, shard: Shard) -> Result<Vec<Locator>, StorageError> {
        Ok(self
            .shard_locators
            .read()
            .get(&shard)
            .map(|locators| locators.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            cells_written: self.stats.cells_written.load(Ordering::Relaxed),
            cells_read: self.stats.cells_read.load(Ordering::Relaxed),
            bytes_written: self.stats.bytes_written.load(Ordering::Relaxed),
            slot_states_written: self.stats.slot_states_written.load(Ordering::Relaxed),
            delayed_locators: self.stats.delayed_locators.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn write(locator: &Locator, g: Granularity, ts: i64, byte: u8) -> WriteRequest {
        WriteRequest::new(locator.clone(), g, ts, Bytes::from(vec![byte]), 60)
    }

    #[tokio::test]
    async fn test_put_and_range_read() {
        let store = InMemoryMetricStore::new();
        let locator = Locator::new("t1", "cpu");
        store
            .put(vec![
                write(&locator, Granularity::Full, 100, 1),
                write(&locator, Granularity::Full, 200, 2),
                write(&locator, Granularity::Full, 300, 3),
                write(&locator, Granularity::Min5, 0, 9),
            ])
            .await
            .unwrap();

        let cells = store
            .get_range(&locator, Granularity::Full, Range::new(100, 200).unwrap())
            .await
            .unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].timestamp, 100);
        assert_eq!(cells[1].bytes, Bytes::from_static(&[2]));
        assert_eq!(store.cell_count(Granularity::Full), 3);
        assert_eq!(store.stats().cells_written, 4);
    }

    #[tokio::test]
    async fn test_overwrite_same_cell() {
        let store = InMemoryMetricStore::new();
        let locator = Locator::new("t1", "cpu");
        store.put(vec![write(&locator, Granularity::Min5, 0, 1)]).await.unwrap();
        store.put(vec![write(&locator, Granularity::Min5, 0, 2)]).await.unwrap();
        assert_eq!(
            store.get_cell(&locator, Granularity::Min5, 0),
            Some(Bytes::from_static(&[2]))
        );
    }

    #[tokio::test]
    async fn test_slot_state_stamped_with_clock() {
        let clock = Arc::new(ManualClock::new(42));
        let store = InMemoryMetricStore::with_clock(clock.clone());
        let active = SlotState {
            granularity: Granularity::Min5,
            slot: 1,
            state: SlotStateKind::Active,
            timestamp: 300_000,
            last_updated: 0,
        };
        store.put_slot_state(3, vec![active.clone()]).await.unwrap();
        clock.set(50);
        let rolled = SlotState {
            state: SlotStateKind::Rolled,
            ..active
        };
        store.put_slot_state(3, vec![rolled]).await.unwrap();

        let rows = store.get_slot_state(3).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].state, SlotStateKind::Active);
        assert_eq!(rows[0].last_updated, 42);
        assert_eq!(rows[1].state, SlotStateKind::Rolled);
        assert_eq!(rows[1].last_updated, 50);
        assert!(store.get_slot_state(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delayed_locators_deduplicated() {
        let store = InMemoryMetricStore::new();
        let locator = Locator::new("t1", "cpu");
        let delayed = DelayedLocator {
            granularity: Granularity::Min20,
            slot: 5,
            shard: shard_for(&locator),
            locator: locator.clone(),
        };
        store.insert_delayed_locator(delayed.clone()).await.unwrap();
        store.insert_delayed_locator(delayed.clone()).await.unwrap();
        let found = store
            .get_delayed_locators(Granularity::Min20, 5, delayed.shard)
            .await
            .unwrap();
        assert_eq!(found, vec![locator]);
        assert_eq!(store.stats().delayed_locators, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryMetricStore::new();
        let locator = Locator::new("t1", "cpu");
        store.fail_reads_for(&locator);
        let range = Range::new(0, 10).unwrap();
        assert!(store.get_range(&locator, Granularity::Full, range).await.is_err());

        store.set_unavailable(true);
        assert!(matches!(
            store.put(vec![write(&locator, Granularity::Full, 1, 1)]).await,
            Err(StorageError::Unavailable(_))
        ));

        store.clear_failures();
        assert!(store.get_range(&locator, Granularity::Full, range).await.is_ok());
        assert_eq!(store.stats().errors, 2);
    }

    #[tokio::test]
    async fn test_locators_for_shard() {
        let store = InMemoryMetricStore::new();
        let locator = Locator::new("t1", "cpu");
        store.put(vec![write(&locator, Granularity::Full, 1, 1)]).await.unwrap();
        let shard = shard_for(&locator);
        assert_eq!(store.locators_for_shard(shard).await.unwrap(), vec![locator]);
    }
}
