//! Core trait definitions for the storage collaborator

use crate::error::StorageError;
use crate::granularity::Granularity;
use crate::state::{DelayedLocator, SlotState};
use crate::types::{Locator, Range, Shard, Slot};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// =============================================================================
// MetricStore Trait
// =============================================================================

/// Persistent store for encoded rollups, slot state and delayed locators
///
/// Payloads are opaque bytes produced by [`crate::codec`]. Implementations
/// keep one cell per `(locator, granularity, timestamp)`; a second write to
/// the same cell replaces the first.
#[async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Unique identifier for this store implementation
    fn store_id(&self) -> &str;

    /// Write a batch of cells
    async fn put(&self, batch: Vec<WriteRequest>) -> Result<(), StorageError>;

    /// Read every cell of `locator` at `granularity` inside `range`, in timestamp order
    async fn get_range(
        &self,
        locator: &Locator,
        granularity: Granularity,
        range: Range,
    ) -> Result<Vec<Column>, StorageError>;

    /// Persist slot state rows for a shard
    ///
    /// The store stamps each row's `last_updated` with its own write time.
    async fn put_slot_state(&self, shard: Shard, states: Vec<SlotState>)
        -> Result<(), StorageError>;

    /// All persisted slot state rows of a shard
    async fn get_slot_state(&self, shard: Shard) -> Result<Vec<SlotState>, StorageError>;

    /// Record a delayed locator
    async fn insert_delayed_locator(&self, delayed: DelayedLocator) -> Result<(), StorageError>;

    /// Locators recorded as delayed for one slot
    async fn get_delayed_locators(
        &self,
        granularity: Granularity,
        slot: Slot,
        shard: Shard,
    ) -> Result<Vec<Locator>, StorageError>;

    /// Every locator that has data in a shard
    async fn locators_for_shard(&self, shard: Shard) -> Result<Vec<Locator>, StorageError>;

    /// Get store statistics
    fn stats(&self) -> StoreStats;
}

/// One cell to write
#[derive(Clone, Debug, PartialEq)]
pub struct WriteRequest {
    /// Metric the cell belongs to
    pub locator: Locator,
    /// Granularity table
    pub granularity: Granularity,
    /// Cell timestamp (collection time for FULL, range start for rollups)
    pub timestamp: i64,
    /// Encoded payload
    pub bytes: Bytes,
    /// Time to live in seconds
    pub ttl_seconds: u32,
}

impl WriteRequest {
    /// Create a write request
    pub fn new(
        locator: Locator,
        granularity: Granularity,
        timestamp: i64,
        bytes: Bytes,
        ttl_seconds: u32,
    ) -> Self {
        Self {
            locator,
            granularity,
            timestamp,
            bytes,
            ttl_seconds,
        }
    }
}

/// One stored cell
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// Cell timestamp
    pub timestamp: i64,
    /// Encoded payload
    pub bytes: Bytes,
}

/// Store statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Cells written
    pub cells_written: u64,
    /// Cells returned by range reads
    pub cells_read: u64,
    /// Payload bytes written
    pub bytes_written: u64,
    /// Slot state rows written
    pub slot_states_written: u64,
    /// Delayed locators recorded
    pub delayed_locators: u64,
    /// Failed operations
    pub errors: u64,
}
