//! Delayed-sample detection
//!
//! A sample is delayed when it reaches the ingest path more than `max_age_ms`
//! after its collection time. Its slot may already have been rolled, so the
//! locator is recorded for a targeted re-roll of just that slot.

use crate::clock::Clock;
use crate::error::ModelError;
use crate::granularity::Granularity;
use crate::metrics;
use crate::types::{shard_for, Locator, Shard, Slot};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Locator that received a sample for an already aged slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayedLocator {
    /// Tracking granularity
    pub granularity: Granularity,
    /// Slot of the sample at that granularity
    pub slot: Slot,
    /// Shard of the locator
    pub shard: Shard,
    /// The delayed metric
    pub locator: Locator,
}

/// Bounded set of recently seen `(slot, locator)` pairs
///
/// Entries expire once unused for `ttl_ms`; the least recently used entry is
/// evicted when the cache is full.
pub struct LocatorCache {
    entries: Mutex<LruCache<(Slot, Locator), i64>>,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl LocatorCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize, ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_ms,
            clock,
        }
    }

    /// Insert the pair unless a live entry exists; returns true when inserted
    ///
    /// A hit refreshes the entry's access time.
    pub fn insert_if_absent(&self, slot: Slot, locator: &Locator) -> bool {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        let key = (slot, locator.clone());
        if let Some(last_access) = entries.get_mut(&key) {
            if now - *last_access < self.ttl_ms {
                *last_access = now;
                return false;
            }
        }
        entries.put(key, now);
        true
    }

    /// Whether a live entry exists, without refreshing it
    pub fn contains(&self, slot: Slot, locator: &Locator) -> bool {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .peek(&(slot, locator.clone()))
            .map(|last_access| now - *last_access < self.ttl_ms)
            .unwrap_or(false)
    }

    /// Drop the pair so the next sample for it is recorded again
    pub fn remove(&self, slot: Slot, locator: &Locator) {
        self.entries.lock().pop(&(slot, locator.clone()));
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LocatorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatorCache")
            .field("len", &self.len())
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

/// Decides which samples are delayed and deduplicates the resulting records
#[derive(Debug)]
pub struct DelayedLocatorTracker {
    max_age_ms: i64,
    granularity: Granularity,
    cache: LocatorCache,
}

impl DelayedLocatorTracker {
    /// Create a tracker recording slots at `granularity`
    ///
    /// FULL has no rollup slots and is rejected.
    pub fn new(
        max_age_ms: i64,
        granularity: Granularity,
        cache: LocatorCache,
    ) -> Result<Self, ModelError> {
        if granularity == Granularity::Full {
            return Err(ModelError::UnknownGranularity(format!(
                "{} cannot track delayed locators",
                granularity.name()
            )));
        }
        Ok(Self {
            max_age_ms,
            granularity,
            cache,
        })
    }

    /// Tracking granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Maximum age before a sample counts as delayed
    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms
    }

    /// Whether a sample collected at `collection_time` is delayed at `now`
    #[inline]
    pub fn is_delayed(&self, now: i64, collection_time: i64) -> bool {
        now - collection_time > self.max_age_ms
    }

    /// Record for a delayed sample not already seen for its slot
    pub fn track(
        &self,
        locator: &Locator,
        collection_time: i64,
        now: i64,
    ) -> Option<DelayedLocator> {
        if !self.is_delayed(now, collection_time) {
            return None;
        }
        let slot = self.granularity.slot(collection_time);
        if !self.cache.insert_if_absent(slot, locator) {
            return None;
        }
        let shard = shard_for(locator);
        tracing::debug!(
            locator = %locator,
            shard,
            slot,
            delay_ms = now - collection_time,
            "Delayed sample"
        );
        metrics::record_delayed_locator(self.granularity.short_name());
        Some(DelayedLocator {
            granularity: self.granularity,
            slot,
            shard,
            locator: locator.clone(),
        })
    }

    /// Forget a record that could not be persisted
    pub fn forget(&self, delayed: &DelayedLocator) {
        self.cache.remove(delayed.slot, &delayed.locator);
    }
}
