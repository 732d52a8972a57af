//! Rollup scheduling over the slot state
//!
//! [`ScheduleContext`] owns the queue of slots waiting for a rollup and the
//! set of slots currently being rolled. Ingest goes through it as well, so a
//! sample that lands on a running slot is noticed when that rollup finishes.

use super::shard::ShardStateManager;
use super::stamp::SlotStateKind;
use crate::clock::Clock;
use crate::error::ModelError;
use crate::granularity::Granularity;
use crate::slot::SlotKey;
use crate::types::Shard;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A slot handed out by [`ScheduleContext::next_scheduled`]
#[derive(Debug, Clone, Copy)]
struct RunningSlot {
    /// Stamp timestamp when the rollup started
    timestamp: i64,
    /// A sample arrived while the rollup ran
    touched: bool,
}

#[derive(Debug, Default)]
struct Queues {
    scheduled: HashSet<SlotKey>,
    ordered: VecDeque<SlotKey>,
    running: HashMap<SlotKey, RunningSlot>,
}

impl Queues {
    fn is_busy(&self, key: &SlotKey) -> bool {
        self.scheduled.contains(key) || self.running.contains_key(key)
    }

    fn deschedule(&mut self, key: &SlotKey) -> bool {
        if self.scheduled.remove(key) {
            self.ordered.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// Scheduled and running rollups for the managed shards
pub struct ScheduleContext {
    manager: Arc<ShardStateManager>,
    clock: Arc<dyn Clock>,
    queues: Mutex<Queues>,
}

impl ScheduleContext {
    /// Create a context over `manager`, reading time from its clock
    pub fn new(manager: Arc<ShardStateManager>) -> Self {
        let clock = manager.clock().clone();
        Self {
            manager,
            clock,
            queues: Mutex::new(Queues::default()),
        }
    }

    /// Underlying slot state
    pub fn manager(&self) -> &Arc<ShardStateManager> {
        &self.manager
    }

    /// Current time from the context clock
    pub fn current_time_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Record a sample collected at `millis`
    ///
    /// A slot that was waiting in the queue is taken out again, since it just
    /// received data and is no longer old enough to roll.
    pub fn update(&self, millis: i64, shard: Shard) -> Result<(), ModelError> {
        if !self.manager.contains(shard) {
            return self.manager.update(millis, shard);
        }
        let mut queues = self.queues.lock();
        self.manager.update(millis, shard)?;
        for g in Granularity::rollup_granularities() {
            let key = SlotKey::for_millis(*g, millis, shard)?;
            if queues.deschedule(&key) {
                tracing::debug!(key = %key, "Descheduled");
            }
            if let Some(running) = queues.running.get_mut(&key) {
                running.touched = true;
            }
        }
        Ok(())
    }

    /// Queue every eligible slot of the managed shards
    ///
    /// Shards are visited in random order. A slot is skipped while it, or any
    /// finer slot it contains, is scheduled or running. Returns how many keys
    /// were added.
    pub fn schedule_eligible_slots(
        &self,
        max_age_ms: i64,
        short_delay_ms: i64,
        long_wait_ms: i64,
    ) -> Result<usize, ModelError> {
        let now = self.clock.now_millis();
        let mut shards = self.manager.managed_shards();
        shards.shuffle(&mut rand::thread_rng());

        let mut queues = self.queues.lock();
        let mut added = 0;
        for shard in shards {
            for g in Granularity::rollup_granularities() {
                let eligible = self.manager.slots_eligible_for_rollup(
                    shard,
                    *g,
                    now,
                    max_age_ms,
                    short_delay_ms,
                    long_wait_ms,
                )?;
                for slot in eligible {
                    let key = SlotKey::new(*g, slot, shard)?;
                    if queues.is_busy(&key)
                        || key.children_keys().iter().any(|child| queues.is_busy(child))
                    {
                        continue;
                    }
                    queues.scheduled.insert(key);
                    queues.ordered.push_back(key);
                    added += 1;
                }
            }
        }
        if added > 0 {
            tracing::debug!(added, scheduled = queues.scheduled.len(), "Scheduled slots");
        }
        Ok(added)
    }

    /// Take the next key off the queue and mark it running
    pub fn next_scheduled(&self) -> Option<SlotKey> {
        let mut queues = self.queues.lock();
        let key = queues.ordered.pop_front()?;
        queues.scheduled.remove(&key);
        let timestamp = self
            .manager
            .get_update_stamp(&key)
            .map(|s| s.timestamp)
            .unwrap_or_default();
        queues.running.insert(
            key,
            RunningSlot {
                timestamp,
                touched: false,
            },
        );
        Some(key)
    }

    /// Put a key back on the queue, at the front when `immediately` is set
    pub fn push_back_to_scheduled(&self, key: SlotKey, immediately: bool) {
        let mut queues = self.queues.lock();
        queues.running.remove(&key);
        self.manager.with_stamp(&key, |stamp| {
            stamp.state = SlotStateKind::Active;
        });
        if !queues.scheduled.insert(key) {
            return;
        }
        if immediately {
            queues.ordered.push_front(key);
        } else {
            queues.ordered.push_back(key);
        }
    }

    /// Finish a rollup of `key`
    ///
    /// Coarser slots become dirty and the last rollup time is set. The slot
    /// itself becomes Rolled only when nothing was ingested into it while the
    /// rollup ran. Returns whether it was marked Rolled.
    pub fn clear_from_running(&self, key: &SlotKey) -> Result<bool, ModelError> {
        let now = self.clock.now_millis();
        let mut queues = self.queues.lock();
        let running = queues.running.remove(key);
        self.manager.set_all_coarser_slots_dirty(key, now)?;
        let rolled = self
            .manager
            .with_stamp(key, |stamp| {
                stamp.last_rollup_ms = now;
                match running {
                    Some(r) if !r.touched && r.timestamp == stamp.timestamp => {
                        stamp.state = SlotStateKind::Rolled;
                        stamp.dirty = true;
                        true
                    }
                    _ => false,
                }
            })
            .unwrap_or(false);
        tracing::debug!(key = %key, rolled, "Cleared from running");
        Ok(rolled)
    }

    /// Whether any key is queued
    pub fn has_scheduled(&self) -> bool {
        !self.queues.lock().scheduled.is_empty()
    }

    /// Number of queued keys
    pub fn scheduled_count(&self) -> usize {
        self.queues.lock().scheduled.len()
    }

    /// Number of keys being rolled
    pub fn running_count(&self) -> usize {
        self.queues.lock().running.len()
    }
}

impl std::fmt::Debug for ScheduleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock();
        f.debug_struct("ScheduleContext")
            .field("scheduled", &queues.scheduled.len())
            .field("running", &queues.running.len())
            .finish()
    }
}
