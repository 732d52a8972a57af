//! Per-shard slot state
//!
//! One [`SlotStateManager`] exists for every `(shard, rollup granularity)`
//! pair. Each holds the [`UpdateStamp`] of every slot it has seen, behind its
//! own lock, so updates to different shards or granularities never contend.
//!
//! ```text
//!            ingest                      rollup finished
//!   ──────────────────▶ Active ─────────────────────────▶ Rolled
//!   (ts = max(ts, t))     ▲                                  │
//!                         └───────── new sample ─────────────┘
//! ```

use super::stamp::{SlotState, SlotStateKind, UpdateStamp};
use crate::clock::Clock;
use crate::error::ModelError;
use crate::granularity::Granularity;
use crate::metrics;
use crate::slot::SlotKey;
use crate::types::{check_shard, Shard, Slot, NUM_SHARDS};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Samples later than this after their slot's collection time are counted
/// as dangerously delayed in metrics
const MILLIS_IN_A_DAY: i64 = 86_400_000;

/// Why a slot was or was not handed out for rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eligibility {
    Eligible,
    Reroll,
    TooRecent,
    ShortDelay,
    LongDelay,
}

/// Slot stamps for one shard at one granularity
#[derive(Debug)]
pub struct SlotStateManager {
    shard: Shard,
    granularity: Granularity,
    stamps: RwLock<BTreeMap<Slot, UpdateStamp>>,
}

impl SlotStateManager {
    fn new(shard: Shard, granularity: Granularity) -> Self {
        Self {
            shard,
            granularity,
            stamps: RwLock::new(BTreeMap::new()),
        }
    }

    /// Shard this manager tracks
    pub fn shard(&self) -> Shard {
        self.shard
    }

    /// Granularity this manager tracks
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn create_or_update(&self, slot: Slot, millis: i64, now: i64) {
        let mut stamps = self.stamps.write();
        match stamps.get_mut(&slot) {
            Some(stamp) => {
                stamp.timestamp = stamp.timestamp.max(millis);
                stamp.last_ingest_ms = now;
                stamp.state = SlotStateKind::Active;
                stamp.dirty = true;
            }
            None => {
                let mut stamp = UpdateStamp::new(millis, SlotStateKind::Active, true);
                stamp.last_ingest_ms = now;
                stamps.insert(slot, stamp);
            }
        }
    }

    fn dirty_stamps_and_mark_clean(&self) -> BTreeMap<Slot, UpdateStamp> {
        let mut stamps = self.stamps.write();
        let mut dirty = BTreeMap::new();
        for (slot, stamp) in stamps.iter_mut().filter(|(_, s)| s.dirty) {
            dirty.insert(*slot, *stamp);
            stamp.dirty = false;
        }
        dirty
    }

    /// Merge a persisted row into memory
    ///
    /// For Active rows `last_updated` is the last ingest time; for Rolled rows
    /// it is the last rollup time.
    fn update_on_read(&self, state: &SlotState) {
        let mut stamps = self.stamps.write();
        let Some(stamp) = stamps.get_mut(&state.slot) else {
            let mut stamp = UpdateStamp::new(state.timestamp, state.state, false);
            match state.state {
                SlotStateKind::Active => stamp.last_ingest_ms = state.last_updated,
                SlotStateKind::Rolled => stamp.last_rollup_ms = state.last_updated,
            }
            stamps.insert(state.slot, stamp);
            return;
        };

        match state.state {
            SlotStateKind::Active if stamp.timestamp != state.timestamp => {
                if stamp.is_active() && (stamp.timestamp > state.timestamp || stamp.dirty) {
                    // re-persist the higher timestamp
                    stamp.dirty = true;
                } else {
                    *stamp = UpdateStamp {
                        timestamp: state.timestamp,
                        state: SlotStateKind::Active,
                        dirty: false,
                        last_ingest_ms: state.last_updated,
                        last_rollup_ms: stamp.last_rollup_ms,
                    };
                }
            }
            SlotStateKind::Active => {
                // same timestamp: a sample arrived after the last rollup
                if !stamp.is_active() && state.last_updated > stamp.last_rollup_ms {
                    stamp.state = SlotStateKind::Active;
                    stamp.last_ingest_ms = stamp.last_ingest_ms.max(state.last_updated);
                }
            }
            SlotStateKind::Rolled => {
                if stamp.timestamp == state.timestamp && state.last_updated >= stamp.last_ingest_ms {
                    stamp.state = SlotStateKind::Rolled;
                }
                stamp.last_rollup_ms = stamp.last_rollup_ms.max(state.last_updated);
            }
        }
    }

    fn eligibility(
        &self,
        stamp: &UpdateStamp,
        now: i64,
        max_age_ms: i64,
        short_delay_ms: i64,
        long_wait_ms: i64,
        reroll_time_span_ms: i64,
    ) -> Eligibility {
        let elapsed = now - stamp.timestamp;
        if stamp.state == SlotStateKind::Rolled || elapsed <= max_age_ms {
            return Eligibility::TooRecent;
        }
        if !is_reroll(stamp, now, reroll_time_span_ms) {
            return Eligibility::Eligible;
        }
        if elapsed <= short_delay_ms {
            return Eligibility::ShortDelay;
        }
        if stamp.last_ingest_ms > 0 {
            let ingest_delay = stamp.last_ingest_ms - stamp.timestamp;
            let since_ingest = now - stamp.last_ingest_ms;
            if ingest_delay > short_delay_ms && since_ingest <= long_wait_ms {
                return Eligibility::LongDelay;
            }
        }
        Eligibility::Reroll
    }

    fn eligible_slots(
        &self,
        now: i64,
        max_age_ms: i64,
        short_delay_ms: i64,
        long_wait_ms: i64,
        reroll_time_span_ms: i64,
    ) -> Vec<Slot> {
        let stamps = self.stamps.read();
        let mut eligible = Vec::new();
        for (slot, stamp) in stamps.iter() {
            let verdict = self.eligibility(
                stamp,
                now,
                max_age_ms,
                short_delay_ms,
                long_wait_ms,
                reroll_time_span_ms,
            );
            match verdict {
                Eligibility::TooRecent => continue,
                Eligibility::ShortDelay => {
                    tracing::debug!(
                        shard = self.shard,
                        slot,
                        granularity = %self.granularity,
                        timestamp = stamp.timestamp,
                        "Short delay: deferring re-roll"
                    );
                    metrics::record_reroll(self.granularity.short_name(), "short_delay_wait");
                    continue;
                }
                Eligibility::LongDelay => {
                    tracing::debug!(
                        shard = self.shard,
                        slot,
                        granularity = %self.granularity,
                        last_ingest = stamp.last_ingest_ms,
                        "Long delay: deferring re-roll"
                    );
                    metrics::record_reroll(self.granularity.short_name(), "long_delay_wait");
                    continue;
                }
                Eligibility::Reroll => {
                    metrics::record_reroll(self.granularity.short_name(), "reroll");
                    if now - stamp.timestamp >= MILLIS_IN_A_DAY {
                        metrics::record_reroll(self.granularity.short_name(), "over_one_day");
                    }
                }
                Eligibility::Eligible => {}
            }
            eligible.push(*slot);
        }
        eligible
    }

    fn snapshot(&self) -> BTreeMap<Slot, UpdateStamp> {
        self.stamps.read().clone()
    }

    fn get(&self, slot: Slot) -> Option<UpdateStamp> {
        self.stamps.read().get(&slot).copied()
    }

    fn with_stamp<R>(&self, slot: Slot, f: impl FnOnce(&mut UpdateStamp) -> R) -> Option<R> {
        self.stamps.write().get_mut(&slot).map(f)
    }

    fn mark_active_dirty(&self, slot: Slot, now: i64) {
        let mut stamps = self.stamps.write();
        match stamps.get_mut(&slot) {
            Some(stamp) => {
                stamp.state = SlotStateKind::Active;
                stamp.dirty = true;
                stamp.timestamp = stamp.timestamp.max(now);
            }
            None => {
                stamps.insert(slot, UpdateStamp::new(now, SlotStateKind::Active, true));
            }
        }
    }
}

fn is_reroll(stamp: &UpdateStamp, now: i64, reroll_time_span_ms: i64) -> bool {
    stamp.last_rollup_ms > 0 && now - stamp.last_rollup_ms < reroll_time_span_ms
}

/// Slot state for every shard and rollup granularity
///
/// Holds state for all shards; only the managed subset is scheduled.
pub struct ShardStateManager {
    managed: RwLock<BTreeSet<Shard>>,
    managers: Vec<SlotStateManager>,
    clock: Arc<dyn Clock>,
    reroll_time_span_ms: i64,
}

impl ShardStateManager {
    /// Create a manager for the given managed shards
    ///
    /// A slot whose last rollup is younger than `reroll_time_span_ms` is
    /// treated as a re-roll caused by delayed data.
    pub fn new(
        managed: impl IntoIterator<Item = Shard>,
        clock: Arc<dyn Clock>,
        reroll_time_span_ms: i64,
    ) -> Result<Self, ModelError> {
        let managed = managed
            .into_iter()
            .map(check_shard)
            .collect::<Result<BTreeSet<_>, _>>()?;
        let managers = (0..NUM_SHARDS)
            .flat_map(|shard| {
                Granularity::rollup_granularities()
                    .iter()
                    .map(move |g| SlotStateManager::new(shard, *g))
            })
            .collect();
        Ok(Self {
            managed: RwLock::new(managed),
            managers,
            clock,
            reroll_time_span_ms,
        })
    }

    /// Managed shards in ascending order
    pub fn managed_shards(&self) -> Vec<Shard> {
        self.managed.read().iter().copied().collect()
    }

    /// Whether a shard is managed
    pub fn contains(&self, shard: Shard) -> bool {
        self.managed.read().contains(&shard)
    }

    /// Start managing a shard
    pub fn add(&self, shard: Shard) -> Result<(), ModelError> {
        self.managed.write().insert(check_shard(shard)?);
        Ok(())
    }

    /// Stop managing a shard
    pub fn remove(&self, shard: Shard) {
        self.managed.write().remove(&shard);
    }

    /// The slot manager for `(shard, granularity)`
    pub fn slot_manager(
        &self,
        shard: Shard,
        granularity: Granularity,
    ) -> Result<&SlotStateManager, ModelError> {
        check_shard(shard)?;
        let rollups = Granularity::rollup_granularities();
        let offset = rollups
            .iter()
            .position(|g| *g == granularity)
            .ok_or_else(|| {
                ModelError::UnknownGranularity(format!("{} has no slot state", granularity.name()))
            })?;
        Ok(&self.managers[shard as usize * rollups.len() + offset])
    }

    /// Record a sample collected at `millis` for every rollup granularity
    pub fn update(&self, millis: i64, shard: Shard) -> Result<(), ModelError> {
        let now = self.clock.now_millis();
        for g in Granularity::rollup_granularities() {
            let slot = g.slot(millis);
            self.slot_manager(shard, *g)?.create_or_update(slot, millis, now);
            metrics::record_slot_update(g.short_name());
            tracing::trace!(shard, slot, granularity = %g, millis, "Slot updated");
        }
        Ok(())
    }

    /// Dirty stamps for one granularity, marking them clean
    pub fn dirty_slots_to_persist(
        &self,
        shard: Shard,
        granularity: Granularity,
    ) -> Result<BTreeMap<Slot, UpdateStamp>, ModelError> {
        Ok(self.slot_manager(shard, granularity)?.dirty_stamps_and_mark_clean())
    }

    /// Dirty stamps across all rollup granularities as rows ready to persist
    pub fn dirty_slot_states(&self, shard: Shard) -> Result<Vec<SlotState>, ModelError> {
        let mut rows = Vec::new();
        for g in Granularity::rollup_granularities() {
            for (slot, stamp) in self.dirty_slots_to_persist(shard, *g)? {
                rows.push(SlotState::from_stamp(*g, slot, &stamp));
            }
        }
        if !rows.is_empty() {
            tracing::debug!(shard, dirty = rows.len(), "Found dirty slots");
        }
        Ok(rows)
    }

    /// Merge a persisted slot state into memory
    ///
    /// - an unknown slot is taken as is, clean
    /// - an Active row with a different timestamp replaces memory unless memory
    ///   is Active with a higher timestamp or unpersisted changes; then memory
    ///   is marked dirty so it is written back
    /// - a Rolled row with the same timestamp wins unless memory saw an ingest
    ///   after that rollup
    /// - a Rolled row always advances the last rollup time
    pub fn update_slot_on_read(&self, shard: Shard, state: &SlotState) -> Result<(), ModelError> {
        self.slot_manager(shard, state.granularity)?
            .update_on_read(state);
        Ok(())
    }

    /// Mark every slot coarser than `key` that contains it as Active and dirty
    pub fn set_all_coarser_slots_dirty(&self, key: &SlotKey, now: i64) -> Result<(), ModelError> {
        let mut granularity = key.granularity();
        while let Some(coarser) = granularity.coarser() {
            let coarser_key = key.extrapolate(coarser)?;
            self.slot_manager(key.shard(), coarser)?
                .mark_active_dirty(coarser_key.slot(), now);
            granularity = coarser;
        }
        Ok(())
    }

    /// Slots of `(shard, granularity)` ready to be rolled up at `now`
    pub fn slots_eligible_for_rollup(
        &self,
        shard: Shard,
        granularity: Granularity,
        now: i64,
        max_age_ms: i64,
        short_delay_ms: i64,
        long_wait_ms: i64,
    ) -> Result<Vec<Slot>, ModelError> {
        Ok(self.slot_manager(shard, granularity)?.eligible_slots(
            now,
            max_age_ms,
            short_delay_ms,
            long_wait_ms,
            self.reroll_time_span_ms,
        ))
    }

    /// Whether rolling up `key` now would be a re-roll
    pub fn is_reroll(&self, key: &SlotKey, now: i64) -> bool {
        self.get_update_stamp(key)
            .map(|s| is_reroll(&s, now, self.reroll_time_span_ms))
            .unwrap_or(false)
    }

    /// Current stamp of one slot
    pub fn get_update_stamp(&self, key: &SlotKey) -> Option<UpdateStamp> {
        self.slot_manager(key.shard(), key.granularity())
            .ok()
            .and_then(|m| m.get(key.slot()))
    }

    /// Snapshot of all stamps for `(shard, granularity)`
    pub fn slot_stamps(
        &self,
        shard: Shard,
        granularity: Granularity,
    ) -> Result<BTreeMap<Slot, UpdateStamp>, ModelError> {
        Ok(self.slot_manager(shard, granularity)?.snapshot())
    }

    /// Apply `f` to the stamp of `key` if it exists
    pub(crate) fn with_stamp<R>(
        &self,
        key: &SlotKey,
        f: impl FnOnce(&mut UpdateStamp) -> R,
    ) -> Option<R> {
        self.slot_manager(key.shard(), key.granularity())
            .ok()
            .and_then(|m| m.with_stamp(key.slot(), f))
    }

    /// Clock used for ingest and rollup times
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for ShardStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardStateManager")
            .field("managed", &*self.managed.read())
            .field("reroll_time_span_ms", &self.reroll_time_span_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const REROLL_SPAN: i64 = 3 * MILLIS_IN_A_DAY;

    fn manager(now: i64) -> (ShardStateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let mgr = ShardStateManager::new([0, 1], clock.clone(), REROLL_SPAN).unwrap();
        (mgr, clock)
    }

    fn key(g: Granularity, millis: i64) -> SlotKey {
        SlotKey::for_millis(g, millis, 0).unwrap()
    }

    #[test]
    fn test_update_marks_every_rollup_granularity() {
        let (mgr, _) = manager(1_000_000);
        mgr.update(600_000, 0).unwrap();
        for g in Granularity::rollup_granularities() {
            let stamp = mgr.get_update_stamp(&key(*g, 600_000)).unwrap();
            assert_eq!(stamp.timestamp, 600_000);
            assert!(stamp.dirty);
            assert!(stamp.is_active());
            assert_eq!(stamp.last_ingest_ms, 1_000_000);
        }
    }

    #[test]
    fn test_update_timestamp_is_monotonic() {
        let (mgr, _) = manager(0);
        mgr.update(1_000, 0).unwrap();
        mgr.update(500, 0).unwrap();
        let stamp = mgr.get_update_stamp(&key(Granularity::Min5, 0)).unwrap();
        assert_eq!(stamp.timestamp, 1_000);
    }

    #[test]
    fn test_dirty_slots_marked_clean() {
        let (mgr, _) = manager(0);
        mgr.update(1_000, 1).unwrap();
        let dirty = mgr.dirty_slots_to_persist(1, Granularity::Min5).unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(mgr.dirty_slots_to_persist(1, Granularity::Min5).unwrap().is_empty());
        // other granularities still dirty
        assert_eq!(mgr.dirty_slot_states(1).unwrap().len(), 4);
    }

    #[test]
    fn test_full_resolution_is_not_tracked() {
        let (mgr, _) = manager(0);
        assert!(mgr.slot_manager(0, Granularity::Full).is_err());
        assert!(mgr.slot_manager(NUM_SHARDS, Granularity::Min5).is_err());
    }

    #[test]
    fn test_read_unknown_slot_is_clean() {
        let (mgr, _) = manager(0);
        let row = SlotState {
            granularity: Granularity::Min5,
            slot: 3,
            state: SlotStateKind::Rolled,
            timestamp: 900_000,
            last_updated: 1_000,
        };
        mgr.update_slot_on_read(0, &row).unwrap();
        let stamp = mgr.get_update_stamp(&SlotKey::new(Granularity::Min5, 3, 0).unwrap()).unwrap();
        assert!(!stamp.dirty);
        assert_eq!(stamp.state, SlotStateKind::Rolled);
        assert_eq!(stamp.last_rollup_ms, 1_000);
    }

    #[test]
    fn test_read_older_active_keeps_newer_memory() {
        let (mgr, _) = manager(0);
        mgr.update(2_000, 0).unwrap();
        mgr.dirty_slot_states(0).unwrap();
        let row = SlotState {
            granularity: Granularity::Min5,
            slot: 0,
            state: SlotStateKind::Active,
            timestamp: 1_000,
            last_updated: 5,
        };
        mgr.update_slot_on_read(0, &row).unwrap();
        let stamp = mgr.get_update_stamp(&key(Granularity::Min5, 0)).unwrap();
        assert_eq!(stamp.timestamp, 2_000);
        assert!(stamp.dirty);
    }

    #[test]
    fn test_read_rolled_with_same_timestamp_wins() {
        let (mgr, _) = manager(10);
        mgr.update(2_000, 0).unwrap();
        let row = SlotState {
            granularity: Granularity::Min5,
            slot: 0,
            state: SlotStateKind::Rolled,
            timestamp: 2_000,
            last_updated: 50,
        };
        mgr.update_slot_on_read(0, &row).unwrap();
        let stamp = mgr.get_update_stamp(&key(Granularity::Min5, 0)).unwrap();
        assert_eq!(stamp.state, SlotStateKind::Rolled);
        assert_eq!(stamp.last_rollup_ms, 50);
    }

    #[test]
    fn test_read_rolled_before_last_ingest_keeps_active() {
        let (mgr, _) = manager(100);
        mgr.update(2_000, 0).unwrap();
        let row = SlotState {
            granularity: Granularity::Min5,
            slot: 0,
            state: SlotStateKind::Rolled,
            timestamp: 2_000,
            last_updated: 50,
        };
        mgr.update_slot_on_read(0, &row).unwrap();
        let stamp = mgr.get_update_stamp(&key(Granularity::Min5, 0)).unwrap();
        assert!(stamp.is_active());
        assert_eq!(stamp.last_rollup_ms, 50);
    }

    #[test]
    fn test_coarser_slots_dirty() {
        let (mgr, _) = manager(0);
        let k = key(Granularity::Min5, 0);
        mgr.set_all_coarser_slots_dirty(&k, 7_000).unwrap();
        assert!(mgr.get_update_stamp(&k).is_none());
        for g in [Granularity::Min20, Granularity::Min60, Granularity::Min240, Granularity::Min1440] {
            let stamp = mgr.get_update_stamp(&key(g, 0)).unwrap();
            assert_eq!(stamp.timestamp, 7_000);
            assert!(stamp.dirty && stamp.is_active());
        }
    }

    #[test]
    fn test_eligibility_first_rollup() {
        let (mgr, _) = manager(0);
        mgr.update(0, 0).unwrap();
        let eligible = |now| {
            mgr.slots_eligible_for_rollup(0, Granularity::Min5, now, 300_000, 600_000, 300_000)
                .unwrap()
        };
        assert!(eligible(300_000).is_empty());
        assert_eq!(eligible(300_001), vec![0]);
    }

    #[test]
    fn test_eligibility_short_delay_reroll() {
        let (mgr, _) = manager(0);
        mgr.update(0, 0).unwrap();
        mgr.with_stamp(&key(Granularity::Min5, 0), |s| s.last_rollup_ms = 1);
        let eligible = |now| {
            mgr.slots_eligible_for_rollup(0, Granularity::Min5, now, 300_000, 600_000, 300_000)
                .unwrap()
        };
        assert!(mgr.is_reroll(&key(Granularity::Min5, 0), 400_000));
        assert!(eligible(400_000).is_empty());
        assert_eq!(eligible(600_001), vec![0]);
    }

    #[test]
    fn test_eligibility_long_delay_reroll() {
        let (mgr, clock) = manager(0);
        // delayed sample ingested 20 minutes after its collection time
        clock.set(1_200_000);
        mgr.update(0, 0).unwrap();
        mgr.with_stamp(&key(Granularity::Min5, 0), |s| s.last_rollup_ms = 1);
        let eligible = |now| {
            mgr.slots_eligible_for_rollup(0, Granularity::Min5, now, 300_000, 600_000, 300_000)
                .unwrap()
        };
        assert!(eligible(1_400_000).is_empty());
        assert_eq!(eligible(1_500_001), vec![0]);
    }
}
