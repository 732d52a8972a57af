//! Rollup orchestration
//!
//! [`RollupOrchestrator`] computes rollups for one locator over an interval,
//! or for every relevant locator of one slot. [`RollupService`] drives it
//! from the slot state on a timer.
//!
//! ```text
//!   get_slot_state ──▶ update_slot_on_read ──▶ schedule_eligible_slots
//!                                                     │
//!        put_slot_state ◀── clear_from_running ◀── rollup_slot / reroll_delayed
//! ```

use crate::clock::Clock;
use crate::codec::RollupCodec;
use crate::config::RollupConfig;
use crate::engine::{MetricStore, WriteRequest};
use crate::error::{Error, Result};
use crate::granularity::Granularity;
use crate::metrics;
use crate::rollup::{RollupInput, RollupType};
use crate::services::framework::{Service, ServiceError, ServiceStatus};
use crate::slot::SlotKey;
use crate::state::ScheduleContext;
use crate::types::{Locator, Number, Points, Range};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{interval, Instant};

/// Maps a locator to the rollup type its data is stored as
pub type RollupTypeResolver = Arc<dyn Fn(&Locator) -> RollupType + Send + Sync>;

/// Resolver that treats every locator as [`RollupType::Basic`]
pub fn basic_resolver() -> RollupTypeResolver {
    Arc::new(|_| RollupType::Basic)
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of rolling one range
#[derive(Debug)]
pub struct RangeOutcome {
    /// Range at the target granularity
    pub range: Range,
    /// Write issued for the range, `None` when the range had no input
    pub result: Result<Option<WriteRequest>>,
}

impl RangeOutcome {
    /// Whether the range failed
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

/// Result of rolling one slot across locators
#[derive(Debug)]
pub struct SlotRollupReport {
    /// Slot that was rolled
    pub key: SlotKey,
    /// Locators attempted
    pub locators: usize,
    /// Ranges written
    pub written: usize,
    /// Ranges with no input
    pub empty: usize,
    /// Failed ranges with their locator
    pub failures: Vec<(Locator, Range, Error)>,
}

impl SlotRollupReport {
    fn new(key: SlotKey) -> Self {
        Self {
            key,
            locators: 0,
            written: 0,
            empty: 0,
            failures: Vec::new(),
        }
    }

    fn absorb(&mut self, locator: &Locator, outcomes: Vec<RangeOutcome>) {
        self.locators += 1;
        for outcome in outcomes {
            match outcome.result {
                Ok(Some(_)) => self.written += 1,
                Ok(None) => self.empty += 1,
                Err(e) => self.failures.push((locator.clone(), outcome.range, e)),
            }
        }
    }

    /// True when every range succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Reads finer data, computes rollups and writes them back
pub struct RollupOrchestrator {
    store: Arc<dyn MetricStore>,
    codec: RollupCodec,
    config: RollupConfig,
    delayed_granularity: Granularity,
    permits: Semaphore,
    clock: Arc<dyn Clock>,
}

impl RollupOrchestrator {
    /// Create an orchestrator running at most `config.concurrency` ranges at once
    pub fn new(
        store: Arc<dyn MetricStore>,
        codec: RollupCodec,
        config: RollupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let permits = Semaphore::new(config.concurrency.max(1));
        Self {
            store,
            codec,
            config,
            delayed_granularity: Granularity::Min20,
            permits,
            clock,
        }
    }

    /// Granularity delayed locators are recorded at
    pub fn with_delayed_granularity(mut self, granularity: Granularity) -> Self {
        self.delayed_granularity = granularity;
        self
    }

    /// Store the orchestrator writes to
    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Roll `locator` up to `granularity` over `[from, to]`
    ///
    /// Every slot-aligned range of the interval gets its own outcome; one
    /// failing range does not stop the others. Successful ranges are written
    /// in a single batch. Fails only when `granularity` has nothing finer to
    /// read from or the interval is invalid.
    pub async fn rollup_interval(
        &self,
        locator: &Locator,
        rollup_type: RollupType,
        granularity: Granularity,
        from: i64,
        to: i64,
    ) -> Result<Vec<RangeOutcome>> {
        let source = granularity.try_finer()?;
        let ranges = granularity.ranges_for_interval(from, to)?;

        let mut outcomes = join_all(ranges.map(|range| async move {
            let result = self
                .rollup_range(locator, rollup_type, source, granularity, range)
                .await;
            RangeOutcome { range, result }
        }))
        .await;

        let batch: Vec<WriteRequest> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().and_then(|w| w.clone()))
            .collect();
        if batch.is_empty() {
            return Ok(outcomes);
        }
        if let Err(e) = self.store.put(batch).await {
            tracing::warn!(locator = %locator, granularity = %granularity, error = %e, "Rollup write failed");
            for outcome in outcomes.iter_mut() {
                if matches!(outcome.result, Ok(Some(_))) {
                    outcome.result = Err(e.clone().into());
                }
            }
        }
        Ok(outcomes)
    }

    async fn rollup_range(
        &self,
        locator: &Locator,
        rollup_type: RollupType,
        source: Granularity,
        granularity: Granularity,
        range: Range,
    ) -> Result<Option<WriteRequest>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::General(format!("rollup permits closed: {}", e)))?;
        let started = Instant::now();

        let result = self
            .compute_range(locator, rollup_type, source, granularity, range)
            .await;

        let status = match &result {
            Ok(Some(_)) => "success",
            Ok(None) => "empty",
            Err(e) => {
                tracing::warn!(
                    locator = %locator,
                    granularity = %granularity,
                    start = range.start(),
                    error = %e,
                    "Range rollup failed"
                );
                "error"
            }
        };
        metrics::record_rollup(
            granularity.short_name(),
            started.elapsed().as_secs_f64(),
            status,
        );
        result
    }

    async fn compute_range(
        &self,
        locator: &Locator,
        rollup_type: RollupType,
        source: Granularity,
        granularity: Granularity,
        range: Range,
    ) -> Result<Option<WriteRequest>> {
        let columns = self.store.get_range(locator, source, range).await?;
        if columns.is_empty() {
            return Ok(None);
        }

        let input = if rollup_type.input_is_raw(source) {
            let points: std::result::Result<Points<Number>, _> = columns
                .iter()
                .map(|c| self.codec.decode_raw(&c.bytes).map(|n| (c.timestamp, n)))
                .collect();
            RollupInput::Raw(points?)
        } else {
            let points: std::result::Result<Points<_>, _> = columns
                .iter()
                .map(|c| self.codec.decode(rollup_type, &c.bytes).map(|r| (c.timestamp, r)))
                .collect();
            RollupInput::Rollups(points?)
        };

        let rollup = rollup_type.compute(source, &input)?;
        let bytes = self.codec.encode(&rollup)?;
        tracing::trace!(
            locator = %locator,
            granularity = %granularity,
            start = range.start(),
            inputs = columns.len(),
            "Range rolled"
        );
        Ok(Some(WriteRequest::new(
            locator.clone(),
            granularity,
            range.start(),
            bytes,
            self.config.ttl_for(granularity),
        )))
    }

    /// Roll one slot for the given locators
    pub async fn rollup_slot(
        &self,
        key: SlotKey,
        locators: &[Locator],
        resolver: &RollupTypeResolver,
    ) -> Result<SlotRollupReport> {
        let range = key.range(self.clock.now_millis())?;
        let granularity = key.granularity();

        let results = join_all(locators.iter().map(|locator| async move {
            let outcomes = self
                .rollup_interval(
                    locator,
                    (resolver.as_ref())(locator),
                    granularity,
                    range.start(),
                    range.stop(),
                )
                .await;
            (locator, outcomes)
        }))
        .await;

        let mut report = SlotRollupReport::new(key);
        for (locator, outcomes) in results {
            report.absorb(locator, outcomes?);
        }
        tracing::debug!(
            key = %key,
            locators = report.locators,
            written = report.written,
            failed = report.failures.len(),
            "Slot rolled"
        );
        Ok(report)
    }

    /// Re-roll one slot for the locators recorded as delayed in it
    ///
    /// Falls back to every locator of the shard when none were recorded.
    pub async fn reroll_delayed(
        &self,
        key: SlotKey,
        resolver: &RollupTypeResolver,
    ) -> Result<SlotRollupReport> {
        let tracking = self.delayed_granularity;
        let tracking_keys = if key.granularity() == tracking || tracking.is_coarser(&key.granularity()) {
            vec![key.extrapolate(tracking)?]
        } else {
            key.children_keys_of(tracking)
        };

        let mut locators = BTreeSet::new();
        for tracking_key in tracking_keys {
            let found = self
                .store
                .get_delayed_locators(tracking, tracking_key.slot(), tracking_key.shard())
                .await?;
            locators.extend(found);
        }

        let locators: Vec<Locator> = if locators.is_empty() {
            tracing::debug!(key = %key, "No delayed locators recorded, re-rolling shard");
            self.store.locators_for_shard(key.shard()).await?
        } else {
            locators.into_iter().collect()
        };
        metrics::record_reroll(key.granularity().short_name(), "delayed_locators");
        self.rollup_slot(key, &locators, resolver).await
    }
}

impl std::fmt::Debug for RollupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollupOrchestrator")
            .field("store", &self.store.store_id())
            .field("concurrency", &self.config.concurrency)
            .field("delayed_granularity", &self.delayed_granularity)
            .finish()
    }
}

// ============================================================================
// Service
// ============================================================================

/// Statistics for the rollup service
#[derive(Debug, Clone, Default)]
pub struct RollupServiceStats {
    /// Scheduler ticks run
    pub ticks: u64,
    /// Slots rolled successfully
    pub slots_rolled: u64,
    /// Slots pushed back after a failure
    pub slots_failed: u64,
    /// Slots handled as re-rolls
    pub rerolls: u64,
    /// Slot state rows persisted
    pub states_persisted: u64,
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Keys added to the queue
    pub scheduled: usize,
    /// Keys rolled and cleared
    pub rolled: usize,
    /// Keys pushed back
    pub failed: usize,
    /// Keys handled as re-rolls
    pub rerolls: usize,
    /// Slot state rows persisted
    pub states_persisted: usize,
}

/// Periodically rolls up every eligible slot of the managed shards
pub struct RollupService {
    orchestrator: Arc<RollupOrchestrator>,
    schedule: Arc<ScheduleContext>,
    resolver: RollupTypeResolver,
    config: RollupConfig,
    status: RwLock<ServiceStatus>,
    stats: RwLock<RollupServiceStats>,
}

impl RollupService {
    /// Create the service
    pub fn new(
        orchestrator: Arc<RollupOrchestrator>,
        schedule: Arc<ScheduleContext>,
        resolver: RollupTypeResolver,
        config: RollupConfig,
    ) -> Self {
        Self {
            orchestrator,
            schedule,
            resolver,
            config,
            status: RwLock::new(ServiceStatus::Starting),
            stats: RwLock::new(RollupServiceStats::default()),
        }
    }

    /// Get service statistics
    pub fn stats(&self) -> RollupServiceStats {
        self.stats.read().clone()
    }

    /// Run one scheduling pass
    pub async fn run_once(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let store = self.orchestrator.store().clone();
        let manager = self.schedule.manager().clone();
        let shards = manager.managed_shards();

        for shard in &shards {
            for row in store.get_slot_state(*shard).await? {
                manager.update_slot_on_read(*shard, &row)?;
            }
        }

        report.scheduled = self.schedule.schedule_eligible_slots(
            self.config.rollup_delay_ms,
            self.config.short_delay_rollup_delay_ms,
            self.config.long_delay_rollup_wait_ms,
        )?;

        let mut keys = Vec::new();
        while let Some(key) = self.schedule.next_scheduled() {
            keys.push(key);
        }

        for key in keys {
            let now = self.schedule.current_time_millis();
            let reroll = manager.is_reroll(&key, now);
            let result = if reroll {
                report.rerolls += 1;
                self.orchestrator.reroll_delayed(key, &self.resolver).await
            } else {
                match store.locators_for_shard(key.shard()).await {
                    Ok(locators) => {
                        self.orchestrator
                            .rollup_slot(key, &locators, &self.resolver)
                            .await
                    }
                    Err(e) => Err(e.into()),
                }
            };

            match result {
                Ok(slot_report) if slot_report.is_success() => {
                    self.schedule.clear_from_running(&key)?;
                    report.rolled += 1;
                }
                Ok(slot_report) => {
                    tracing::warn!(key = %key, failed = slot_report.failures.len(), "Slot rollup incomplete");
                    self.schedule.push_back_to_scheduled(key, true);
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Slot rollup failed");
                    self.schedule.push_back_to_scheduled(key, true);
                    report.failed += 1;
                }
            }
        }

        for shard in &shards {
            let rows = manager.dirty_slot_states(*shard)?;
            if rows.is_empty() {
                continue;
            }
            let count = rows.len();
            if let Err(e) = store.put_slot_state(*shard, rows.clone()).await {
                tracing::warn!(shard, error = %e, "Persisting slot state failed");
                for row in &rows {
                    let key = SlotKey::new(row.granularity, row.slot, *shard)?;
                    manager.with_stamp(&key, |stamp| stamp.dirty = true);
                }
                continue;
            }
            report.states_persisted += count;
        }

        metrics::update_scheduled_slots(self.schedule.scheduled_count());
        {
            let mut stats = self.stats.write();
            stats.ticks += 1;
            stats.slots_rolled += report.rolled as u64;
            stats.slots_failed += report.failed as u64;
            stats.rerolls += report.rerolls as u64;
            stats.states_persisted += report.states_persisted as u64;
        }
        if report.scheduled > 0 || report.rolled > 0 || report.failed > 0 {
            tracing::debug!(
                scheduled = report.scheduled,
                rolled = report.rolled,
                failed = report.failed,
                rerolls = report.rerolls,
                persisted = report.states_persisted,
                "Rollup tick"
            );
        }
        Ok(report)
    }
}

#[async_trait::async_trait]
impl Service for RollupService {
    async fn start(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::result::Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        metrics::set_healthy(true);
        tracing::debug!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Rollup service started"
        );

        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Rollup service received shutdown signal");
                            break;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Rollup service broadcast receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Rollup tick failed");
                    }
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        metrics::set_healthy(false);
        tracing::debug!("Rollup service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rollup"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
