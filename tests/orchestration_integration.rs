//! End-to-End Rollup Orchestration Tests
//!
//! Assembles the whole system through [`RollupSystemBuilder`] over the
//! in-memory store and a manual clock, then drives ingest and scheduler ticks
//! by hand.
//!
//! # Test Coverage
//!
//! 1. **Pipeline** - raw samples rolled to 5m, then 5m rolled to 20m
//! 2. **Failures** - failed reads push the slot back, failed persists retry
//! 3. **Re-rolls** - late samples trigger a targeted re-roll
//! 4. **Interval rollups** - per-range outcomes
//! 5. **Service lifecycle** - start and graceful shutdown through the manager

use kuba_rollup::clock::ManualClock;
use kuba_rollup::config::Config;
use kuba_rollup::engine::{InMemoryMetricStore, MetricStore};
use kuba_rollup::rollup::RollupType;
use kuba_rollup::services::{Metric, ServiceManager, ServiceStatus, TickReport};
use kuba_rollup::types::shard_for;
use kuba_rollup::{
    Granularity, Locator, Number, RollupCodec, RollupSystem, RollupSystemBuilder, Sample,
};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

const TTL: u32 = 86_400;

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryMetricStore>,
    system: RollupSystem,
    locator: Locator,
}

/// A system managing only the shard of the test locator
fn harness(now: i64) -> Harness {
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(InMemoryMetricStore::with_clock(clock.clone()));
    let locator = Locator::new("acme", "api.latency");

    let mut config = Config::default();
    config.sharding.managed_shards = vec![shard_for(&locator)];

    let system = RollupSystemBuilder::new()
        .with_config(config)
        .with_store_arc(store.clone())
        .with_clock(clock.clone())
        .build()
        .expect("Failed to build rollup system");

    Harness {
        clock,
        store,
        system,
        locator,
    }
}

impl Harness {
    async fn ingest(&self, samples: &[(i64, i64)]) -> usize {
        let metrics = samples
            .iter()
            .map(|(ts, v)| Metric::raw(self.locator.clone(), *ts, Sample::Long(*v), TTL))
            .collect();
        let report = self
            .system
            .ingestor()
            .ingest(metrics)
            .await
            .expect("Ingest failed");
        assert!(report.rejected.is_empty());
        report.delayed
    }

    async fn tick_at(&self, now: i64) -> TickReport {
        self.clock.set(now);
        self.system.service().run_once().await.expect("Tick failed")
    }

    fn basic_cell(&self, granularity: Granularity, ts: i64) -> (u64, Number) {
        let bytes = self
            .store
            .get_cell(&self.locator, granularity, ts)
            .expect("missing rollup cell");
        let rollup = RollupCodec::new()
            .decode(RollupType::Basic, &bytes)
            .expect("undecodable rollup cell");
        let basic = rollup.as_basic().expect("not a basic rollup");
        (basic.count(), basic.average())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[tokio::test]
async fn test_raw_samples_roll_up_through_granularities() {
    let h = harness(1_200_000);
    h.ingest(&[(1_000_000, 10), (1_060_000, 20), (1_120_000, 30)]).await;

    // Too recent to roll; slot state is persisted anyway
    let report = h.tick_at(1_200_000).await;
    assert_eq!(report.scheduled, 0);
    assert_eq!(report.states_persisted, Granularity::rollup_granularities().len());

    let report = h.tick_at(1_600_000).await;
    assert_eq!(report.scheduled, 1);
    assert_eq!(report.rolled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.basic_cell(Granularity::Min5, 900_000), (3, Number::Long(20)));
    assert_eq!(h.store.cell_count(Granularity::Min20), 0);

    // The coarser slot became eligible once its 5m child was rolled
    let report = h.tick_at(2_000_000).await;
    assert_eq!(report.rolled, 1);
    assert_eq!(report.rerolls, 0);
    assert_eq!(h.basic_cell(Granularity::Min20, 0), (3, Number::Long(20)));

    let stats = h.system.service().stats();
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.slots_rolled, 2);
}

#[tokio::test]
async fn test_idle_tick_does_nothing() {
    let h = harness(5_000_000);
    assert_eq!(h.tick_at(5_000_000).await, TickReport::default());
    assert_eq!(h.store.stats().cells_written, 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_read_pushes_slot_back() {
    let h = harness(1_200_000);
    h.ingest(&[(1_000_000, 5)]).await;

    h.store.fail_reads_for(&h.locator);
    let report = h.tick_at(1_600_000).await;
    assert_eq!(report.rolled, 0);
    assert_eq!(report.failed, 1);
    assert!(h.system.schedule().has_scheduled());
    assert!(h.store.get_cell(&h.locator, Granularity::Min5, 900_000).is_none());

    h.store.clear_failures();
    let report = h.tick_at(1_600_000).await;
    assert_eq!(report.rolled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.basic_cell(Granularity::Min5, 900_000), (1, Number::Long(5)));
}

#[tokio::test]
async fn test_failed_persist_is_retried() {
    let h = harness(1_200_000);
    h.ingest(&[(1_000_000, 5)]).await;

    h.store.set_unavailable(true);
    let report = h.tick_at(1_200_000).await;
    assert_eq!(report.states_persisted, 0);
    assert!(h.store.get_slot_state(shard_for(&h.locator)).await.unwrap().is_empty());

    h.store.set_unavailable(false);
    let report = h.tick_at(1_200_000).await;
    assert_eq!(report.states_persisted, Granularity::rollup_granularities().len());
}

// =============================================================================
// Re-rolls
// =============================================================================

#[tokio::test]
async fn test_late_sample_triggers_reroll() {
    let h = harness(1_200_000);
    h.ingest(&[(1_000_000, 10), (1_060_000, 20), (1_120_000, 30)]).await;
    h.tick_at(1_600_000).await;
    assert_eq!(h.basic_cell(Granularity::Min5, 900_000), (3, Number::Long(20)));

    // A sample for the already rolled slot, collected long before it arrived
    h.clock.set(1_700_000);
    assert_eq!(h.ingest(&[(1_100_000, 100)]).await, 1);
    let delayed = h
        .store
        .get_delayed_locators(Granularity::Min20, 0, shard_for(&h.locator))
        .await
        .unwrap();
    assert_eq!(delayed, vec![h.locator.clone()]);

    // Still inside the short delay window
    let report = h.tick_at(1_700_000).await;
    assert_eq!(report.scheduled, 0);

    let report = h.tick_at(1_800_000).await;
    assert_eq!(report.rerolls, 1);
    assert_eq!(report.rolled, 1);
    assert_eq!(h.basic_cell(Granularity::Min5, 900_000), (4, Number::Long(40)));
}

// =============================================================================
// Interval Rollups
// =============================================================================

#[tokio::test]
async fn test_interval_rollup_reports_each_range() {
    let h = harness(10_000_000);
    h.ingest(&[(0, 2), (60_000, 4), (600_000, 10)]).await;

    let outcomes = h
        .system
        .orchestrator()
        .rollup_interval(&h.locator, RollupType::Basic, Granularity::Min5, 0, 899_999)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| !o.is_err()));
    assert!(matches!(outcomes[1].result, Ok(None)));

    assert_eq!(h.basic_cell(Granularity::Min5, 0), (2, Number::Long(3)));
    assert_eq!(h.basic_cell(Granularity::Min5, 600_000), (1, Number::Long(10)));
    assert_eq!(h.store.cell_count(Granularity::Min5), 2);
}

#[tokio::test]
async fn test_interval_rollup_write_failure_marks_ranges() {
    let h = harness(10_000_000);
    h.ingest(&[(0, 2)]).await;
    h.store.set_unavailable(true);

    let outcomes = h
        .system
        .orchestrator()
        .rollup_interval(&h.locator, RollupType::Basic, Granularity::Min5, 0, 299_999)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_err());
}

// =============================================================================
// Service Lifecycle
// =============================================================================

#[tokio::test]
async fn test_service_starts_and_stops_through_manager() {
    let h = harness(1_200_000);
    h.ingest(&[(1_000_000, 1)]).await;

    let manager = ServiceManager::new(Duration::from_secs(5));
    manager
        .register(h.system.service().clone())
        .expect("Failed to register rollup service");
    manager.start_all();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.service_status("rollup"), Some(ServiceStatus::Running));
    assert!(h.system.service().stats().ticks >= 1);

    manager.shutdown().await;
    assert_eq!(manager.service_status("rollup"), Some(ServiceStatus::Stopped));
}
