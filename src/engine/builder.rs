//! Rollup system builder
//!
//! Wires a [`MetricStore`], the slot state tracker, the ingest path and the
//! rollup service together from a [`Config`].

use super::traits::MetricStore;
use crate::clock::{Clock, SystemClock};
use crate::codec::RollupCodec;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;
use crate::services::{
    basic_resolver, Ingestor, RollupOrchestrator, RollupService, RollupTypeResolver,
};
use crate::state::{DelayedLocatorTracker, LocatorCache, ScheduleContext, ShardStateManager};
use std::sync::Arc;
use tracing::info;

/// Builder for [`RollupSystem`]
pub struct RollupSystemBuilder {
    config: Config,
    store: Option<Arc<dyn MetricStore>>,
    clock: Option<Arc<dyn Clock>>,
    resolver: Option<RollupTypeResolver>,
}

impl Default for RollupSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RollupSystemBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
            clock: None,
            resolver: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the backing store
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: MetricStore,
    {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the backing store from an existing Arc
    pub fn with_store_arc(mut self, store: Arc<dyn MetricStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the clock, [`SystemClock`] otherwise
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set how a locator's rollup type is chosen, [`basic_resolver`] otherwise
    pub fn with_resolver(mut self, resolver: RollupTypeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Validate the configuration and assemble the system
    pub fn build(self) -> Result<RollupSystem> {
        self.config.validate().map_err(Error::Configuration)?;
        let store = self
            .store
            .ok_or_else(|| Error::Configuration("Metric store not configured".to_string()))?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let resolver = self.resolver.unwrap_or_else(basic_resolver);
        let config = self.config;

        if config.monitoring.metrics_enabled {
            metrics::init();
        }

        let shards = config.sharding.resolved_shards();
        let manager = Arc::new(ShardStateManager::new(
            shards.iter().copied(),
            clock.clone(),
            config.rollup.reroll_time_span_ms,
        )?);
        let schedule = Arc::new(ScheduleContext::new(manager));

        let delayed_granularity = config.delayed.granularity()?;
        let tracker = if config.delayed.enabled {
            let cache = LocatorCache::new(
                config.delayed.cache_capacity,
                config.delayed.cache_ttl_ms(),
                clock.clone(),
            );
            Some(Arc::new(DelayedLocatorTracker::new(
                config.delayed.max_age_ms,
                delayed_granularity,
                cache,
            )?))
        } else {
            None
        };

        let codec = RollupCodec::new();
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            schedule.clone(),
            tracker,
            codec,
            clock.clone(),
        ));
        let orchestrator = Arc::new(
            RollupOrchestrator::new(store.clone(), codec, config.rollup.clone(), clock)
                .with_delayed_granularity(delayed_granularity),
        );
        let service = Arc::new(RollupService::new(
            orchestrator.clone(),
            schedule.clone(),
            resolver,
            config.rollup.clone(),
        ));

        info!(
            store = store.store_id(),
            shards = shards.len(),
            delayed_tracking = config.delayed.enabled,
            "Rollup system assembled"
        );

        Ok(RollupSystem {
            config,
            store,
            schedule,
            ingestor,
            orchestrator,
            service,
        })
    }
}

/// Assembled rollup store
pub struct RollupSystem {
    config: Config,
    store: Arc<dyn MetricStore>,
    schedule: Arc<ScheduleContext>,
    ingestor: Arc<Ingestor>,
    orchestrator: Arc<RollupOrchestrator>,
    service: Arc<RollupService>,
}

impl RollupSystem {
    /// Configuration the system was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Backing store
    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Slot scheduler
    pub fn schedule(&self) -> &Arc<ScheduleContext> {
        &self.schedule
    }

    /// Ingest path
    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    /// On-demand rollups
    pub fn orchestrator(&self) -> &Arc<RollupOrchestrator> {
        &self.orchestrator
    }

    /// Background rollup service
    pub fn service(&self) -> &Arc<RollupService> {
        &self.service
    }
}

impl std::fmt::Debug for RollupSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollupSystem")
            .field("store", &self.store.store_id())
            .field("managed_shards", &self.schedule.manager().managed_shards().len())
            .finish()
    }
}
