//! Ingest path
//!
//! Encodes incoming metrics, writes them in one batch, then marks their slots
//! Active and records delayed samples for targeted re-rolls.

use crate::clock::Clock;
use crate::codec::RollupCodec;
use crate::engine::{MetricStore, WriteRequest};
use crate::error::{Error, Result, RollupError, StorageError};
use crate::granularity::Granularity;
use crate::rollup::Rollup;
use crate::state::{DelayedLocator, DelayedLocatorTracker, ScheduleContext};
use crate::types::{shard_for, Locator, Sample};
use std::sync::Arc;

/// Payload of an incoming metric
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A single raw sample
    Raw(Sample),
    /// A value aggregated before ingest
    Rollup(Rollup),
}

/// One incoming sample
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric identity
    pub locator: Locator,
    /// Collection time in epoch milliseconds
    pub collection_time: i64,
    /// Table the value is written to
    pub granularity: Granularity,
    /// Value
    pub value: MetricValue,
    /// Time to live in seconds
    pub ttl_seconds: u32,
}

impl Metric {
    /// A raw sample at full resolution
    pub fn raw(locator: Locator, collection_time: i64, sample: Sample, ttl_seconds: u32) -> Self {
        Self {
            locator,
            collection_time,
            granularity: Granularity::Full,
            value: MetricValue::Raw(sample),
            ttl_seconds,
        }
    }

    /// A pre-aggregated value written at `granularity`
    pub fn rollup(
        locator: Locator,
        granularity: Granularity,
        collection_time: i64,
        rollup: Rollup,
        ttl_seconds: u32,
    ) -> Self {
        Self {
            locator,
            collection_time,
            granularity,
            value: MetricValue::Rollup(rollup),
            ttl_seconds,
        }
    }
}

/// Outcome of one [`Ingestor::ingest`] call
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Metrics written
    pub accepted: usize,
    /// Rejected metrics by position in the input
    pub rejected: Vec<(usize, Error)>,
    /// Delayed locators recorded
    pub delayed: usize,
    /// Delayed locators the store refused; they are recorded again on the next sample
    pub delayed_failed: Vec<(DelayedLocator, StorageError)>,
}

/// Writes metrics and keeps slot state current
pub struct Ingestor {
    store: Arc<dyn MetricStore>,
    schedule: Arc<ScheduleContext>,
    delayed: Option<Arc<DelayedLocatorTracker>>,
    codec: RollupCodec,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    /// Create an ingestor
    pub fn new(
        store: Arc<dyn MetricStore>,
        schedule: Arc<ScheduleContext>,
        delayed: Option<Arc<DelayedLocatorTracker>>,
        codec: RollupCodec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            schedule,
            delayed,
            codec,
            clock,
        }
    }

    fn encode(&self, metric: &Metric) -> Result<WriteRequest> {
        let bytes = match &metric.value {
            MetricValue::Raw(sample) => self.codec.encode_raw(sample)?,
            MetricValue::Rollup(rollup) => {
                let rollup_type = rollup.rollup_type();
                if rollup_type.input_is_raw(metric.granularity) {
                    return Err(RollupError::UnsupportedInput {
                        rollup_type: rollup_type.name().to_string(),
                        input: format!("pre-aggregated value at {}", metric.granularity),
                    }
                    .into());
                }
                self.codec.encode(rollup)?
            }
        };
        Ok(WriteRequest::new(
            metric.locator.clone(),
            metric.granularity,
            metric.collection_time,
            bytes,
            metric.ttl_seconds,
        ))
    }

    /// Write a batch of metrics
    ///
    /// A metric that cannot be encoded is rejected on its own and reported in
    /// [`IngestReport::rejected`]. A store failure fails the whole batch, and
    /// no slot state is touched in that case. Once the batch is written every
    /// accepted metric marks its slots; delayed locators are recorded best
    /// effort and failures land in [`IngestReport::delayed_failed`].
    pub async fn ingest(&self, metrics: Vec<Metric>) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut batch = Vec::with_capacity(metrics.len());
        let mut accepted = Vec::with_capacity(metrics.len());

        for (index, metric) in metrics.into_iter().enumerate() {
            match self.encode(&metric) {
                Ok(request) => {
                    batch.push(request);
                    accepted.push(metric);
                }
                Err(e) => {
                    tracing::debug!(locator = %metric.locator, error = %e, "Rejected metric");
                    report.rejected.push((index, e));
                }
            }
        }
        if batch.is_empty() {
            return Ok(report);
        }

        self.store.put(batch).await?;
        report.accepted = accepted.len();

        for metric in &accepted {
            self.schedule
                .update(metric.collection_time, shard_for(&metric.locator))?;
        }

        if let Some(tracker) = &self.delayed {
            let now = self.clock.now_millis();
            for metric in &accepted {
                let Some(delayed) = tracker.track(&metric.locator, metric.collection_time, now)
                else {
                    continue;
                };
                match self.store.insert_delayed_locator(delayed.clone()).await {
                    Ok(()) => report.delayed += 1,
                    Err(e) => {
                        tracing::warn!(
                            locator = %delayed.locator,
                            slot = delayed.slot,
                            error = %e,
                            "Recording delayed locator failed"
                        );
                        tracker.forget(&delayed);
                        report.delayed_failed.push((delayed, e));
                    }
                }
            }
        }

        tracing::debug!(
            accepted = report.accepted,
            rejected = report.rejected.len(),
            delayed = report.delayed,
            delayed_failed = report.delayed_failed.len(),
            "Ingested batch"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("store", &self.store.store_id())
            .field("delayed_tracking", &self.delayed.is_some())
            .finish()
    }
}
