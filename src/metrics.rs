//! Prometheus metrics for the rollup store
//!
//! Metrics are registered on first use in the default registry and read back
//! with [`gather_metrics`]. Recording never affects rollup behavior.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Rollup Counters ===

    /// Rolled ranges by outcome
    pub static ref ROLLUP_RANGES_TOTAL: CounterVec = register_counter_vec!(
        "rollup_ranges_total",
        "Total rollup ranges processed by granularity and outcome",
        &["granularity", "status"]
    ).unwrap();

    /// Slot updates from ingest
    pub static ref SLOT_UPDATES_TOTAL: CounterVec = register_counter_vec!(
        "rollup_slot_updates_total",
        "Total slot state updates from ingested samples",
        &["granularity"]
    ).unwrap();

    /// Delayed locators recorded
    pub static ref DELAYED_LOCATORS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_delayed_locators_total",
        "Total delayed locators recorded",
        &["granularity"]
    ).unwrap();

    /// Re-roll decisions
    pub static ref REROLL_TOTAL: CounterVec = register_counter_vec!(
        "rollup_reroll_total",
        "Total re-roll decisions by reason",
        &["granularity", "reason"]
    ).unwrap();

    // === Codec ===

    /// Encoded and decoded payload sizes
    pub static ref CODEC_BYTES: HistogramVec = register_histogram_vec!(
        "rollup_codec_bytes",
        "Serialized payload size in bytes",
        &["rollup_type", "direction"],
        vec![8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0]
    ).unwrap();

    /// Codec failures
    pub static ref CODEC_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "rollup_codec_errors_total",
        "Total codec failures by payload type and error kind",
        &["rollup_type", "kind"]
    ).unwrap();

    // === Latency ===

    /// Duration of a single range rollup
    pub static ref ROLLUP_DURATION: HistogramVec = register_histogram_vec!(
        "rollup_duration_seconds",
        "Rollup latency per range in seconds",
        &["granularity"],
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Scheduler ===

    /// Slots waiting for a rollup
    pub static ref SCHEDULED_SLOTS: Gauge = register_gauge!(
        "rollup_scheduled_slots",
        "Number of slots queued for rollup"
    ).unwrap();

    /// Health status (0=unhealthy, 1=healthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "rollup_health_status",
        "Service health status (0=unhealthy, 1=healthy)"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    HEALTH_STATUS.set(1.0);
    SCHEDULED_SLOTS.set(0.0);
    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one rolled range
#[inline]
pub fn record_rollup(granularity: &str, duration_secs: f64, status: &str) {
    ROLLUP_RANGES_TOTAL
        .with_label_values(&[granularity, status])
        .inc();
    ROLLUP_DURATION
        .with_label_values(&[granularity])
        .observe(duration_secs);
}

/// Record a slot update
#[inline]
pub fn record_slot_update(granularity: &str) {
    SLOT_UPDATES_TOTAL.with_label_values(&[granularity]).inc();
}

/// Record a delayed locator
#[inline]
pub fn record_delayed_locator(granularity: &str) {
    DELAYED_LOCATORS_TOTAL.with_label_values(&[granularity]).inc();
}

/// Record a re-roll decision
#[inline]
pub fn record_reroll(granularity: &str, reason: &str) {
    REROLL_TOTAL.with_label_values(&[granularity, reason]).inc();
}

/// Record a payload size
#[inline]
pub fn record_codec_bytes(rollup_type: &str, direction: &str, bytes: usize) {
    CODEC_BYTES
        .with_label_values(&[rollup_type, direction])
        .observe(bytes as f64);
}

/// Record a codec failure
#[inline]
pub fn record_codec_error(rollup_type: &str, kind: &str) {
    CODEC_ERRORS_TOTAL
        .with_label_values(&[rollup_type, kind])
        .inc();
}

/// Update the scheduled slot gauge
#[inline]
pub fn update_scheduled_slots(count: usize) {
    SCHEDULED_SLOTS.set(count as f64);
}

/// Update health status
#[inline]
pub fn set_healthy(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}
