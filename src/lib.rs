//! Kuba Rollup - multi-resolution rollup store for time-series metrics
//!
//! Raw samples are written at full resolution and periodically summarized
//! into coarser tables (5m, 20m, 60m, 240m, 1440m):
//! - Locator, granularity and slot model with 128-way sharding
//! - Rollup variants (basic, gauge, counter, timer, set, enum, histogram)
//! - Versioned binary codec for every rollup variant and raw samples
//! - Slot state tracking with delayed-sample detection and re-rolls
//! - Rollup orchestration over a pluggable metric store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod codec;
pub mod engine;
pub mod error;
pub mod granularity;
pub mod slot;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Rollup variants and the merge algebra that combines them
pub mod rollup;

/// Slot state tracking, scheduling and delayed-locator detection
pub mod state;

/// Background services for ingest, rollups and lifecycle management
pub mod services;

// Re-export main types
pub use codec::RollupCodec;
pub use config::Config;
pub use engine::{InMemoryMetricStore, MetricStore, RollupSystem, RollupSystemBuilder};
pub use error::{Error, Result};
pub use granularity::Granularity;
pub use rollup::{Rollup, RollupType};
pub use slot::SlotKey;
pub use types::{Locator, Number, Range, Sample};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `level`. A second call is a no-op.
pub fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
