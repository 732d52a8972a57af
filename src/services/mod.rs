//! Background services and the ingest path
//!
//! - [`framework`]: service trait and lifecycle manager
//! - [`ingest`]: writes samples and marks their slots Active
//! - [`rollup`]: computes rollups and drives the slot scheduler

pub mod framework;
pub mod ingest;
pub mod rollup;

pub use framework::{Service, ServiceError, ServiceManager, ServiceStatus};
pub use ingest::{IngestReport, Ingestor, Metric, MetricValue};
pub use rollup::{
    basic_resolver, RangeOutcome, RollupOrchestrator, RollupService, RollupServiceStats,
    RollupTypeResolver, SlotRollupReport, TickReport,
};
