//! Storage seam and system assembly
//!
//! [`MetricStore`] is the boundary to the backing database. The in-memory
//! implementation backs tests and single-process use.

pub mod builder;
pub mod stubs;
pub mod traits;

pub use builder::{RollupSystem, RollupSystemBuilder};
pub use stubs::InMemoryMetricStore;
pub use traits::{Column, MetricStore, StoreStats, WriteRequest};
