//! Slot and shard state
//!
//! Tracks which slots hold data that still needs rolling up, schedules those
//! rollups, and records samples that arrive after their slot aged out.

mod delayed;
mod schedule;
mod shard;
mod stamp;

pub use delayed::{DelayedLocator, DelayedLocatorTracker, LocatorCache};
pub use schedule::ScheduleContext;
pub use shard::{ShardStateManager, SlotStateManager};
pub use stamp::{SlotState, SlotStateKind, UpdateStamp};
