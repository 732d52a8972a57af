//! Per-slot bookkeeping records

use crate::error::ModelError;
use crate::granularity::Granularity;
use crate::types::Slot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rollup state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStateKind {
    /// Received samples since the last rollup
    Active,
    /// Rolled up at its current timestamp
    Rolled,
}

impl SlotStateKind {
    /// Persisted one-letter code
    pub fn code(&self) -> &'static str {
        match self {
            SlotStateKind::Active => "A",
            SlotStateKind::Rolled => "X",
        }
    }
}

impl fmt::Display for SlotStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SlotStateKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "Active" => Ok(SlotStateKind::Active),
            "X" | "Rolled" => Ok(SlotStateKind::Rolled),
            other => Err(ModelError::InvalidSlotKey(format!("unknown slot state {}", other))),
        }
    }
}

/// In-memory state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStamp {
    /// Greatest collection time seen for the slot
    pub timestamp: i64,
    /// Current state
    pub state: SlotStateKind,
    /// Changed since last persisted
    pub dirty: bool,
    /// Wall time of the most recent ingest, 0 if unknown
    pub last_ingest_ms: i64,
    /// Wall time of the most recent rollup, 0 if never rolled
    pub last_rollup_ms: i64,
}

impl UpdateStamp {
    /// Stamp with no ingest or rollup history
    pub fn new(timestamp: i64, state: SlotStateKind, dirty: bool) -> Self {
        Self {
            timestamp,
            state,
            dirty,
            last_ingest_ms: 0,
            last_rollup_ms: 0,
        }
    }

    /// True for [`SlotStateKind::Active`]
    pub fn is_active(&self) -> bool {
        self.state == SlotStateKind::Active
    }
}

/// Persisted form of a slot's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    /// Granularity of the slot
    pub granularity: Granularity,
    /// Slot index
    pub slot: Slot,
    /// State at the time of the write
    pub state: SlotStateKind,
    /// Collection time the state refers to
    pub timestamp: i64,
    /// Time of the write as seen by storage
    pub last_updated: i64,
}

impl SlotState {
    /// Row for an in-memory stamp; storage fills in `last_updated`
    pub fn from_stamp(granularity: Granularity, slot: Slot, stamp: &UpdateStamp) -> Self {
        Self {
            granularity,
            slot,
            state: stamp.state,
            timestamp: stamp.timestamp,
            last_updated: 0,
        }
    }

    /// Set `last_updated`
    pub fn with_last_updated(mut self, last_updated: i64) -> Self {
        self.last_updated = last_updated;
        self
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}: {}",
            self.granularity.name(),
            self.slot,
            self.state,
            self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!("A".parse::<SlotStateKind>().unwrap(), SlotStateKind::Active);
        assert_eq!("X".parse::<SlotStateKind>().unwrap(), SlotStateKind::Rolled);
        assert!("R".parse::<SlotStateKind>().is_err());
        assert_eq!(SlotStateKind::Rolled.to_string(), "X");
    }

    #[test]
    fn test_slot_state_from_stamp() {
        let stamp = UpdateStamp::new(1234, SlotStateKind::Rolled, true);
        let state = SlotState::from_stamp(Granularity::Min20, 7, &stamp).with_last_updated(99);
        assert_eq!(state.timestamp, 1234);
        assert_eq!(state.last_updated, 99);
        assert_eq!(state.to_string(), "metrics_20m,7,X: 1234");
    }
}
