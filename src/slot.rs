//! Slot keys: `(granularity, slot, shard)`

use crate::error::ModelError;
use crate::granularity::Granularity;
use crate::types::{check_shard, Range, Shard, Slot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one slot of one granularity within one shard
///
/// The string form is `"{granularity name},{slot},{shard}"`, e.g.
/// `metrics_5m,12,3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    granularity: Granularity,
    slot: Slot,
    shard: Shard,
}

impl SlotKey {
    /// Create a validated slot key
    pub fn new(granularity: Granularity, slot: Slot, shard: Shard) -> Result<Self, ModelError> {
        check_shard(shard)?;
        if slot >= granularity.num_slots() {
            return Err(ModelError::InvalidSlot {
                granularity: granularity.name(),
                slot,
                num_slots: granularity.num_slots(),
            });
        }
        Ok(Self {
            granularity,
            slot,
            shard,
        })
    }

    /// Key of the slot that holds `millis`
    pub fn for_millis(granularity: Granularity, millis: i64, shard: Shard) -> Result<Self, ModelError> {
        Self::new(granularity, granularity.slot(millis), shard)
    }

    /// Granularity of the slot
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Slot index
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Shard
    pub fn shard(&self) -> Shard {
        self.shard
    }

    /// Absolute range of this slot resolved against `reference_millis`
    pub fn range(&self, reference_millis: i64) -> Result<Range, ModelError> {
        self.granularity.derive_range(self.slot, reference_millis)
    }

    /// Every finer slot key this slot is computed from, at all finer granularities
    ///
    /// Direct children come first, each followed by its own descendants.
    pub fn children_keys(&self) -> Vec<SlotKey> {
        let mut keys = Vec::new();
        self.collect_children(&mut keys);
        keys
    }

    /// Finer slot keys at one specific granularity
    pub fn children_keys_of(&self, granularity: Granularity) -> Vec<SlotKey> {
        self.children_keys()
            .into_iter()
            .filter(|k| k.granularity == granularity)
            .collect()
    }

    fn collect_children(&self, out: &mut Vec<SlotKey>) {
        let Some(finer) = self.granularity.finer() else {
            return;
        };
        let factor = finer.num_slots() / self.granularity.num_slots();
        for i in 0..factor {
            let child = SlotKey {
                granularity: finer,
                slot: self.slot * factor + i,
                shard: self.shard,
            };
            out.push(child);
            child.collect_children(out);
        }
    }

    /// Map this key to the slot of a coarser (or equal) granularity that contains it
    pub fn extrapolate(&self, destination: Granularity) -> Result<SlotKey, ModelError> {
        if destination == self.granularity {
            return Ok(*self);
        }
        if !destination.is_coarser(&self.granularity) {
            return Err(ModelError::InvalidSlotKey(format!(
                "{} is not coarser than {}",
                destination, self.granularity
            )));
        }
        let factor = self.granularity.num_slots() / destination.num_slots();
        Ok(SlotKey {
            granularity: destination,
            slot: self.slot / factor,
            shard: self.shard,
        })
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.granularity.name(), self.slot, self.shard)
    }
}

impl FromStr for SlotKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidSlotKey(s.to_string());
        let mut parts = s.split(',');
        let (Some(gran), Some(slot), Some(shard), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let granularity = Granularity::from_name(gran.trim())?;
        let slot = slot.trim().parse::<Slot>().map_err(|_| invalid())?;
        let shard = shard.trim().parse::<Shard>().map_err(|_| invalid())?;
        SlotKey::new(granularity, slot, shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_SHARDS;

    #[test]
    fn test_validation() {
        assert!(SlotKey::new(Granularity::Min5, 4031, 0).is_ok());
        assert!(SlotKey::new(Granularity::Min5, 4032, 0).is_err());
        assert!(SlotKey::new(Granularity::Min1440, 14, 0).is_err());
        assert!(SlotKey::new(Granularity::Min5, 0, NUM_SHARDS).is_err());
    }

    #[test]
    fn test_string_round_trip() {
        let key = SlotKey::new(Granularity::Min20, 7, 3).unwrap();
        assert_eq!(key.to_string(), "metrics_20m,7,3");
        assert_eq!("metrics_20m,7,3".parse::<SlotKey>().unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("metrics_20m,7".parse::<SlotKey>().is_err());
        assert!("metrics_20m,x,1".parse::<SlotKey>().is_err());
        assert!("metrics_7m,1,1".parse::<SlotKey>().is_err());
        assert!("metrics_20m,1,1,1".parse::<SlotKey>().is_err());
    }

    #[test]
    fn test_children_of_20m() {
        let key = SlotKey::new(Granularity::Min20, 2, 5).unwrap();
        let children = key.children_keys();
        // 4 five-minute slots, each with one full-resolution slot
        assert_eq!(children.len(), 8);
        let five: Vec<Slot> = key
            .children_keys_of(Granularity::Min5)
            .iter()
            .map(|k| k.slot())
            .collect();
        assert_eq!(five, vec![8, 9, 10, 11]);
        assert!(children.iter().all(|k| k.shard() == 5));
    }

    #[test]
    fn test_children_of_full_is_empty() {
        let key = SlotKey::new(Granularity::Full, 2, 5).unwrap();
        assert!(key.children_keys().is_empty());
    }

    #[test]
    fn test_children_of_day_slot() {
        let key = SlotKey::new(Granularity::Min1440, 0, 0).unwrap();
        assert_eq!(key.children_keys_of(Granularity::Min240).len(), 6);
        assert_eq!(key.children_keys_of(Granularity::Min5).len(), 288);
    }

    #[test]
    fn test_extrapolate() {
        let key = SlotKey::new(Granularity::Min5, 100, 1).unwrap();
        let coarse = key.extrapolate(Granularity::Min60).unwrap();
        assert_eq!(coarse.slot(), 8);
        assert_eq!(coarse.granularity(), Granularity::Min60);
        assert_eq!(key.extrapolate(Granularity::Min5).unwrap(), key);
        assert!(coarse.extrapolate(Granularity::Min5).is_err());
    }
}
