//! Random range selector.
//!
//! Sampling bounds come from an exact-match table keyed by the number of
//! valid elements (workers or spines) in a cluster. Only powers of two are
//! representable; a count without an entry is a provisioning error rather
//! than something to round or interpolate.

use std::collections::BTreeMap;

use serde::Serialize;

use horus_core::config::RangeEntryConfig;

use crate::error::{LeafError, LeafResult};

/// Which of the two sampling tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeTableKind {
    Workers,
    Spines,
}

impl std::fmt::Display for RangeTableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeTableKind::Workers => f.write_str("workers"),
            RangeTableKind::Spines => f.write_str("spines"),
        }
    }
}

/// Sample uniformly over `width_bits` bits, i.e. `[0, 1 << width_bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangeAction {
    pub width_bits: u8,
}

impl RangeAction {
    pub fn bound(self) -> u16 {
        1u16 << self.width_bits
    }
}

#[derive(Debug, Clone)]
pub struct RangeTable {
    kind: RangeTableKind,
    entries: BTreeMap<u16, RangeAction>,
}

impl RangeTable {
    pub fn empty(kind: RangeTableKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Every power of two from 1 to 2^15.
    pub fn powers_of_two(kind: RangeTableKind) -> Self {
        let mut table = Self::empty(kind);
        for width_bits in 0..=15u8 {
            table
                .entries
                .insert(1u16 << width_bits, RangeAction { width_bits });
        }
        table
    }

    /// Build from config entries; an empty list means the default table.
    pub fn from_config(kind: RangeTableKind, entries: &[RangeEntryConfig]) -> LeafResult<Self> {
        if entries.is_empty() {
            return Ok(Self::powers_of_two(kind));
        }
        let mut table = Self::empty(kind);
        for entry in entries {
            table.install(entry.count, RangeAction { width_bits: entry.width_bits })?;
        }
        Ok(table)
    }

    pub fn kind(&self) -> RangeTableKind {
        self.kind
    }

    /// Insert or replace the action for `count`.
    pub fn install(&mut self, count: u16, action: RangeAction) -> LeafResult<Option<RangeAction>> {
        let expected_bits = count.trailing_zeros();
        if !count.is_power_of_two() || u32::from(action.width_bits) != expected_bits {
            return Err(LeafError::InvalidRangeEntry {
                count,
                width_bits: action.width_bits,
                expected_bits,
            });
        }
        Ok(self.entries.insert(count, action))
    }

    pub fn remove(&mut self, count: u16) -> Option<RangeAction> {
        self.entries.remove(&count)
    }

    pub fn resolve(&self, count: u16) -> LeafResult<RangeAction> {
        self.entries
            .get(&count)
            .copied()
            .ok_or(LeafError::UnprovisionedRange {
                table: self.kind,
                count,
            })
    }

    pub fn contains(&self, count: u16) -> bool {
        self.entries.contains_key(&count)
    }

    pub fn counts(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }
}

/// The two tables a leaf consults: local workers and upstream spines.
#[derive(Debug, Clone)]
pub struct RangeTables {
    pub workers: RangeTable,
    pub spines: RangeTable,
}

impl RangeTables {
    pub fn table(&self, kind: RangeTableKind) -> &RangeTable {
        match kind {
            RangeTableKind::Workers => &self.workers,
            RangeTableKind::Spines => &self.spines,
        }
    }

    pub fn table_mut(&mut self, kind: RangeTableKind) -> &mut RangeTable {
        match kind {
            RangeTableKind::Workers => &mut self.workers,
            RangeTableKind::Spines => &mut self.spines,
        }
    }
}

impl Default for RangeTables {
    fn default() -> Self {
        Self {
            workers: RangeTable::powers_of_two(RangeTableKind::Workers),
            spines: RangeTable::powers_of_two(RangeTableKind::Spines),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_powers_of_two() {
        let table = RangeTable::powers_of_two(RangeTableKind::Workers);
        assert_eq!(table.resolve(1).unwrap().bound(), 1);
        assert_eq!(table.resolve(4).unwrap().width_bits, 2);
        assert_eq!(table.resolve(256).unwrap().bound(), 256);
        assert_eq!(table.resolve(16384).unwrap().width_bits, 14);
        assert_eq!(table.resolve(32768).unwrap().bound(), 32768);
        assert_eq!(table.counts().count(), 16);
    }

    #[test]
    fn counts_outside_table_are_errors() {
        let table = RangeTable::powers_of_two(RangeTableKind::Spines);
        for count in [0, 3, 6, 1000] {
            let err = table.resolve(count).unwrap_err();
            assert!(matches!(
                err,
                LeafError::UnprovisionedRange {
                    table: RangeTableKind::Spines,
                    count: c
                } if c == count
            ));
        }
    }

    #[test]
    fn sparse_table_from_config() {
        let entries = [
            RangeEntryConfig { count: 2, width_bits: 1 },
            RangeEntryConfig { count: 4, width_bits: 2 },
            RangeEntryConfig { count: 16, width_bits: 4 },
            RangeEntryConfig { count: 256, width_bits: 8 },
        ];
        let table = RangeTable::from_config(RangeTableKind::Workers, &entries).unwrap();

        assert_eq!(table.counts().collect::<Vec<_>>(), vec![2, 4, 16, 256]);
        assert!(table.resolve(8).is_err());
        assert_eq!(table.resolve(16).unwrap().bound(), 16);
    }

    #[test]
    fn mismatched_action_is_rejected() {
        let mut table = RangeTable::empty(RangeTableKind::Workers);
        assert!(matches!(
            table.install(4, RangeAction { width_bits: 3 }),
            Err(LeafError::InvalidRangeEntry { count: 4, expected_bits: 2, .. })
        ));
        assert!(table.install(6, RangeAction { width_bits: 2 }).is_err());
        assert!(!table.contains(4));
    }

    #[test]
    fn install_and_remove() {
        let mut table = RangeTable::empty(RangeTableKind::Spines);
        assert_eq!(table.install(8, RangeAction { width_bits: 3 }).unwrap(), None);
        assert!(table.contains(8));
        assert_eq!(table.remove(8), Some(RangeAction { width_bits: 3 }));
        assert!(table.resolve(8).is_err());
    }
}
