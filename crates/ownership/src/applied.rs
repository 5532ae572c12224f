//! Per-range low-water-marks
//!
//! `AppliedMap` records, for each range, the last digest the local store has
//! materialized. Reads are lock-free per shard; writes happen only from the
//! checkpoint engine while it holds its checkpoint mutex, so a mark only ever
//! moves forward along the replay order.

use dashmap::DashMap;
use mdbc_core::ledger::{AppliedMark, CheckpointLocations};
use mdbc_core::types::Range;
use std::collections::BTreeMap;

/// Concurrent map of range -> last applied digest
#[derive(Debug, Default)]
pub struct AppliedMap {
    marks: DashMap<Range, AppliedMark>,
}

impl AppliedMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from checkpoint locations persisted by the local store
    pub fn from_locations(locations: CheckpointLocations) -> Self {
        let marks = DashMap::with_capacity(locations.len());
        for (range, mark) in locations {
            marks.insert(range, mark);
        }
        Self { marks }
    }

    /// Mark for one range
    pub fn get(&self, range: &Range) -> Option<AppliedMark> {
        self.marks.get(range).map(|m| *m.value())
    }

    /// Marks for the given ranges that have one
    pub fn snapshot(&self, ranges: &[Range]) -> BTreeMap<Range, AppliedMark> {
        ranges
            .iter()
            .filter_map(|r| self.get(r).map(|m| (r.clone(), m)))
            .collect()
    }

    /// Every mark
    pub fn to_locations(&self) -> CheckpointLocations {
        self.marks
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub(crate) fn record(&self, range: &Range, mark: AppliedMark) {
        self.marks.insert(range.clone(), mark);
    }

    /// Number of ranges with a mark
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// True if nothing has been applied or seeded
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
