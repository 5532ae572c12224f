//! Database partitions
//!
//! A partition is the unit of ownership held by one client connection. It is
//! created when the connection opens and dropped when it closes.

use crate::ledger::OwnershipReturn;
use crate::types::{MriReference, PartitionId, Range};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ownership unit bound to one connection at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasePartition {
    partition_id: PartitionId,
    mri_index: Option<MriReference>,
    ranges: BTreeSet<Range>,
}

impl DatabasePartition {
    /// Create an empty partition with the given ownership id
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            mri_index: None,
            ranges: BTreeSet::new(),
        }
    }

    /// Ownership id
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Ledger row currently owned, if any
    pub fn mri_index(&self) -> Option<MriReference> {
        self.mri_index
    }

    /// Ranges currently owned
    pub fn ranges(&self) -> &BTreeSet<Range> {
        &self.ranges
    }

    /// True if every range in `ranges` is already owned
    pub fn owns_all(&self, ranges: &[Range]) -> bool {
        ranges.iter().all(|r| self.ranges.contains(r))
    }

    /// Record a successful ownership acquisition
    pub fn update_from_ownership(&mut self, ownership: &OwnershipReturn) {
        self.mri_index = Some(ownership.partition_index);
        self.ranges = ownership.ranges.iter().cloned().collect();
    }

    /// Forget all owned ranges
    pub fn clear(&mut self) {
        self.mri_index = None;
        self.ranges.clear();
    }
}
