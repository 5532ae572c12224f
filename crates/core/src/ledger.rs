//! Partition ledger types
//!
//! The ledger is the external, append-only history of range ownership. Each
//! ownership change appends one `LedgerRow`; earlier rows for the same ranges
//! stay behind as predecessors with `is_latest = false`. Each row carries the
//! ordered digests of the transactions committed under that ownership epoch.
//!
//! The core only reads ledger rows. Appending is the ledger service's job.

use crate::types::{MriReference, OperationId, Range};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one committed transaction digest
///
/// `index` is the position in the owning row's digest sequence. Indices are
/// strictly increasing per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxDigestId {
    /// Row the digest was staged under
    pub mri: MriReference,
    /// Position within the row's digest sequence
    pub index: usize,
}

impl TxDigestId {
    /// Create a digest id
    pub fn new(mri: MriReference, index: usize) -> Self {
        Self { mri, index }
    }
}

impl fmt::Display for TxDigestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.mri, self.index)
    }
}

/// Low-water-mark for one range
///
/// Every digest of `mri` with index `<= index`, and every digest of the rows
/// `mri` descends from, has been applied to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppliedMark {
    /// Row holding the last applied digest
    pub mri: MriReference,
    /// Index of the last applied digest within that row
    pub index: usize,
}

impl AppliedMark {
    /// Create a mark
    pub fn new(mri: MriReference, index: usize) -> Self {
        Self { mri, index }
    }
}

impl From<TxDigestId> for AppliedMark {
    fn from(id: TxDigestId) -> Self {
        Self::new(id.mri, id.index)
    }
}

/// Persisted checkpoint locations, as read back from the local store
pub type CheckpointLocations = BTreeMap<Range, AppliedMark>;

/// One ledger (range-information) row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// Index of this row
    pub partition_index: MriReference,
    /// Ranges covered at this point in history, sorted and unique
    pub ranges: Vec<Range>,
    /// Rows this one supersedes, oldest first
    pub predecessors: Vec<MriReference>,
    /// Whether this is the current row for its ranges
    pub is_latest: bool,
    /// Digests committed under this row, in commit order
    pub digests: Vec<TxDigestId>,
}

impl LedgerRow {
    /// Create a row with no digests
    pub fn new(
        partition_index: MriReference,
        ranges: impl IntoIterator<Item = Range>,
        predecessors: Vec<MriReference>,
        is_latest: bool,
    ) -> Self {
        let mut ranges: Vec<Range> = ranges.into_iter().collect();
        ranges.sort();
        ranges.dedup();
        Self {
            partition_index,
            ranges,
            predecessors,
            is_latest,
            digests: Vec::new(),
        }
    }

    /// Append the next digest id and return it
    pub fn push_digest(&mut self) -> TxDigestId {
        let id = TxDigestId::new(self.partition_index, self.digests.len());
        self.digests.push(id);
        id
    }

    /// True if any covered range overlaps `range`
    pub fn covers(&self, range: &Range) -> bool {
        self.ranges.iter().any(|r| r.overlaps(range))
    }

    /// True if any covered range overlaps any of `ranges`
    pub fn overlaps_any(&self, ranges: &[Range]) -> bool {
        ranges.iter().any(|r| self.covers(r))
    }
}

/// Filter ledger rows down to those relevant for `ranges`
///
/// With `only_latest`, rows superseded by a later ownership epoch are skipped.
pub fn extract_rows_for_range(
    rows: &[LedgerRow],
    ranges: &[Range],
    only_latest: bool,
) -> Vec<LedgerRow> {
    rows.iter()
        .filter(|row| !only_latest || row.is_latest)
        .filter(|row| row.overlaps_any(ranges))
        .cloned()
        .collect()
}

/// A distributed lock held on a ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockResult {
    /// Row the lock protects
    pub row: MriReference,
    /// Opaque lock reference issued by the ledger service
    pub lock_ref: String,
    /// True if the lock was taken away from another owner
    pub forced: bool,
}

/// Result of acquiring ownership through the ledger service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipReturn {
    /// Operation that requested ownership
    pub operation_id: OperationId,
    /// Row now owned by the requesting partition
    pub partition_index: MriReference,
    /// Ranges covered by that row
    pub ranges: Vec<Range>,
    /// Locks held on the rows that were superseded
    pub locks: BTreeMap<MriReference, LockResult>,
}
