//! In-memory ledger service
//!
//! Models the ledger as a flat list of rows plus a digest table. Ownership
//! appends a new latest row that supersedes every latest row overlapping the
//! requested ranges, the way the real service chains ownership epochs.

use crate::error::{MdbcError, MdbcResult};
use crate::ledger::{LedgerRow, LockResult, OwnershipReturn, TxDigestId};
use crate::partition::DatabasePartition;
use crate::staging::StagingTable;
use crate::traits::LedgerService;
use crate::types::{MriReference, OperationId, PartitionId, Range};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

/// In-memory `LedgerService`
#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<Vec<LedgerRow>>,
    /// Encoded digests, as the real service stores them
    digests: Mutex<HashMap<TxDigestId, Vec<u8>>>,
    owners: Mutex<HashMap<MriReference, PartitionId>>,
    relinquished: Mutex<Vec<PartitionId>>,
    digest_fetches: AtomicUsize,
    fail_relinquish: AtomicBool,
    fail_digest_writes: AtomicBool,
    fail_row_reads: AtomicBool,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a latest row superseding `predecessors`
    pub fn append_row(&self, ranges: Vec<Range>, predecessors: Vec<MriReference>) -> MriReference {
        let mut rows = self.rows.lock();
        for row in rows.iter_mut() {
            if predecessors.contains(&row.partition_index) {
                row.is_latest = false;
            }
        }
        let mri = MriReference::new();
        rows.push(LedgerRow::new(mri, ranges, predecessors, true));
        mri
    }

    /// Append a digest to an existing row, regardless of ownership
    pub fn push_digest(&self, mri: MriReference, digest: &StagingTable) -> MdbcResult<TxDigestId> {
        let bytes = digest.to_bytes()?;
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|r| r.partition_index == mri)
            .ok_or_else(|| MdbcError::service(format!("unknown ledger row {}", mri)))?;
        let id = row.push_digest();
        self.digests.lock().insert(id, bytes);
        Ok(id)
    }

    /// Snapshot of one row
    pub fn row(&self, mri: MriReference) -> Option<LedgerRow> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.partition_index == mri)
            .cloned()
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Partitions that relinquished their locks, in order
    pub fn relinquished(&self) -> Vec<PartitionId> {
        self.relinquished.lock().clone()
    }

    /// Number of `get_tx_digest` calls served
    pub fn digest_fetches(&self) -> usize {
        self.digest_fetches.load(Ordering::Relaxed)
    }

    /// Make `relinquish` fail
    pub fn set_fail_relinquish(&self, fail: bool) {
        self.fail_relinquish.store(fail, Ordering::Relaxed);
    }

    /// Make `add_tx_digest` fail
    pub fn set_fail_digest_writes(&self, fail: bool) {
        self.fail_digest_writes.store(fail, Ordering::Relaxed);
    }

    /// Make `get_all_ledger_rows` fail
    pub fn set_fail_row_reads(&self, fail: bool) {
        self.fail_row_reads.store(fail, Ordering::Relaxed);
    }
}

impl LedgerService for InMemoryLedger {
    fn get_all_ledger_rows(&self) -> MdbcResult<Vec<LedgerRow>> {
        if self.fail_row_reads.load(Ordering::Relaxed) {
            return Err(MdbcError::service("ledger unreachable"));
        }
        Ok(self.rows.lock().clone())
    }

    fn get_tx_digest(&self, id: &TxDigestId) -> MdbcResult<StagingTable> {
        self.digest_fetches.fetch_add(1, Ordering::Relaxed);
        let digests = self.digests.lock();
        let bytes = digests
            .get(id)
            .ok_or_else(|| MdbcError::service(format!("missing digest {}", id)))?;
        StagingTable::from_bytes(bytes)
    }

    fn own(
        &self,
        ranges: &[Range],
        partition: &DatabasePartition,
        operation_id: OperationId,
    ) -> MdbcResult<OwnershipReturn> {
        let mut rows = self.rows.lock();
        let mut owners = self.owners.lock();

        if let Some(current) = partition.mri_index() {
            let still_owner = owners.get(&current) == Some(&partition.partition_id());
            if let Some(row) = rows
                .iter()
                .find(|r| r.partition_index == current && r.is_latest)
            {
                if still_owner && ranges.iter().all(|r| row.covers(r)) {
                    return Ok(OwnershipReturn {
                        operation_id,
                        partition_index: current,
                        ranges: row.ranges.clone(),
                        locks: BTreeMap::new(),
                    });
                }
            }
        }

        let mut new_ranges: Vec<Range> = ranges.to_vec();
        let mut predecessors = Vec::new();
        let mut locks = BTreeMap::new();
        for row in rows.iter_mut() {
            let own_row = Some(row.partition_index) == partition.mri_index();
            if !row.is_latest || !(row.overlaps_any(ranges) || own_row) {
                continue;
            }
            row.is_latest = false;
            new_ranges.extend(row.ranges.iter().cloned());
            predecessors.push(row.partition_index);
            let forced = owners
                .remove(&row.partition_index)
                .map_or(false, |owner| owner != partition.partition_id());
            locks.insert(
                row.partition_index,
                LockResult {
                    row: row.partition_index,
                    lock_ref: format!("{}:{}", operation_id, row.partition_index),
                    forced,
                },
            );
        }

        let mri = MriReference::new();
        let row = LedgerRow::new(mri, new_ranges, predecessors, true);
        let owned_ranges = row.ranges.clone();
        rows.push(row);
        owners.insert(mri, partition.partition_id());

        Ok(OwnershipReturn {
            operation_id,
            partition_index: mri,
            ranges: owned_ranges,
            locks,
        })
    }

    fn add_tx_digest(
        &self,
        partition: &DatabasePartition,
        digest: &StagingTable,
    ) -> MdbcResult<TxDigestId> {
        if self.fail_digest_writes.load(Ordering::Relaxed) {
            return Err(MdbcError::service("digest write rejected"));
        }
        let mri = partition
            .mri_index()
            .ok_or_else(|| MdbcError::service("partition owns no ledger row"))?;
        if self.owners.lock().get(&mri) != Some(&partition.partition_id()) {
            return Err(MdbcError::service(format!(
                "partition {} does not own row {}",
                partition.partition_id(),
                mri
            )));
        }
        self.push_digest(mri, digest)
    }

    fn relinquish(&self, partition: &DatabasePartition) -> MdbcResult<()> {
        if self.fail_relinquish.load(Ordering::Relaxed) {
            return Err(MdbcError::service("lock service refused relinquish"));
        }
        self.owners
            .lock()
            .retain(|_, owner| *owner != partition.partition_id());
        self.relinquished.lock().push(partition.partition_id());
        Ok(())
    }

    fn generate_unique_key(&self) -> Uuid {
        Uuid::new_v4()
    }
}
