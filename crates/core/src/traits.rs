//! Collaborator traits
//!
//! The ownership engine talks to two external systems through these traits:
//!
//! - `LedgerService`: the distributed log/lock service holding ledger rows and
//!   digests. Reads of ledger rows must be at least sequentially consistent
//!   with writes from any site; replay ordering depends on it.
//! - `LocalStore`: the local relational engine that materializes replayed
//!   writes. `LocalStoreConnector` opens one per client connection.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync).

use crate::error::MdbcResult;
use crate::ledger::{AppliedMark, CheckpointLocations, LedgerRow, OwnershipReturn, TxDigestId};
use crate::partition::DatabasePartition;
use crate::staging::StagingTable;
use crate::types::{OperationId, Range};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Distributed log/lock service
pub trait LedgerService: Send + Sync {
    /// All ledger rows, in ledger order
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached.
    fn get_all_ledger_rows(&self) -> MdbcResult<Vec<LedgerRow>>;

    /// Fetch one committed digest
    ///
    /// # Errors
    ///
    /// Returns an error if the digest is missing or cannot be decoded.
    fn get_tx_digest(&self, id: &TxDigestId) -> MdbcResult<StagingTable>;

    /// Acquire ownership of `ranges` for `partition`
    ///
    /// Appends a new latest row superseding the current rows for those ranges.
    /// Fencing and forced reclamation are the service's concern.
    fn own(
        &self,
        ranges: &[Range],
        partition: &DatabasePartition,
        operation_id: OperationId,
    ) -> MdbcResult<OwnershipReturn>;

    /// Persist a committed digest under the partition's current row
    fn add_tx_digest(
        &self,
        partition: &DatabasePartition,
        digest: &StagingTable,
    ) -> MdbcResult<TxDigestId>;

    /// Release the distributed locks held by `partition`
    fn relinquish(&self, partition: &DatabasePartition) -> MdbcResult<()>;

    /// Fresh unique key (partition ids, operation ids)
    fn generate_unique_key(&self) -> Uuid;
}

/// Local relational store
pub trait LocalStore: Send + Sync {
    /// Apply the operations of `digest` that touch `ranges`
    fn apply_tx_digest(&self, digest: &StagingTable, ranges: &[Range]) -> MdbcResult<()>;

    /// Turn referential-integrity enforcement on (store-wide setting)
    fn enable_foreign_key_checks(&self) -> MdbcResult<()>;

    /// Turn referential-integrity enforcement off (store-wide setting)
    fn disable_foreign_key_checks(&self) -> MdbcResult<()>;

    /// Durably record the low-water-mark of `range`
    fn update_checkpoint_location(&self, range: &Range, mark: AppliedMark) -> MdbcResult<()>;

    /// Low-water-marks recorded before the last restart
    fn get_checkpoint_locations(&self) -> MdbcResult<CheckpointLocations>;

    /// Every range (table) known to the local store
    fn get_sql_range_set(&self) -> MdbcResult<BTreeSet<Range>>;

    /// Close this connection
    fn close(&self) -> MdbcResult<()>;

    /// True once `close` has been called
    fn is_closed(&self) -> bool;
}

/// Opens local-store connections
pub trait LocalStoreConnector: Send + Sync {
    /// Open a new connection to the local store
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn connect(&self) -> MdbcResult<Arc<dyn LocalStore>>;
}
