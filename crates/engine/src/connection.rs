//! Connection-scoped handle
//!
//! An `MdbcConnection` binds one client connection to one local-store session
//! and one `DatabasePartition`. Before a statement touches a range, the
//! connection makes sure its partition owns that range, which runs a checkpoint
//! through the shared `OwnershipAndCheckpoint` engine. Committed write sets are
//! applied locally and handed to the digest stage for the ledger.

use crate::digest_daemon::{DigestStage, SharedPartition};
use crate::progress::{TxCommitProgress, TxProgressState};
use mdbc_core::classify::{
    operation_type, ranges_for_tables, SqlOperationType, StatementClassifier, TableOperations,
};
use mdbc_core::error::{MdbcError, MdbcResult};
use mdbc_core::partition::DatabasePartition;
use mdbc_core::staging::{RowOperation, StagingTable};
use mdbc_core::traits::{LedgerService, LocalStore};
use mdbc_core::types::{ConnectionId, OperationId, Range};
use mdbc_ownership::{CheckpointReport, OwnershipAndCheckpoint};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared services a connection is created with
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) ledger: Arc<dyn LedgerService>,
    pub(crate) engine: Arc<OwnershipAndCheckpoint>,
    pub(crate) progress: Arc<TxCommitProgress>,
    pub(crate) stage: Arc<DigestStage>,
    pub(crate) write_locks_only: bool,
    pub(crate) default_database: Option<String>,
}

/// One client connection and the partition it owns
pub struct MdbcConnection {
    id: ConnectionId,
    store: Arc<dyn LocalStore>,
    partition: SharedPartition,
    staging: Mutex<StagingTable>,
    ctx: ConnectionContext,
}

impl MdbcConnection {
    pub(crate) fn new(
        id: ConnectionId,
        store: Arc<dyn LocalStore>,
        partition: DatabasePartition,
        ctx: ConnectionContext,
    ) -> Self {
        Self {
            id,
            store,
            partition: Arc::new(Mutex::new(partition)),
            staging: Mutex::new(StagingTable::new()),
            ctx,
        }
    }

    /// Connection id
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Snapshot of the partition bound to this connection
    pub fn partition(&self) -> DatabasePartition {
        self.partition.lock().clone()
    }

    /// Local-store session of this connection
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Progress of the current transaction
    pub fn progress(&self) -> Option<TxProgressState> {
        self.ctx.progress.state(&self.id)
    }

    /// Operations staged in the current transaction
    pub fn pending_operations(&self) -> usize {
        self.staging.lock().len()
    }

    /// Make sure this connection's partition owns `ranges`
    ///
    /// Acquires ownership through the ledger service and checkpoints the
    /// ranges under a fresh ownership clock. The ledger is asked every time,
    /// since another site may have taken the partition's row. Returns `None`
    /// when the ledger confirms the partition's current row still covers
    /// every range.
    ///
    /// Digests this site has queued are flushed first, so they land on the
    /// row they were committed under rather than the one being issued.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors and checkpoint errors, including
    /// `OwnershipTimeout`. The partition is left unchanged on error.
    pub fn own_ranges(&self, ranges: &[Range]) -> MdbcResult<Option<CheckpointReport>> {
        if ranges.is_empty() {
            return Ok(None);
        }
        if !self.ctx.stage.is_empty() {
            self.ctx.stage.flush(self.ctx.ledger.as_ref());
        }
        let mut partition = self.partition.lock();

        let engine = &self.ctx.engine;
        let operation_id = OperationId::from_uuid(self.ctx.ledger.generate_unique_key());
        engine.start_ownership_timeout_clock(operation_id);

        let ownership = match self.ctx.ledger.own(ranges, &partition, operation_id) {
            Ok(ownership) => ownership,
            Err(e) => {
                engine.stop_ownership_timeout_clock(operation_id);
                return Err(e);
            }
        };
        if partition.mri_index() == Some(ownership.partition_index)
            && ownership.locks.is_empty()
            && partition.owns_all(ranges)
        {
            engine.stop_ownership_timeout_clock(operation_id);
            return Ok(None);
        }

        let report = engine.checkpoint(
            self.ctx.ledger.as_ref(),
            self.store.as_ref(),
            &ownership.ranges,
            &ownership.locks,
            operation_id,
        )?;
        engine.stop_ownership_timeout_clock(operation_id);

        partition.update_from_ownership(&ownership);
        info!(
            target: "mdbc::state",
            connection = %self.id,
            %operation_id,
            row = %ownership.partition_index,
            ranges = ownership.ranges.len(),
            replayed = report.digests_applied,
            "Ranges owned"
        );
        Ok(Some(report))
    }

    /// Prepare for a classified statement
    ///
    /// Resolves the statement's ranges, owns them, and marks the transaction
    /// in progress. Returns the lock mode the statement needs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` for unresolvable table names, plus any error
    /// from `own_ranges`.
    pub fn execute(&self, tables: &TableOperations) -> MdbcResult<SqlOperationType> {
        let ranges: Vec<Range> =
            ranges_for_tables(self.ctx.default_database.as_deref(), tables)?
                .into_iter()
                .collect();
        let op_type = operation_type(tables, self.ctx.write_locks_only);
        debug!(
            target: "mdbc::state",
            connection = %self.id,
            ranges = ranges.len(),
            op_type = ?op_type,
            "Statement classified"
        );
        self.own_ranges(&ranges)?;
        self.ctx.progress.set_in_progress(&self.id);
        Ok(op_type)
    }

    /// Classify `sql` with `classifier`, then `execute` it
    pub fn execute_statement(
        &self,
        sql: &str,
        classifier: &dyn StatementClassifier,
    ) -> MdbcResult<SqlOperationType> {
        let tables = classifier.classify(sql)?;
        self.execute(&tables)
    }

    /// Stage one row write in the current transaction
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if the partition does not own the row's table.
    pub fn stage(&self, op: RowOperation) -> MdbcResult<()> {
        if !self.partition.lock().owns_all(std::slice::from_ref(&op.table)) {
            return Err(MdbcError::InvalidRange(format!(
                "range {} is not owned by connection {}",
                op.table, self.id
            )));
        }
        self.staging.lock().add_operation(op);
        self.ctx.progress.set_in_progress(&self.id);
        Ok(())
    }

    /// Commit the current transaction
    ///
    /// Applies the staged write set to the local store and queues it as a
    /// digest for the ledger.
    ///
    /// # Errors
    ///
    /// Returns the local-store error if the write set cannot be applied; the
    /// staged operations are kept so the commit can be retried.
    pub fn commit(&self) -> MdbcResult<()> {
        let mut staging = self.staging.lock();
        if !staging.is_empty() {
            let ranges = staging.ranges();
            self.store.apply_tx_digest(&staging, &ranges)?;
            let digest = std::mem::take(&mut *staging);
            debug!(
                target: "mdbc::state",
                connection = %self.id,
                operations = digest.len(),
                "Transaction committed"
            );
            self.ctx.stage.push(Arc::clone(&self.partition), digest);
        }
        self.ctx.progress.set_complete(&self.id);
        Ok(())
    }

    /// Drop the staged operations of the current transaction
    pub fn rollback(&self) {
        self.staging.lock().clear();
        self.ctx.progress.set_complete(&self.id);
    }

    /// Close the local-store session; never fails
    pub fn close(&self) {
        if self.store.is_closed() {
            return;
        }
        if let Err(e) = self.store.close() {
            warn!(
                target: "mdbc::state",
                connection = %self.id,
                error = %e,
                "Failed to close local store connection"
            );
        }
    }
}
