//! Ownership checkpoint engine
//!
//! `OwnershipAndCheckpoint` brings the local store up to date for a set of
//! ranges by replaying the digests other sites committed to the ledger.
//!
//! ## Checkpoint
//!
//! Runs after ownership of the ranges has been acquired. Under the checkpoint
//! mutex it reads the ledger, builds a replay graph seeded with the
//! already-applied marks, disables foreign-key checks, and applies every
//! missing digest in replay order. Foreign-key checks are restored on every
//! exit path. The ownership clock of the operation is checked before each
//! digest; an expired clock aborts with `OwnershipTimeout`.
//!
//! ## Phases
//!
//! ```text
//! Started -> Checking -> Applying -> Completed
//!                 |           |----> TimedOut
//!                 |-----------+----> Failed
//! ```
//!
//! On `TimedOut` and `Failed` the operation's clock is stopped and the error is
//! returned to the caller. The mutex is released on every exit path.

use crate::applied::AppliedMap;
use crate::clock::OwnershipClocks;
use crate::dag::Dag;
use mdbc_core::error::{MdbcError, MdbcResult};
use mdbc_core::ledger::{
    extract_rows_for_range, AppliedMark, CheckpointLocations, LockResult, TxDigestId,
};
use mdbc_core::traits::{LedgerService, LocalStore};
use mdbc_core::types::{MriReference, OperationId, Range};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default bound on warm-up rebuilds before giving up for this round
pub const DEFAULT_WARMUP_MAX_RESTARTS: usize = 64;

/// Phase of an ownership operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnershipPhase {
    /// Ownership acquired, checkpoint not yet running
    Started,
    /// Reading the ledger and building the replay graph
    Checking,
    /// Replaying digests into the local store
    Applying,
    /// Every missing digest was applied
    Completed,
    /// The ownership clock expired while applying
    TimedOut,
    /// The ledger or local store returned an error
    Failed,
}

impl fmt::Display for OwnershipPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OwnershipPhase::Started => "started",
            OwnershipPhase::Checking => "checking",
            OwnershipPhase::Applying => "applying",
            OwnershipPhase::Completed => "completed",
            OwnershipPhase::TimedOut => "timed_out",
            OwnershipPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Operation the checkpoint ran for
    pub operation_id: OperationId,
    /// Final phase (always `Completed` for a returned report)
    pub phase: OwnershipPhase,
    /// Number of digests replayed
    pub digests_applied: usize,
    /// Number of ledger rows in the replay graph
    pub rows_considered: usize,
}

/// Replay engine shared by every connection of one site
pub struct OwnershipAndCheckpoint {
    checkpoint_lock: Mutex<()>,
    /// Set whenever replay state may be stale; warm-up rebuilds when it sees it
    dirty: AtomicBool,
    /// Bumped on every applied digest
    applied_epoch: AtomicU64,
    already_applied: AppliedMap,
    clocks: OwnershipClocks,
    warmup_max_restarts: usize,
}

impl Default for OwnershipAndCheckpoint {
    fn default() -> Self {
        Self::new(CheckpointLocations::new(), Duration::MAX)
    }
}

impl OwnershipAndCheckpoint {
    /// Engine seeded with persisted low-water-marks
    pub fn new(already_applied: CheckpointLocations, ownership_timeout: Duration) -> Self {
        Self {
            checkpoint_lock: Mutex::new(()),
            dirty: AtomicBool::new(true),
            applied_epoch: AtomicU64::new(0),
            already_applied: AppliedMap::from_locations(already_applied),
            clocks: OwnershipClocks::new(ownership_timeout),
            warmup_max_restarts: DEFAULT_WARMUP_MAX_RESTARTS,
        }
    }

    /// Bound the number of warm-up rebuilds per call
    pub fn with_warmup_max_restarts(mut self, max_restarts: usize) -> Self {
        self.warmup_max_restarts = max_restarts;
        self
    }

    /// Configured warm-up rebuild bound
    pub fn warmup_max_restarts(&self) -> usize {
        self.warmup_max_restarts
    }

    /// Configured ownership timeout
    pub fn ownership_timeout(&self) -> Duration {
        self.clocks.limit()
    }

    /// Start timing `operation_id`
    pub fn start_ownership_timeout_clock(&self, operation_id: OperationId) {
        self.clocks.start(operation_id);
    }

    /// Stop timing `operation_id`; unknown ids are logged and ignored
    pub fn stop_ownership_timeout_clock(&self, operation_id: OperationId) {
        self.clocks.stop(operation_id);
    }

    /// True if `operation_id` has exceeded the ownership timeout
    ///
    /// # Errors
    ///
    /// Returns `MdbcError::InvalidClock` if the clock was never started.
    pub fn timeout(&self, operation_id: OperationId) -> MdbcResult<bool> {
        self.clocks.timed_out(operation_id)
    }

    /// Number of running ownership clocks
    pub fn active_clocks(&self) -> usize {
        self.clocks.active()
    }

    /// Mark replay state stale so an in-flight warm-up rebuilds its graph
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// True if replay state has been invalidated since the last warm-up rebuild
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Last applied digest for `range`
    pub fn applied_mark(&self, range: &Range) -> Option<AppliedMark> {
        self.already_applied.get(range)
    }

    /// Every low-water-mark
    pub fn applied_locations(&self) -> CheckpointLocations {
        self.already_applied.to_locations()
    }

    /// Replay every digest `ranges` is missing
    ///
    /// The caller must have acquired ownership of `ranges` and started the
    /// clock for `operation_id`. `locks` are the distributed locks taken while
    /// acquiring ownership; they are logged, not released, here.
    ///
    /// # Errors
    ///
    /// - `OwnershipTimeout` if the clock expired with digests still to apply
    /// - `InvalidClock` if no clock was started for `operation_id`
    /// - any ledger or local-store error
    pub fn checkpoint(
        &self,
        ledger: &dyn LedgerService,
        store: &dyn LocalStore,
        ranges: &[Range],
        locks: &BTreeMap<MriReference, LockResult>,
        operation_id: OperationId,
    ) -> MdbcResult<CheckpointReport> {
        if ranges.is_empty() {
            return Ok(CheckpointReport {
                operation_id,
                phase: OwnershipPhase::Completed,
                digests_applied: 0,
                rows_considered: 0,
            });
        }

        let _guard = self.checkpoint_lock.lock();
        self.dirty.store(true, Ordering::SeqCst);
        let forced = locks.values().filter(|l| l.forced).count();
        debug!(
            target: "mdbc::checkpoint",
            %operation_id,
            phase = %OwnershipPhase::Started,
            ranges = ranges.len(),
            locks = locks.len(),
            forced,
            "Checkpoint started"
        );

        match self.replay_locked(ledger, store, ranges, operation_id) {
            Ok((digests_applied, rows_considered)) => {
                info!(
                    target: "mdbc::checkpoint",
                    %operation_id,
                    phase = %OwnershipPhase::Completed,
                    digests_applied,
                    rows_considered,
                    "Checkpoint completed"
                );
                Ok(CheckpointReport {
                    operation_id,
                    phase: OwnershipPhase::Completed,
                    digests_applied,
                    rows_considered,
                })
            }
            Err(e) => {
                let phase = if e.is_timeout() {
                    OwnershipPhase::TimedOut
                } else {
                    OwnershipPhase::Failed
                };
                self.clocks.stop(operation_id);
                warn!(
                    target: "mdbc::checkpoint",
                    %operation_id,
                    %phase,
                    error = %e,
                    "Checkpoint aborted"
                );
                Err(e)
            }
        }
    }

    /// Checking and Applying phases; requires the checkpoint mutex
    fn replay_locked(
        &self,
        ledger: &dyn LedgerService,
        store: &dyn LocalStore,
        ranges: &[Range],
        operation_id: OperationId,
    ) -> MdbcResult<(usize, usize)> {
        debug!(target: "mdbc::checkpoint", %operation_id, phase = %OwnershipPhase::Checking, "Reading ledger");
        let mut dag = self.build_dag(ledger, ranges)?;
        let rows = dag.len();

        debug!(target: "mdbc::checkpoint", %operation_id, phase = %OwnershipPhase::Applying, rows, "Replaying digests");
        let integrity = IntegrityChecksOff::disable(store)?;
        let applied = self.apply_required_changes(ledger, store, &mut dag, ranges, operation_id);
        let restored = integrity.restore();
        let applied = applied?;
        restored?;
        Ok((applied, rows))
    }

    pub(crate) fn build_dag(&self, ledger: &dyn LedgerService, ranges: &[Range]) -> MdbcResult<Dag> {
        let rows = extract_rows_for_range(&ledger.get_all_ledger_rows()?, ranges, false);
        let mut dag = Dag::build(&rows, ranges);
        dag.set_already_applied(&self.already_applied.snapshot(ranges), ranges);
        Ok(dag)
    }

    fn apply_required_changes(
        &self,
        ledger: &dyn LedgerService,
        store: &dyn LocalStore,
        dag: &mut Dag,
        ranges: &[Range],
        operation_id: OperationId,
    ) -> MdbcResult<usize> {
        let mut applied = 0;
        // Checked before each apply, so a finished replay never reports a timeout.
        let mut expired = self.clocks.timed_out(operation_id)?;
        while let Some(node) = dag.next_to_apply(ranges) {
            while let Some((digest, affected)) = dag.node_mut(node).next_not_applied_transaction(ranges)
            {
                if expired {
                    return Err(MdbcError::OwnershipTimeout { operation_id });
                }
                self.apply_digest(ledger, store, digest, &affected)?;
                applied += 1;
                expired = self.clocks.timed_out(operation_id)?;
            }
        }
        Ok(applied)
    }

    /// Fetch, apply, and record one digest; requires the checkpoint mutex
    pub(crate) fn apply_digest(
        &self,
        ledger: &dyn LedgerService,
        store: &dyn LocalStore,
        digest: TxDigestId,
        affected: &[Range],
    ) -> MdbcResult<()> {
        let staging = ledger.get_tx_digest(&digest)?;
        store.apply_tx_digest(&staging, affected)?;
        let mark = AppliedMark::from(digest);
        self.applied_epoch.fetch_add(1, Ordering::SeqCst);
        for range in affected {
            self.already_applied.record(range, mark);
            store.update_checkpoint_location(range, mark)?;
        }
        debug!(
            target: "mdbc::checkpoint",
            %digest,
            ranges = affected.len(),
            operations = staging.len(),
            "Digest applied"
        );
        Ok(())
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.checkpoint_lock.lock()
    }

    pub(crate) fn applied_epoch(&self) -> u64 {
        self.applied_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

/// Foreign-key checks disabled on a store until restored or dropped
pub(crate) struct IntegrityChecksOff<'a> {
    store: &'a dyn LocalStore,
    restored: bool,
}

impl<'a> IntegrityChecksOff<'a> {
    pub(crate) fn disable(store: &'a dyn LocalStore) -> MdbcResult<Self> {
        if let Err(e) = store.disable_foreign_key_checks() {
            // The store may have half-applied the toggle.
            if let Err(restore) = store.enable_foreign_key_checks() {
                error!(target: "mdbc::checkpoint", error = %restore, "Failed to re-enable foreign key checks");
            }
            return Err(e);
        }
        Ok(Self {
            store,
            restored: false,
        })
    }

    pub(crate) fn restore(mut self) -> MdbcResult<()> {
        self.restored = true;
        self.store.enable_foreign_key_checks()
    }
}

impl Drop for IntegrityChecksOff<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.store.enable_foreign_key_checks() {
            error!(target: "mdbc::checkpoint", error = %e, "Failed to re-enable foreign key checks");
        }
    }
}
