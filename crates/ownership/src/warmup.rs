//! Background warm-up
//!
//! Warm-up replays digests for ranges this site does not own yet, so that a
//! later checkpoint has little left to do. It runs optimistically: the replay
//! graph is built without the checkpoint mutex, and each digest is applied
//! under the mutex only if no checkpoint ran in between. When one did, the
//! graph is rebuilt from a fresh ledger read.
//!
//! ```text
//! Checking --(graph built)--> Applying --(digest applied)--> Applying
//!     ^                           |
//!     +------(invalidated)--------+--(nothing left)--> Completed
//! ```
//!
//! Applies made by another warm-up also invalidate the graph: every applied
//! digest bumps an epoch, and a step only proceeds if the epoch still matches
//! the one its graph was built against.
//!
//! Rebuilds are bounded. A warm-up that keeps being invalidated gives up with
//! `WarmupOutcome::Starved` and is simply retried on the next round.

use crate::checkpoint::{IntegrityChecksOff, OwnershipAndCheckpoint};
use crate::dag::Dag;
use mdbc_core::error::MdbcResult;
use mdbc_core::traits::{LedgerService, LocalStore};
use mdbc_core::types::Range;
use tracing::{debug, info, warn};

/// Result of one warm-up call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Every digest known at the last rebuild was applied
    Completed {
        /// Digests applied by this call
        digests_applied: usize,
        /// Graph rebuilds caused by concurrent checkpoints
        restarts: usize,
    },
    /// Gave up after too many rebuilds
    Starved {
        /// Digests applied before giving up
        digests_applied: usize,
        /// Graph rebuilds caused by concurrent checkpoints
        restarts: usize,
    },
}

impl WarmupOutcome {
    /// Digests applied by this call
    pub fn digests_applied(&self) -> usize {
        match self {
            WarmupOutcome::Completed { digests_applied, .. }
            | WarmupOutcome::Starved { digests_applied, .. } => *digests_applied,
        }
    }

    /// True if the warm-up ran to completion
    pub fn is_completed(&self) -> bool {
        matches!(self, WarmupOutcome::Completed { .. })
    }
}

enum WarmupState {
    Checking,
    Applying { dag: Dag, epoch: u64 },
}

enum Step {
    Applied,
    Invalidated,
    Exhausted,
}

impl OwnershipAndCheckpoint {
    /// Replay digests for `ranges` ahead of ownership
    ///
    /// # Errors
    ///
    /// Returns ledger and local-store errors. Being starved by concurrent
    /// checkpoints is not an error.
    pub fn warmup(
        &self,
        ledger: &dyn LedgerService,
        store: &dyn LocalStore,
        ranges: &[Range],
    ) -> MdbcResult<WarmupOutcome> {
        let mut digests_applied = 0;
        let mut restarts = 0;
        if ranges.is_empty() {
            return Ok(WarmupOutcome::Completed {
                digests_applied,
                restarts,
            });
        }

        let mut state = WarmupState::Checking;
        loop {
            state = match state {
                WarmupState::Checking => {
                    if restarts > self.warmup_max_restarts() {
                        warn!(
                            target: "mdbc::warmup",
                            restarts,
                            digests_applied,
                            "Warm-up starved by concurrent checkpoints"
                        );
                        return Ok(WarmupOutcome::Starved {
                            digests_applied,
                            restarts,
                        });
                    }
                    self.clear_dirty();
                    let epoch = self.applied_epoch();
                    let dag = self.build_dag(ledger, ranges)?;
                    debug!(target: "mdbc::warmup", rows = dag.len(), restarts, "Warm-up graph built");
                    WarmupState::Applying { dag, epoch }
                }
                WarmupState::Applying { mut dag, mut epoch } => match self.warmup_step(
                    ledger, store, &mut dag, &mut epoch, ranges,
                )? {
                    Step::Applied => {
                        digests_applied += 1;
                        WarmupState::Applying { dag, epoch }
                    }
                    Step::Invalidated => {
                        restarts += 1;
                        WarmupState::Checking
                    }
                    Step::Exhausted => {
                        info!(
                            target: "mdbc::warmup",
                            ranges = ranges.len(),
                            digests_applied,
                            restarts,
                            "Warm-up completed"
                        );
                        return Ok(WarmupOutcome::Completed {
                            digests_applied,
                            restarts,
                        });
                    }
                },
            };
        }
    }

    /// Apply at most one digest under the checkpoint mutex
    fn warmup_step(
        &self,
        ledger: &dyn LedgerService,
        store: &dyn LocalStore,
        dag: &mut Dag,
        epoch: &mut u64,
        ranges: &[Range],
    ) -> MdbcResult<Step> {
        let Some(node) = dag.next_to_apply(ranges) else {
            return Ok(Step::Exhausted);
        };

        let _guard = self.lock();
        if self.is_dirty() || self.applied_epoch() != *epoch {
            return Ok(Step::Invalidated);
        }
        let Some((digest, affected)) = dag.node_mut(node).next_not_applied_transaction(ranges) else {
            return Ok(Step::Exhausted);
        };

        let integrity = IntegrityChecksOff::disable(store)?;
        let applied = self.apply_digest(ledger, store, digest, &affected);
        let restored = integrity.restore();
        applied?;
        restored?;
        *epoch = self.applied_epoch();
        Ok(Step::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdbc_core::staging::StagingTable;
    use mdbc_core::testing::{InMemoryLedger, InMemoryLocalStore};

    fn r(name: &str) -> Range {
        Range::new("db", name)
    }

    #[test]
    fn test_warmup_empty_ranges() {
        let engine = OwnershipAndCheckpoint::default();
        let outcome = engine
            .warmup(&InMemoryLedger::new(), &InMemoryLocalStore::new(), &[])
            .unwrap();
        assert_eq!(outcome.digests_applied(), 0);
        assert!(outcome.is_completed());
    }

    #[test]
    fn test_warmup_applies_everything_and_clears_dirty() {
        let engine = OwnershipAndCheckpoint::default();
        let ledger = InMemoryLedger::new();
        let store = InMemoryLocalStore::new();
        let a = r("a");
        let mri = ledger.append_row(vec![a.clone()], vec![]);
        for _ in 0..3 {
            ledger.push_digest(mri, &StagingTable::new()).unwrap();
        }

        let outcome = engine.warmup(&ledger, &store, &[a.clone()]).unwrap();
        assert_eq!(
            outcome,
            WarmupOutcome::Completed {
                digests_applied: 3,
                restarts: 0
            }
        );
        assert!(!engine.is_dirty());
        assert_eq!(engine.applied_mark(&a).map(|m| m.index), Some(2));
        // One disable/enable pair per digest.
        assert_eq!(store.foreign_key_history().len(), 6);
        assert!(store.foreign_keys_enabled());
    }

    #[test]
    fn test_warmup_is_idempotent() {
        let engine = OwnershipAndCheckpoint::default();
        let ledger = InMemoryLedger::new();
        let store = InMemoryLocalStore::new();
        let a = r("a");
        let mri = ledger.append_row(vec![a.clone()], vec![]);
        ledger.push_digest(mri, &StagingTable::new()).unwrap();

        engine.warmup(&ledger, &store, &[a.clone()]).unwrap();
        let second = engine.warmup(&ledger, &store, &[a]).unwrap();
        assert_eq!(second.digests_applied(), 0);
        assert_eq!(store.applied_digests().len(), 1);
    }

    #[test]
    fn test_warmup_apply_failure_restores_checks() {
        let engine = OwnershipAndCheckpoint::default();
        let ledger = InMemoryLedger::new();
        let store = InMemoryLocalStore::new();
        let a = r("a");
        let mri = ledger.append_row(vec![a.clone()], vec![]);
        ledger.push_digest(mri, &StagingTable::new()).unwrap();
        store.fail_apply_at(0);

        assert!(engine.warmup(&ledger, &store, &[a]).is_err());
        assert!(store.foreign_keys_enabled());
    }
}
