//! Digest staging and the background flush daemon
//!
//! Committed write sets are queued in a `DigestStage` and pushed to the ledger
//! service by a dedicated thread. Pushes happen in commit order per partition;
//! a failed push keeps that digest, and every later digest of the same
//! partition, queued for the next cycle.
//!
//! Queued digests hold the connection's partition handle, not a copy, so a
//! push always targets the row the partition owns at flush time.

use mdbc_core::error::{MdbcError, MdbcResult};
use mdbc_core::partition::DatabasePartition;
use mdbc_core::staging::StagingTable;
use mdbc_core::traits::LedgerService;
use mdbc_core::types::PartitionId;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Partition shared between a connection and the digests it queued
pub type SharedPartition = Arc<Mutex<DatabasePartition>>;

struct PendingDigest {
    partition: SharedPartition,
    digest: StagingTable,
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Digests accepted by the ledger service
    pub pushed: usize,
    /// Digests left queued
    pub retained: usize,
}

/// Committed digests not yet persisted in the ledger
#[derive(Default)]
pub struct DigestStage {
    pending: Mutex<VecDeque<PendingDigest>>,
    /// Serializes flushes so per-partition order holds across threads
    flush_lock: Mutex<()>,
}

impl DigestStage {
    /// Empty stage
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a committed digest for `partition`
    pub fn push(&self, partition: SharedPartition, digest: StagingTable) {
        self.pending
            .lock()
            .push_back(PendingDigest { partition, digest });
    }

    /// Number of queued digests
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Push every queued digest through `ledger`
    ///
    /// Failures are logged and the affected digests stay queued.
    pub fn flush(&self, ledger: &dyn LedgerService) -> FlushStats {
        let _flush = self.flush_lock.lock();
        let batch: Vec<PendingDigest> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            return FlushStats::default();
        }

        let mut stats = FlushStats::default();
        let mut blocked: BTreeSet<PartitionId> = BTreeSet::new();
        let mut retained = Vec::new();
        for pending in batch {
            let partition = pending.partition.lock().clone();
            let partition_id = partition.partition_id();
            if blocked.contains(&partition_id) {
                retained.push(pending);
                continue;
            }
            match ledger.add_tx_digest(&partition, &pending.digest) {
                Ok(id) => {
                    debug!(target: "mdbc::daemon", digest = %id, partition = %partition_id, "Digest persisted");
                    stats.pushed += 1;
                }
                Err(e) => {
                    warn!(
                        target: "mdbc::daemon",
                        partition = %partition_id,
                        error = %e,
                        "Failed to persist digest, will retry"
                    );
                    blocked.insert(partition_id);
                    retained.push(pending);
                }
            }
        }

        stats.retained = retained.len();
        if !retained.is_empty() {
            // Retained digests are older than anything queued meanwhile.
            let mut pending = self.pending.lock();
            for digest in retained.into_iter().rev() {
                pending.push_front(digest);
            }
        }
        stats
    }
}

struct DaemonInner {
    stage: Arc<DigestStage>,
    ledger: Arc<dyn LedgerService>,
    interval: Duration,
    shutdown: AtomicBool,
    sleep_lock: Mutex<()>,
    wake: Condvar,
    cycles: AtomicU64,
}

/// Background thread flushing a `DigestStage` on an interval
pub struct DigestDaemon {
    inner: Arc<DaemonInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DigestDaemon {
    /// Spawn the daemon thread (`mdbc-tx-daemon`)
    ///
    /// # Errors
    ///
    /// Returns `MdbcError::Io` if the thread cannot be spawned.
    pub fn start(
        stage: Arc<DigestStage>,
        ledger: Arc<dyn LedgerService>,
        interval: Duration,
    ) -> MdbcResult<Self> {
        let inner = Arc::new(DaemonInner {
            stage,
            ledger,
            interval,
            shutdown: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            wake: Condvar::new(),
            cycles: AtomicU64::new(0),
        });

        let worker = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("mdbc-tx-daemon".to_string())
            .spawn(move || daemon_loop(&worker))
            .map_err(MdbcError::Io)?;
        info!(target: "mdbc::daemon", ?interval, "Digest daemon started");

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Completed flush cycles
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Acquire)
    }

    /// Wake the daemon for an early flush
    pub fn wake(&self) {
        let _sleep = self.inner.sleep_lock.lock();
        self.inner.wake.notify_all();
    }

    /// True until `shutdown` has been called
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stop the thread and wait for it; safe to call more than once
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Lock before notifying: the daemon checks the flag under this lock
        // before sleeping, so the wake-up cannot be lost.
        {
            let _sleep = self.inner.sleep_lock.lock();
            self.inner.wake.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!(target: "mdbc::daemon", "Digest daemon thread panicked");
            } else {
                info!(target: "mdbc::daemon", "Digest daemon stopped");
            }
        }
    }
}

impl Drop for DigestDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn daemon_loop(inner: &DaemonInner) {
    loop {
        {
            let mut sleep = inner.sleep_lock.lock();
            if !inner.shutdown.load(Ordering::Acquire) {
                inner.wake.wait_for(&mut sleep, inner.interval);
            }
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let stats = inner.stage.flush(inner.ledger.as_ref());
        if stats.pushed > 0 || stats.retained > 0 {
            debug!(
                target: "mdbc::daemon",
                pushed = stats.pushed,
                retained = stats.retained,
                "Digest flush cycle"
            );
        }
        inner.cycles.fetch_add(1, Ordering::Release);
    }
}
