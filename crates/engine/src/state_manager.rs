//! Site-wide connection and partition manager
//!
//! `StateManager` is the single owner of the replay engine, the transaction
//! progress tracker, the digest stage and the digest daemon of one site. Client
//! connections are opened, reused and closed through it; each one is bound to
//! a fresh `DatabasePartition`.
//!
//! ## Lifecycle
//!
//! 1. `open` reads the persisted checkpoint locations through a short-lived
//!    `init` connection, seeds the engine with them, and starts the daemon.
//! 2. Connections come and go through `get_connection` / `close_connection`.
//! 3. `shutdown` flushes pending digests, closes every connection, and stops
//!    the daemon. Dropping the manager stops the daemon as well.

use crate::config::MdbcConfig;
use crate::connection::{ConnectionContext, MdbcConnection};
use crate::digest_daemon::{DigestDaemon, DigestStage, FlushStats};
use crate::progress::TxCommitProgress;
use dashmap::DashMap;
use mdbc_core::error::{MdbcError, MdbcResult};
use mdbc_core::partition::DatabasePartition;
use mdbc_core::traits::{LedgerService, LocalStoreConnector};
use mdbc_core::types::{ConnectionId, PartitionId, Range};
use mdbc_ownership::{OwnershipAndCheckpoint, WarmupOutcome};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Connection id used to read checkpoint locations at startup
pub const INIT_CONNECTION_ID: &str = "init";

/// Owner of every connection and partition of one site
pub struct StateManager {
    config: MdbcConfig,
    ledger: Arc<dyn LedgerService>,
    connector: Arc<dyn LocalStoreConnector>,
    engine: Arc<OwnershipAndCheckpoint>,
    progress: Arc<TxCommitProgress>,
    stage: Arc<DigestStage>,
    connections: DashMap<ConnectionId, Arc<MdbcConnection>>,
    warmup_ranges: Mutex<Option<BTreeSet<Range>>>,
    eventual_ranges: Mutex<BTreeSet<Range>>,
    daemon: DigestDaemon,
}

impl StateManager {
    /// Start a site
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid configuration, the connector's error if
    /// the `init` connection cannot be opened, and the local store's error if
    /// checkpoint locations cannot be read.
    pub fn open(
        config: MdbcConfig,
        ledger: Arc<dyn LedgerService>,
        connector: Arc<dyn LocalStoreConnector>,
    ) -> MdbcResult<Self> {
        config.validate()?;
        let warmup_ranges = config.warmup_range_set()?;
        let eventual_ranges = config.eventual_range_set()?;

        let init = connector.connect()?;
        let locations = init.get_checkpoint_locations();
        if let Err(e) = init.close() {
            warn!(
                target: "mdbc::state",
                connection = INIT_CONNECTION_ID,
                error = %e,
                "Failed to close local store connection"
            );
        }
        let locations = locations?;
        info!(
            target: "mdbc::state",
            ranges = locations.len(),
            "Loaded checkpoint locations"
        );

        let engine = Arc::new(
            OwnershipAndCheckpoint::new(locations, config.ownership_timeout())
                .with_warmup_max_restarts(config.warmup_max_restarts),
        );
        let stage = Arc::new(DigestStage::new());
        let daemon = DigestDaemon::start(
            Arc::clone(&stage),
            Arc::clone(&ledger),
            config.tx_daemon_sleep(),
        )?;

        Ok(Self {
            config,
            ledger,
            connector,
            engine,
            progress: Arc::new(TxCommitProgress::new()),
            stage,
            connections: DashMap::new(),
            warmup_ranges: Mutex::new(warmup_ranges),
            eventual_ranges: Mutex::new(eventual_ranges),
            daemon,
        })
    }

    /// Configuration the site was opened with
    pub fn config(&self) -> &MdbcConfig {
        &self.config
    }

    /// Shared replay engine
    pub fn engine(&self) -> &Arc<OwnershipAndCheckpoint> {
        &self.engine
    }

    /// Shared transaction progress tracker
    pub fn progress(&self) -> &Arc<TxCommitProgress> {
        &self.progress
    }

    /// Digests committed locally but not yet persisted in the ledger
    pub fn pending_digests(&self) -> usize {
        self.stage.len()
    }

    /// Open a connection bound to a fresh partition
    ///
    /// An existing connection with the same id is closed first.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionUnavailable` if the local store cannot be reached.
    pub fn open_connection(&self, id: impl Into<ConnectionId>) -> MdbcResult<Arc<MdbcConnection>> {
        let id = id.into();
        let store = self.connector.connect().map_err(|e| {
            error!(
                target: "mdbc::state",
                connection = %id,
                error = %e,
                "Local store connection was not created"
            );
            MdbcError::ConnectionUnavailable(id.clone())
        })?;

        let partition =
            DatabasePartition::new(PartitionId::from_uuid(self.ledger.generate_unique_key()));
        let partition_id = partition.partition_id();
        let connection = Arc::new(MdbcConnection::new(
            id.clone(),
            store,
            partition,
            self.context(),
        ));

        self.progress.create_new_transaction_tracker(&id);
        if let Some(previous) = self.connections.insert(id.clone(), Arc::clone(&connection)) {
            self.release(&previous);
        }
        info!(target: "mdbc::state", connection = %id, partition = %partition_id, "Connection created");
        Ok(connection)
    }

    /// Existing connection for `id`, or a new one
    ///
    /// Reusing a connection whose transaction is complete resets its progress
    /// so a new transaction can start.
    pub fn get_connection(&self, id: impl Into<ConnectionId>) -> MdbcResult<Arc<MdbcConnection>> {
        let id = id.into();
        if let Some(existing) = self.connections.get(&id).map(|c| Arc::clone(c.value())) {
            if self.progress.is_complete(&id) {
                self.progress.reinitialize(&id);
            }
            return Ok(existing);
        }
        self.open_connection(id)
    }

    /// Close a connection and relinquish its partition; never fails
    pub fn close_connection(&self, id: &ConnectionId) {
        self.progress.delete(id);
        if let Some((_, connection)) = self.connections.remove(id) {
            self.release(&connection);
            info!(target: "mdbc::state", connection = %id, "Connection closed");
        }
    }

    fn release(&self, connection: &MdbcConnection) {
        connection.close();
        let partition = connection.partition();
        if partition.mri_index().is_none() {
            return;
        }
        // Digests can only be persisted while the partition still owns its row.
        self.flush_digests();
        if let Err(e) = self.ledger.relinquish(&partition) {
            warn!(
                target: "mdbc::state",
                connection = %connection.id(),
                partition = %partition.partition_id(),
                error = %e,
                "Relinquish failed, the lock will have to be reclaimed by force"
            );
        }
    }

    /// Close every connection
    pub fn release_all_partitions(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.close_connection(id);
        }
    }

    /// Partitions bound to open connections
    pub fn partitions(&self) -> Vec<(ConnectionId, DatabasePartition)> {
        let mut partitions: Vec<(ConnectionId, DatabasePartition)> = self
            .connections
            .iter()
            .map(|e| (e.key().clone(), e.value().partition()))
            .collect();
        partitions.sort_by(|a, b| a.0.cmp(&b.0));
        partitions
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Replace the fixed warm-up set; `None` falls back to every local range
    pub fn set_warmup_ranges(&self, ranges: Option<BTreeSet<Range>>) {
        *self.warmup_ranges.lock() = ranges;
    }

    /// Replace the eventually-consistent set
    pub fn set_eventual_ranges(&self, ranges: BTreeSet<Range>) {
        *self.eventual_ranges.lock() = ranges;
    }

    /// Copy of the eventually-consistent set
    pub fn get_eventual_ranges(&self) -> BTreeSet<Range> {
        self.eventual_ranges.lock().clone()
    }

    /// Ranges to keep warm
    ///
    /// The fixed warm-up set if one is configured, otherwise every range known
    /// to the local store minus the eventually-consistent ones.
    ///
    /// # Errors
    ///
    /// Returns the local store's error if its range set cannot be read.
    pub fn get_ranges_to_warmup(&self) -> MdbcResult<BTreeSet<Range>> {
        if let Some(fixed) = self.warmup_ranges.lock().clone() {
            return Ok(fixed);
        }

        let store = self.connector.connect()?;
        let all = store.get_sql_range_set();
        if let Err(e) = store.close() {
            warn!(target: "mdbc::state", error = %e, "Failed to close local store connection");
        }
        let eventual = self.get_eventual_ranges();
        Ok(all?.into_iter().filter(|r| !eventual.contains(r)).collect())
    }

    /// Ranges owned by any open connection of this site
    pub fn owned_ranges(&self) -> BTreeSet<Range> {
        self.connections
            .iter()
            .flat_map(|e| e.value().partition().ranges().clone())
            .collect()
    }

    /// Warm up `get_ranges_to_warmup()` on a dedicated local-store session
    ///
    /// Ranges an open connection owns are skipped: their local state already
    /// includes commits the ledger may not have yet.
    ///
    /// # Errors
    ///
    /// Returns ledger and local-store errors from the warm-up.
    pub fn run_warmup(&self) -> MdbcResult<WarmupOutcome> {
        let owned = self.owned_ranges();
        let ranges: Vec<Range> = self
            .get_ranges_to_warmup()?
            .into_iter()
            .filter(|r| !owned.contains(r))
            .collect();
        let store = self.connector.connect()?;
        let outcome = self
            .engine
            .warmup(self.ledger.as_ref(), store.as_ref(), &ranges);
        if let Err(e) = store.close() {
            warn!(target: "mdbc::state", error = %e, "Failed to close local store connection");
        }
        outcome
    }

    /// Push pending digests to the ledger now
    pub fn flush_digests(&self) -> FlushStats {
        self.stage.flush(self.ledger.as_ref())
    }

    /// Flush pending digests, release every partition, and stop the daemon
    pub fn shutdown(&self) {
        let stats = self.flush_digests();
        self.release_all_partitions();
        self.daemon.shutdown();
        info!(
            target: "mdbc::state",
            flushed = stats.pushed,
            unflushed = stats.retained,
            "Site shut down"
        );
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            ledger: Arc::clone(&self.ledger),
            engine: Arc::clone(&self.engine),
            progress: Arc::clone(&self.progress),
            stage: Arc::clone(&self.stage),
            write_locks_only: self.config.write_locks_only,
            default_database: self.config.default_database.clone(),
        }
    }
}
