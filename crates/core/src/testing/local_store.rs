//! In-memory local store
//!
//! Maintains tables as `range -> row key -> columns` and records every applied
//! digest so tests can assert replay order. Foreign-key toggles are tracked as
//! a history, and applies that happen while enforcement is on are counted.

use crate::error::{MdbcError, MdbcResult};
use crate::ledger::{AppliedMark, CheckpointLocations};
use crate::staging::{OperationKind, StagingTable};
use crate::traits::{LocalStore, LocalStoreConnector};
use crate::types::Range;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Row = BTreeMap<String, Value>;

/// In-memory `LocalStore`
pub struct InMemoryLocalStore {
    tables: Mutex<BTreeMap<Range, BTreeMap<String, Row>>>,
    known_ranges: Mutex<BTreeSet<Range>>,
    checkpoints: Mutex<CheckpointLocations>,
    applied: Mutex<Vec<StagingTable>>,
    fk_enabled: AtomicBool,
    fk_history: Mutex<Vec<bool>>,
    applies_with_fk_enabled: AtomicUsize,
    /// One-shot failure when the applied count reaches this value
    fail_apply_at: Mutex<Option<usize>>,
    apply_delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            known_ranges: Mutex::new(BTreeSet::new()),
            checkpoints: Mutex::new(CheckpointLocations::new()),
            applied: Mutex::new(Vec::new()),
            fk_enabled: AtomicBool::new(true),
            fk_history: Mutex::new(Vec::new()),
            applies_with_fk_enabled: AtomicUsize::new(0),
            fail_apply_at: Mutex::new(None),
            apply_delay: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

impl InMemoryLocalStore {
    /// Create an empty store with foreign-key checks enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already knows `ranges` (as if the tables existed)
    pub fn with_ranges(ranges: impl IntoIterator<Item = Range>) -> Self {
        let store = Self::new();
        store.known_ranges.lock().extend(ranges);
        store
    }

    /// Seed checkpoint locations, as if left by a previous run
    pub fn with_checkpoints(self, locations: CheckpointLocations) -> Self {
        *self.checkpoints.lock() = locations;
        self
    }

    /// Columns of one row, looked up by its key columns
    pub fn row(&self, range: &Range, key: &Row) -> Option<Row> {
        let encoded = encode_key(key).ok()?;
        self.tables.lock().get(range)?.get(&encoded).cloned()
    }

    /// Number of rows in one table
    pub fn row_count(&self, range: &Range) -> usize {
        self.tables.lock().get(range).map_or(0, |t| t.len())
    }

    /// Every applied digest, in apply order
    pub fn applied_digests(&self) -> Vec<StagingTable> {
        self.applied.lock().clone()
    }

    /// Current foreign-key enforcement setting
    pub fn foreign_keys_enabled(&self) -> bool {
        self.fk_enabled.load(Ordering::SeqCst)
    }

    /// Every foreign-key toggle, in order (`true` = enabled)
    pub fn foreign_key_history(&self) -> Vec<bool> {
        self.fk_history.lock().clone()
    }

    /// Number of digests applied while enforcement was on
    pub fn applies_with_foreign_keys_enabled(&self) -> usize {
        self.applies_with_fk_enabled.load(Ordering::SeqCst)
    }

    /// Fail the apply that would become the `n`-th applied digest (0-based)
    pub fn fail_apply_at(&self, n: usize) {
        *self.fail_apply_at.lock() = Some(n);
    }

    /// Sleep this long inside every apply
    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock() = Some(delay);
    }

    fn set_foreign_keys(&self, enabled: bool) {
        self.fk_enabled.store(enabled, Ordering::SeqCst);
        self.fk_history.lock().push(enabled);
    }
}

fn encode_key(key: &Row) -> MdbcResult<String> {
    serde_json::to_string(key).map_err(|e| MdbcError::Codec(e.to_string()))
}

impl LocalStore for InMemoryLocalStore {
    fn apply_tx_digest(&self, digest: &StagingTable, ranges: &[Range]) -> MdbcResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MdbcError::service("local store is closed"));
        }
        let delay = *self.apply_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut applied = self.applied.lock();
        {
            let mut fail_at = self.fail_apply_at.lock();
            if *fail_at == Some(applied.len()) {
                *fail_at = None;
                return Err(MdbcError::service("injected apply failure"));
            }
        }
        if self.foreign_keys_enabled() {
            self.applies_with_fk_enabled.fetch_add(1, Ordering::SeqCst);
        }

        let mut tables = self.tables.lock();
        let mut known = self.known_ranges.lock();
        for op in digest.operations_for(ranges) {
            known.insert(op.table.clone());
            let table = tables.entry(op.table.clone()).or_default();
            let key = encode_key(&op.key)?;
            match op.kind {
                OperationKind::Insert => {
                    let mut row = op.key.clone();
                    row.extend(op.values.clone());
                    table.insert(key, row);
                }
                OperationKind::Update => {
                    let row = table.entry(key).or_insert_with(|| op.key.clone());
                    row.extend(op.values.clone());
                }
                OperationKind::Delete => {
                    table.remove(&key);
                }
            }
        }
        applied.push(digest.clone());
        Ok(())
    }

    fn enable_foreign_key_checks(&self) -> MdbcResult<()> {
        self.set_foreign_keys(true);
        Ok(())
    }

    fn disable_foreign_key_checks(&self) -> MdbcResult<()> {
        self.set_foreign_keys(false);
        Ok(())
    }

    fn update_checkpoint_location(&self, range: &Range, mark: AppliedMark) -> MdbcResult<()> {
        self.checkpoints.lock().insert(range.clone(), mark);
        Ok(())
    }

    fn get_checkpoint_locations(&self) -> MdbcResult<CheckpointLocations> {
        Ok(self.checkpoints.lock().clone())
    }

    fn get_sql_range_set(&self) -> MdbcResult<BTreeSet<Range>> {
        Ok(self.known_ranges.lock().clone())
    }

    fn close(&self) -> MdbcResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One connection to a shared `InMemoryLocalStore`
///
/// Closing a session never closes the underlying store.
pub struct InMemorySession {
    store: Arc<InMemoryLocalStore>,
    closed: AtomicBool,
    fail_close: bool,
}

impl LocalStore for InMemorySession {
    fn apply_tx_digest(&self, digest: &StagingTable, ranges: &[Range]) -> MdbcResult<()> {
        if self.is_closed() {
            return Err(MdbcError::service("session is closed"));
        }
        self.store.apply_tx_digest(digest, ranges)
    }

    fn enable_foreign_key_checks(&self) -> MdbcResult<()> {
        self.store.enable_foreign_key_checks()
    }

    fn disable_foreign_key_checks(&self) -> MdbcResult<()> {
        self.store.disable_foreign_key_checks()
    }

    fn update_checkpoint_location(&self, range: &Range, mark: AppliedMark) -> MdbcResult<()> {
        self.store.update_checkpoint_location(range, mark)
    }

    fn get_checkpoint_locations(&self) -> MdbcResult<CheckpointLocations> {
        self.store.get_checkpoint_locations()
    }

    fn get_sql_range_set(&self) -> MdbcResult<BTreeSet<Range>> {
        self.store.get_sql_range_set()
    }

    fn close(&self) -> MdbcResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(MdbcError::service("error while closing session"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector handing out sessions on one shared in-memory store
pub struct InMemoryConnector {
    store: Arc<InMemoryLocalStore>,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    opened: AtomicUsize,
}

impl InMemoryConnector {
    /// Connector for `store`
    pub fn new(store: Arc<InMemoryLocalStore>) -> Self {
        Self {
            store,
            fail_connect: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
        }
    }

    /// The shared store
    pub fn store(&self) -> &Arc<InMemoryLocalStore> {
        &self.store
    }

    /// Make `connect` fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make sessions opened from now on fail on close
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl LocalStoreConnector for InMemoryConnector {
    fn connect(&self) -> MdbcResult<Arc<dyn LocalStore>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MdbcError::service("local store refused connection"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySession {
            store: Arc::clone(&self.store),
            closed: AtomicBool::new(false),
            fail_close: self.fail_close.load(Ordering::SeqCst),
        }))
    }
}
