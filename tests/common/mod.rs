//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use mdbc::testing::{InMemoryConnector, InMemoryLedger, InMemoryLocalStore};
use mdbc::{
    LedgerService, LocalStoreConnector, MdbcConfig, Range, RowOperation, SqlOperationType,
    StateManager, TableOperations,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Once};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Config with the digest daemon effectively idle, so tests flush explicitly.
pub fn quiet_config() -> MdbcConfig {
    MdbcConfig {
        tx_daemon_sleep_s: 3600,
        ..MdbcConfig::default()
    }
}

// ============================================================================
// TestSite - one site attached to a shared ledger
// ============================================================================

/// One running site with its own local store.
pub struct TestSite {
    pub manager: StateManager,
    pub connector: Arc<InMemoryConnector>,
}

impl TestSite {
    /// Open a site on `ledger` with an empty local store.
    pub fn open(ledger: &Arc<InMemoryLedger>) -> Self {
        Self::open_with(ledger, quiet_config(), InMemoryLocalStore::new())
    }

    /// Open a site on `ledger` with the given config and local store.
    pub fn open_with(
        ledger: &Arc<InMemoryLedger>,
        config: MdbcConfig,
        store: InMemoryLocalStore,
    ) -> Self {
        init_tracing();
        let connector = Arc::new(InMemoryConnector::new(Arc::new(store)));
        let manager = StateManager::open(
            config,
            Arc::clone(ledger) as Arc<dyn LedgerService>,
            Arc::clone(&connector) as Arc<dyn LocalStoreConnector>,
        )
        .expect("site opens");
        Self { manager, connector }
    }

    /// Restart a site on an existing local replica.
    pub fn reopen(ledger: &Arc<InMemoryLedger>, store: Arc<InMemoryLocalStore>) -> Self {
        init_tracing();
        let connector = Arc::new(InMemoryConnector::new(store));
        let manager = StateManager::open(
            quiet_config(),
            Arc::clone(ledger) as Arc<dyn LedgerService>,
            Arc::clone(&connector) as Arc<dyn LocalStoreConnector>,
        )
        .expect("site reopens");
        Self { manager, connector }
    }

    /// The site's local store.
    pub fn store(&self) -> &Arc<InMemoryLocalStore> {
        self.connector.store()
    }

    /// Own `table`, stage one row per `(id, qty)`, commit, and flush.
    pub fn write_rows(&self, connection: &str, table: &str, rows: &[(i64, i64)]) {
        let conn = self.manager.get_connection(connection).expect("connection");
        conn.execute(&writes(table)).expect("ownership");
        let range = Range::parse(table).expect("range");
        for (id, qty) in rows {
            conn.stage(upsert(&range, *id, *qty)).expect("stage");
        }
        conn.commit().expect("commit");
        self.manager.flush_digests();
    }

    /// `qty` of row `id` in the local replica of `range`.
    pub fn qty(&self, range: &Range, id: i64) -> Option<Value> {
        self.store()
            .row(range, &key(id))
            .and_then(|row| row.get("qty").cloned())
    }
}

// ============================================================================
// Statement and row builders
// ============================================================================

/// Classification of a statement that writes `table`.
pub fn writes(table: &str) -> TableOperations {
    BTreeMap::from([(
        table.to_string(),
        vec![SqlOperationType::Read, SqlOperationType::Write],
    )])
}

/// Classification of a statement that only reads `table`.
pub fn reads(table: &str) -> TableOperations {
    BTreeMap::from([(table.to_string(), vec![SqlOperationType::Read])])
}

/// Primary key `{"id": id}`.
pub fn key(id: i64) -> BTreeMap<String, Value> {
    BTreeMap::from([("id".to_string(), json!(id))])
}

/// Full-row write of `{"id": id, "qty": qty}`.
pub fn upsert(range: &Range, id: i64, qty: i64) -> RowOperation {
    RowOperation::insert(
        range.clone(),
        key(id),
        BTreeMap::from([("qty".to_string(), json!(qty))]),
    )
}
