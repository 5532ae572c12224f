//! mdbc - multi-site databases acting as one logical database
//!
//! Every site keeps a full local replica. Before a connection touches a range
//! of the data, its site takes ownership of that range through the shared
//! ledger and replays every committed digest it has not yet applied. Commits
//! are applied locally and published to the ledger as digests, so the next
//! owner can replay them.
//!
//! # Quick Start
//!
//! ```ignore
//! use mdbc::{MdbcConfig, StateManager};
//!
//! let site = StateManager::open(MdbcConfig::default(), ledger, connector)?;
//! let conn = site.get_connection("client-1")?;
//! conn.execute_statement("UPDATE shop.orders SET qty = 2 WHERE id = 7", &classifier)?;
//! conn.stage(row_operation)?;
//! conn.commit()?;
//! ```
//!
//! # Architecture
//!
//! - `mdbc-core`: ranges, ledger rows, digests, and the collaborator traits
//!   (`LedgerService`, `LocalStore`, `LocalStoreConnector`)
//! - `mdbc-ownership`: the checkpoint/warm-up replay engine
//! - `mdbc-engine`: the per-site runtime (connections, digest daemon, config)

pub use mdbc_core::classify::{SqlOperationType, StatementClassifier, TableOperations};
pub use mdbc_core::error::{MdbcError, MdbcResult};
pub use mdbc_core::ledger::{
    AppliedMark, CheckpointLocations, LedgerRow, LockResult, OwnershipReturn, TxDigestId,
};
pub use mdbc_core::partition::DatabasePartition;
pub use mdbc_core::staging::{OperationKind, RowOperation, StagingTable};
pub use mdbc_core::traits::{LedgerService, LocalStore, LocalStoreConnector};
pub use mdbc_core::types::{ConnectionId, MriReference, OperationId, PartitionId, Range};
pub use mdbc_engine::{MdbcConfig, MdbcConnection, StateManager, TxProgressState};
pub use mdbc_ownership::{CheckpointReport, OwnershipAndCheckpoint, WarmupOutcome};

/// In-memory collaborators for tests and demos
pub mod testing {
    pub use mdbc_core::testing::*;
}
