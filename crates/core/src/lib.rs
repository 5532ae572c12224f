//! Core types and traits for mdbc
//!
//! This crate defines the foundational types used throughout the system:
//! - Range: table-granularity keyspace partition
//! - DatabasePartition: ownership unit bound to one connection
//! - LedgerRow, TxDigestId, AppliedMark: the ownership history and its digests
//! - StagingTable: row-level write set of one transaction
//! - MdbcError: error type hierarchy
//! - Traits: collaborator interfaces (LedgerService, LocalStore)
//! - Classification helpers for statements handed over by the SQL proxy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod ledger;
pub mod partition;
pub mod staging;
pub mod testing;
pub mod traits;
pub mod types;

pub use classify::{
    operation_type, ranges_for_tables, SqlOperationType, StatementClassifier, TableOperations,
};
pub use error::{MdbcError, MdbcResult};
pub use ledger::{
    extract_rows_for_range, AppliedMark, CheckpointLocations, LedgerRow, LockResult,
    OwnershipReturn, TxDigestId,
};
pub use partition::DatabasePartition;
pub use staging::{OperationKind, RowOperation, StagingTable};
pub use traits::{LedgerService, LocalStore, LocalStoreConnector};
pub use types::{ConnectionId, MriReference, OperationId, PartitionId, Range};
