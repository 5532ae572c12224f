//! Statement classification helpers
//!
//! Parsing SQL is the proxy layer's job. It hands the core a map from table
//! name to the operations a statement performs on it; these helpers turn that
//! map into the ranges to own and the lock mode to request.

use crate::error::{MdbcError, MdbcResult};
use crate::types::Range;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Access mode of a statement, and of the lock it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlOperationType {
    /// Read-only access
    Read,
    /// Any mutation
    Write,
}

/// Table name to the operations a statement performs on it
pub type TableOperations = BTreeMap<String, Vec<SqlOperationType>>;

/// External SQL classifier
///
/// Implemented by the statement proxy layer, not by this crate.
pub trait StatementClassifier: Send + Sync {
    /// Classify one SQL statement
    fn classify(&self, sql: &str) -> MdbcResult<TableOperations>;
}

/// Ranges touched by a classified statement
///
/// Table names must be `"db.table"` or, when `default_database` is given,
/// a bare `"table"` that is qualified with it.
///
/// # Errors
/// Returns `InvalidRange` for names with more than one '.', or bare names
/// without a default database.
pub fn ranges_for_tables(
    default_database: Option<&str>,
    tables: &TableOperations,
) -> MdbcResult<BTreeSet<Range>> {
    let mut ranges = BTreeSet::new();
    for table in tables.keys() {
        let parts: Vec<&str> = table.split('.').collect();
        let range = match (parts.as_slice(), default_database) {
            ([_, _], _) => Range::parse(table)?,
            ([name], Some(db)) => Range::new(db, *name),
            _ => {
                return Err(MdbcError::InvalidRange(format!(
                    "table '{}' must have at most one '.' and a database when unqualified",
                    table
                )))
            }
        };
        ranges.insert(range);
    }
    Ok(ranges)
}

/// Lock mode a statement needs
///
/// `Write` if any table sees a non-read operation. With `write_locks_only`
/// every statement requests a write lock.
pub fn operation_type(tables: &TableOperations, write_locks_only: bool) -> SqlOperationType {
    if write_locks_only {
        return SqlOperationType::Write;
    }
    let any_write = tables
        .values()
        .flatten()
        .any(|op| *op != SqlOperationType::Read);
    if any_write {
        SqlOperationType::Write
    } else {
        SqlOperationType::Read
    }
}
