//! Staging tables: the digest of one committed transaction
//!
//! A `StagingTable` is the net row-level effect of one transaction. The write
//! path fills it while the transaction runs; on commit it becomes a digest in
//! the ledger, and replay hands it back to the local store.
//!
//! ## Format
//!
//! Digests are serialized using MessagePack (`rmp-serde`). Column values are
//! `serde_json::Value` so any SQL scalar survives the round trip.

use crate::error::MdbcResult;
use crate::types::Range;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of row-level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// New row
    Insert,
    /// Existing row changed
    Update,
    /// Row removed
    Delete,
}

/// One row-level change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOperation {
    /// Table (range) the row lives in
    pub table: Range,
    /// Primary-key columns identifying the row
    pub key: BTreeMap<String, Value>,
    /// Column values after the change (empty for deletes)
    pub values: BTreeMap<String, Value>,
    /// Change kind
    pub kind: OperationKind,
}

impl RowOperation {
    /// Insert of a full row
    pub fn insert(
        table: Range,
        key: BTreeMap<String, Value>,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            table,
            key,
            values,
            kind: OperationKind::Insert,
        }
    }

    /// Update of some columns of an existing row
    pub fn update(
        table: Range,
        key: BTreeMap<String, Value>,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            table,
            key,
            values,
            kind: OperationKind::Update,
        }
    }

    /// Delete of an existing row
    pub fn delete(table: Range, key: BTreeMap<String, Value>) -> Self {
        Self {
            table,
            key,
            values: BTreeMap::new(),
            kind: OperationKind::Delete,
        }
    }
}

/// Ordered row-level operations of one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingTable {
    operations: Vec<RowOperation>,
}

impl StagingTable {
    /// Create an empty staging table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation
    pub fn add_operation(&mut self, op: RowOperation) {
        self.operations.push(op);
    }

    /// Operations in staging order
    pub fn operations(&self) -> &[RowOperation] {
        &self.operations
    }

    /// Operations touching any of `ranges`, in staging order
    pub fn operations_for<'a>(
        &'a self,
        ranges: &'a [Range],
    ) -> impl Iterator<Item = &'a RowOperation> + 'a {
        self.operations
            .iter()
            .filter(move |op| ranges.iter().any(|r| r.overlaps(&op.table)))
    }

    /// Distinct ranges touched by this transaction
    pub fn ranges(&self) -> Vec<Range> {
        let mut ranges: Vec<Range> = self.operations.iter().map(|op| op.table.clone()).collect();
        ranges.sort();
        ranges.dedup();
        ranges
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True if nothing was staged
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Drop all staged operations
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> MdbcResult<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> MdbcResult<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
