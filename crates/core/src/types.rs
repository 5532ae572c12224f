//! Core types for mdbc
//!
//! This module defines the foundational identifiers:
//! - PartitionId: Ownership unit bound to one client connection
//! - MriReference: Index of one ledger (range-information) row
//! - OperationId: One in-flight ownership/checkpoint operation
//! - ConnectionId: Logical client connection
//! - Range: Table-granularity keyspace partition

use crate::error::{MdbcError, MdbcResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier using UUID v4
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string representation
            ///
            /// Returns None if the string is not a valid UUID.
            pub fn from_string(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            /// The underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a database partition (the unit of ownership)
    PartitionId
);

uuid_id!(
    /// Reference to one ledger row, by its partition index
    MriReference
);

uuid_id!(
    /// Identifier of one ownership/checkpoint operation
    ///
    /// Each operation owns exactly one ownership clock while it is in flight.
    OperationId
);

/// Identifier of a logical client connection
///
/// Connection ids come from the SQL proxy layer, so they are free-form strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A table-granularity keyspace partition
///
/// Ranges are value types: two ranges are equal when namespace and name match.
/// An empty namespace means the namespace is implied by context.
///
/// Format: "namespace.name", or just "name" when the namespace is implied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    namespace: String,
    name: String,
}

impl Range {
    /// Create a range in an explicit namespace
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a range whose namespace is implied
    pub fn table(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    /// Parse a `"namespace.name"` or `"name"` string
    ///
    /// # Errors
    /// Returns `InvalidRange` for empty input, empty parts, or more than one '.'.
    pub fn parse(s: &str) -> MdbcResult<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::table(*name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::new(*ns, *name)),
            _ => Err(MdbcError::InvalidRange(format!(
                "'{}' must be 'name' or 'namespace.name'",
                s
            ))),
        }
    }

    /// Namespace, empty when implied
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if both ranges cover the same keyspace
    ///
    /// Ranges are coarse (one table each), so overlap is exact equality.
    pub fn overlaps(&self, other: &Range) -> bool {
        self == other
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}
