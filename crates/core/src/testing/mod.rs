//! Testing utilities for mdbc
//!
//! In-memory stand-ins for the external collaborators:
//!
//! - **InMemoryLedger**: ledger rows, digests, ownership and relinquish, with
//!   failure injection
//! - **InMemoryLocalStore**: applies digests to an in-memory table model and
//!   records apply order and foreign-key toggles
//!
//! # Example
//!
//! ```ignore
//! use mdbc_core::testing::{InMemoryLedger, InMemoryLocalStore};
//!
//! let ledger = InMemoryLedger::new();
//! let row = ledger.append_row(vec![range.clone()], vec![]);
//! ledger.push_digest(row, &staging)?;
//! ```

mod ledger;
mod local_store;

pub use ledger::InMemoryLedger;
pub use local_store::{InMemoryConnector, InMemoryLocalStore, InMemorySession};
