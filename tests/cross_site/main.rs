//! Cross-site integration tests
//!
//! Several sites share one ledger, each with its own local replica. Ownership
//! of a range moves between sites, and every move must leave the new owner's
//! replica with every committed digest applied exactly once, in order.

#[path = "../common/mod.rs"]
mod common;

mod ownership_handoff;
mod warmup;
