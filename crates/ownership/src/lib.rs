//! Range ownership checkpoint and replay for mdbc
//!
//! When a site takes ownership of a range, its local store must first catch up
//! with every digest other sites committed for that range. This crate provides:
//!
//! - `Dag`: replay graph over ledger rows, ordered ancestors-first
//! - `AppliedMap`: per-range low-water-marks of what has been replayed
//! - `OwnershipClocks`: per-operation ownership timeouts
//! - `OwnershipAndCheckpoint`: checkpoint (blocking, under ownership) and
//!   warm-up (optimistic, ahead of ownership)
//!
//! # Example
//!
//! ```ignore
//! let engine = OwnershipAndCheckpoint::new(store.get_checkpoint_locations()?, timeout);
//! engine.start_ownership_timeout_clock(op);
//! let report = engine.checkpoint(&*ledger, &*store, &ranges, &ownership.locks, op)?;
//! engine.stop_ownership_timeout_clock(op);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod applied;
pub mod checkpoint;
pub mod clock;
pub mod dag;
pub mod warmup;

pub use applied::AppliedMap;
pub use checkpoint::{
    CheckpointReport, OwnershipAndCheckpoint, OwnershipPhase, DEFAULT_WARMUP_MAX_RESTARTS,
};
pub use clock::OwnershipClocks;
pub use dag::{Dag, DagNode, NodeId};
pub use warmup::WarmupOutcome;
