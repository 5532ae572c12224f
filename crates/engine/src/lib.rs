//! Site runtime for mdbc
//!
//! This crate wires the lower layers into one running site:
//! - StateManager: connections, partitions, warm-up, shutdown
//! - MdbcConnection: ownership before use, staging, commit
//! - TxCommitProgress: per-connection transaction state
//! - DigestStage / DigestDaemon: pushing committed digests to the ledger
//! - MdbcConfig: `mdbc.toml`
//!
//! Replay itself lives in `mdbc-ownership`; the collaborator interfaces live in
//! `mdbc-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod digest_daemon;
pub mod progress;
pub mod state_manager;

pub use config::{MdbcConfig, CONFIG_FILE_NAME};
pub use connection::MdbcConnection;
pub use digest_daemon::{DigestDaemon, DigestStage, FlushStats};
pub use progress::{TxCommitProgress, TxProgressState};
pub use state_manager::{StateManager, INIT_CONNECTION_ID};
