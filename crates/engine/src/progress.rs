//! Per-connection transaction progress
//!
//! Tracks where each connection is in its current transaction so a handle can
//! be reused for a fresh transaction once the previous one finished.
//!
//! ```text
//! NotStarted -> InProgress -> Complete
//!      ^                          |
//!      +------ reinitialize ------+
//! ```

use dashmap::DashMap;
use mdbc_core::types::ConnectionId;
use tracing::trace;

/// Progress of the current transaction on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxProgressState {
    /// No statement has run yet
    NotStarted,
    /// Statements are being staged
    InProgress,
    /// Committed or rolled back
    Complete,
}

/// Transaction progress of every open connection
#[derive(Debug, Default)]
pub struct TxCommitProgress {
    transactions: DashMap<ConnectionId, TxProgressState>,
}

impl TxCommitProgress {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id` in `NotStarted`, replacing any previous entry
    pub fn create_new_transaction_tracker(&self, id: &ConnectionId) {
        trace!(target: "mdbc::state", connection = %id, "Transaction tracker created");
        self.transactions
            .insert(id.clone(), TxProgressState::NotStarted);
    }

    /// True if the tracked transaction has committed or rolled back
    pub fn is_complete(&self, id: &ConnectionId) -> bool {
        self.state(id) == Some(TxProgressState::Complete)
    }

    /// Reset a tracked connection to `NotStarted`; unknown ids are ignored
    pub fn reinitialize(&self, id: &ConnectionId) {
        if let Some(mut state) = self.transactions.get_mut(id) {
            *state = TxProgressState::NotStarted;
        }
    }

    /// Mark a tracked connection as staging statements
    pub fn set_in_progress(&self, id: &ConnectionId) {
        if let Some(mut state) = self.transactions.get_mut(id) {
            *state = TxProgressState::InProgress;
        }
    }

    /// Mark a tracked connection's transaction as finished
    pub fn set_complete(&self, id: &ConnectionId) {
        if let Some(mut state) = self.transactions.get_mut(id) {
            *state = TxProgressState::Complete;
        }
    }

    /// Stop tracking `id`
    pub fn delete(&self, id: &ConnectionId) {
        self.transactions.remove(id);
    }

    /// Current state, if tracked
    pub fn state(&self, id: &ConnectionId) -> Option<TxProgressState> {
        self.transactions.get(id).map(|s| *s.value())
    }

    /// Number of tracked connections
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// True if no connection is tracked
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
