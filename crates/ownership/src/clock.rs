//! Ownership timeout clocks
//!
//! A clock is started when an ownership operation begins and checked between
//! digest applies during checkpoint. Clocks are keyed by operation id and
//! independent of each other.

use dashmap::DashMap;
use mdbc_core::error::{MdbcError, MdbcResult};
use mdbc_core::types::OperationId;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Start times of in-flight ownership operations
#[derive(Debug)]
pub struct OwnershipClocks {
    started: DashMap<OperationId, Instant>,
    limit: Duration,
}

impl OwnershipClocks {
    /// Clocks that time out after `limit`
    pub fn new(limit: Duration) -> Self {
        Self {
            started: DashMap::new(),
            limit,
        }
    }

    /// Configured limit
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Record `now` as the start of `operation_id`, replacing any earlier start
    pub fn start(&self, operation_id: OperationId) {
        trace!(target: "mdbc::checkpoint", %operation_id, "Ownership clock started");
        self.started.insert(operation_id, Instant::now());
    }

    /// Forget `operation_id`; returns false if no clock was running
    pub fn stop(&self, operation_id: OperationId) -> bool {
        if self.started.remove(&operation_id).is_some() {
            trace!(target: "mdbc::checkpoint", %operation_id, "Ownership clock stopped");
            true
        } else {
            warn!(
                target: "mdbc::checkpoint",
                %operation_id,
                "Stopping an ownership clock that was never started"
            );
            false
        }
    }

    /// True if `operation_id` has been running longer than the limit
    ///
    /// # Errors
    ///
    /// Returns `MdbcError::InvalidClock` if no clock was started for the id.
    pub fn timed_out(&self, operation_id: OperationId) -> MdbcResult<bool> {
        let started = self
            .started
            .get(&operation_id)
            .map(|s| *s.value())
            .ok_or(MdbcError::InvalidClock { operation_id })?;
        Ok(started.elapsed() > self.limit)
    }

    /// True if a clock is running for `operation_id`
    pub fn is_running(&self, operation_id: OperationId) -> bool {
        self.started.contains_key(&operation_id)
    }

    /// Number of running clocks
    pub fn active(&self) -> usize {
        self.started.len()
    }
}
