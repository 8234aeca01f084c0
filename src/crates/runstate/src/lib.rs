//! Workflow state orchestration engine
//!
//! This crate turns registered node descriptors and graph templates into an
//! append-only ledger of work instances ("states"). Workers claim states
//! through a compare-and-set queue, report outputs, and the engine
//! materializes successor states, fan-out included. A background supervisor
//! reclaims expired leases and schedules retries.

pub mod api;
pub mod config;
pub mod db;
pub mod executor;
pub mod graph;
pub mod schema;
pub mod services;
pub mod version;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur inside the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed schema, template, reference or input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown namespace, graph, node or state
    #[error("Not found: {0}")]
    NotFound(String),

    /// The targeted state is no longer in the status the caller expected
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Worker-reported failure or schema-invalid output
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Lease expired before the worker reported
    #[error("Lease expired: {0}")]
    Timeout(String),

    /// Attempted a status change outside the state machine
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: StateStatus, to: StateStatus },

    /// Storage failure
    #[error(transparent)]
    Database(#[from] db::DatabaseError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(err.into())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Lifecycle status of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateStatus {
    Created,
    Queued,
    Executed,
    NextCreated,
    RetryCreated,
    Timedout,
    Errored,
    Cancelled,
    Success,
}

impl StateStatus {
    pub const ALL: [StateStatus; 9] = [
        StateStatus::Created,
        StateStatus::Queued,
        StateStatus::Executed,
        StateStatus::NextCreated,
        StateStatus::RetryCreated,
        StateStatus::Timedout,
        StateStatus::Errored,
        StateStatus::Cancelled,
        StateStatus::Success,
    ];

    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStatus::Created => "CREATED",
            StateStatus::Queued => "QUEUED",
            StateStatus::Executed => "EXECUTED",
            StateStatus::NextCreated => "NEXT_CREATED",
            StateStatus::RetryCreated => "RETRY_CREATED",
            StateStatus::Timedout => "TIMEDOUT",
            StateStatus::Errored => "ERRORED",
            StateStatus::Cancelled => "CANCELLED",
            StateStatus::Success => "SUCCESS",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: StateStatus) -> bool {
        use StateStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Created, Cancelled)
                | (Queued, Executed)
                | (Queued, Errored)
                | (Queued, Timedout)
                | (Queued, Cancelled)
                | (Executed, NextCreated)
                | (Executed, Success)
                | (Executed, Errored)
                | (Executed, Cancelled)
                | (Errored, RetryCreated)
                | (Errored, Cancelled)
                | (Timedout, RetryCreated)
                | (Timedout, Errored)
                | (Timedout, Cancelled)
        )
    }

    /// Check a transition, returning the matching error when it is illegal
    pub fn ensure_transition(&self, next: StateStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Whether this status ends a state chain.
    ///
    /// `ERRORED` is reported as terminal here; a pending retry is decided by the
    /// supervisor on the state's attempt budget, see [`db::models::State::retries_left`].
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StateStatus::Success | StateStatus::Errored | StateStatus::Cancelled
        )
    }

    /// Statuses whose work has been handed off to other states
    pub fn is_settled(&self) -> bool {
        self.is_terminal()
            || matches!(self, StateStatus::NextCreated | StateStatus::RetryCreated)
    }

    /// Whether an explicit cancellation request may target this status.
    ///
    /// An `ERRORED` state is only cancellable while a retry is still pending;
    /// use [`db::models::State::is_cancellable`] for that check.
    pub fn is_cancellable(&self) -> bool {
        self.can_transition_to(StateStatus::Cancelled)
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        StateStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| EngineError::Validation(format!("Unknown state status: {}", s)))
    }
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_storage_form() {
        for status in StateStatus::ALL {
            assert_eq!(status.as_str().parse::<StateStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<StateStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_storage_form() {
        let json = serde_json::to_string(&StateStatus::NextCreated).unwrap();
        assert_eq!(json, "\"NEXT_CREATED\"");
    }

    #[test]
    fn test_no_shortcut_from_created_to_success() {
        assert!(!StateStatus::Created.can_transition_to(StateStatus::Success));
        assert!(!StateStatus::Created.can_transition_to(StateStatus::Executed));
        assert!(StateStatus::Created
            .ensure_transition(StateStatus::Success)
            .is_err());
    }

    #[test]
    fn test_lifecycle_edges() {
        assert!(StateStatus::Created.can_transition_to(StateStatus::Queued));
        assert!(StateStatus::Queued.can_transition_to(StateStatus::Executed));
        assert!(StateStatus::Executed.can_transition_to(StateStatus::NextCreated));
        assert!(StateStatus::Executed.can_transition_to(StateStatus::Success));
        assert!(StateStatus::Queued.can_transition_to(StateStatus::Timedout));
        assert!(StateStatus::Timedout.can_transition_to(StateStatus::RetryCreated));
        assert!(StateStatus::Errored.can_transition_to(StateStatus::RetryCreated));
    }

    #[test]
    fn test_terminal_states_cannot_be_cancelled() {
        assert!(!StateStatus::Success.is_cancellable());
        assert!(!StateStatus::Cancelled.is_cancellable());
        assert!(!StateStatus::NextCreated.is_cancellable());
        assert!(!StateStatus::RetryCreated.is_cancellable());
        // Depends on the attempt budget
        assert!(StateStatus::Errored.is_cancellable());
        assert!(StateStatus::Created.is_cancellable());
        assert!(StateStatus::Queued.is_cancellable());
    }

    #[test]
    fn test_settled_statuses() {
        assert!(StateStatus::NextCreated.is_settled());
        assert!(StateStatus::RetryCreated.is_settled());
        assert!(!StateStatus::Queued.is_settled());
        assert!(!StateStatus::Timedout.is_settled());
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
