//! Engine error types.

use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;
use crate::types::{OperationState, OperationType};

/// Errors surfaced by a reconciliation attempt.
///
/// Every variant is terminal for the attempt; the caller decides whether to
/// retry the whole operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed user input.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The remote operation reported failure. The description is verbatim.
    #[error("{operation} failed: {description}")]
    TerminalFailure {
        operation: OperationType,
        description: String,
    },

    /// Time budget exhausted while the operation was still running. The
    /// remote state is unknown and must be re-read.
    #[error("timed out after {timeout:?} waiting for {operation} of {id}")]
    Timeout {
        operation: OperationType,
        id: String,
        timeout: Duration,
    },

    /// Too many consecutive not-found responses while polling.
    #[error("{id} not found after {checks} consecutive checks during {operation}")]
    GivenUp {
        operation: OperationType,
        id: String,
        checks: u32,
    },

    /// The caller aborted the wait.
    #[error("cancelled while waiting for {operation} of {id}")]
    Cancelled { operation: OperationType, id: String },

    /// Identity string does not decode into the expected parts.
    #[error("malformed identity {id:?}: {reason}")]
    MalformedIdentity { id: String, reason: String },

    /// The operation reported a state the wait did not expect.
    #[error("unexpected state {state} during {operation} of {id}")]
    UnexpectedState {
        operation: OperationType,
        id: String,
        state: OperationState,
    },

    /// The change touches fields that cannot be applied in place.
    #[error("change to {fields:?} requires replacing the resource")]
    ReplacementRequired { fields: Vec<&'static str> },

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl EngineError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Client(e) if e.is_not_found())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
