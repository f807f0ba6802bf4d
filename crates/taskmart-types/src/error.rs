//! Error types for Taskmart domain rules

use thiserror::Error;

use crate::{JobId, JobStatus, RequestId, RequestStatus};

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, MarketError>;

/// Domain rule violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    // ========================================================================
    // State machine
    // ========================================================================

    /// The record was not in the state the caller observed
    #[error("Job {job_id} state conflict: expected {expected}, found {actual}")]
    StateConflict {
        job_id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The requested transition is not in the transition table
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The request was already moved out of `pending`
    #[error("Request {request_id} already {actual}")]
    RequestConflict {
        request_id: RequestId,
        actual: RequestStatus,
    },

    // ========================================================================
    // Lookups
    // ========================================================================

    #[error("Job {job_id} not found")]
    JobNotFound { job_id: JobId },

    #[error("Request {request_id} not found")]
    RequestNotFound { request_id: RequestId },

    // ========================================================================
    // Authorization / validation
    // ========================================================================

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Validation failed: {reason}")]
    Validation { reason: String },
}

impl MarketError {
    /// Whether this error signals an optimistic precondition failure
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StateConflict { .. } | Self::RequestConflict { .. }
        )
    }
}
