//! Error taxonomy for the migration engine

use std::time::Duration;
use thiserror::Error;

/// Result type alias for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors raised by the resolver, waiter, evaluator and lifecycle controller.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// Zone or instance resolution failed after a full fleet scan
    #[error("not found: {0}")]
    NotFound(String),

    /// Forecast or request data has the wrong shape
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A status wait exceeded its budget
    #[error("{resource} did not reach {expected} within {timeout:?} (last status: {last_status})")]
    OperationTimeout {
        resource: String,
        expected: String,
        last_status: String,
        timeout: Duration,
    },

    /// An operation was attempted in the wrong lifecycle state
    #[error("instance {instance_id} is {actual}, expected {expected}")]
    InvalidState {
        instance_id: String,
        expected: String,
        actual: String,
    },

    #[error("snapshot failed for {instance_id}: {reason}")]
    Snapshot { instance_id: String, reason: String },

    #[error("instance create failed for {instance_id}: {reason}")]
    InstanceCreate { instance_id: String, reason: String },

    /// The compute control plane rejected a call or an operation finished with an error
    #[error("compute api error: {0}")]
    Compute(String),

    /// The forecast collaborator returned an error object
    #[error("forecast unavailable: {0}")]
    Forecast(String),

    /// The orchestrator's outer deadline fired before the step finished
    #[error("migration deadline exceeded during {step}")]
    DeadlineExceeded { step: String },

    /// Another migration already holds the lease for this instance
    #[error("migration already in progress for {0}")]
    MigrationInProgress(String),
}

impl ExecutorError {
    /// Short machine-readable kind, used as an error code in API responses
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::NotFound(_) => "not_found",
            ExecutorError::InvalidInput(_) => "invalid_input",
            ExecutorError::OperationTimeout { .. } => "operation_timeout",
            ExecutorError::InvalidState { .. } => "invalid_state",
            ExecutorError::Snapshot { .. } => "snapshot_error",
            ExecutorError::InstanceCreate { .. } => "instance_create_error",
            ExecutorError::Compute(_) => "compute_error",
            ExecutorError::Forecast(_) => "forecast_error",
            ExecutorError::DeadlineExceeded { .. } => "deadline_exceeded",
            ExecutorError::MigrationInProgress(_) => "migration_in_progress",
        }
    }
}

impl From<reqwest::Error> for ExecutorError {
    fn from(err: reqwest::Error) -> Self {
        ExecutorError::Compute(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_carries_context() {
        let err = ExecutorError::OperationTimeout {
            resource: "instance web-1".to_string(),
            expected: "TERMINATED".to_string(),
            last_status: "STOPPING".to_string(),
            timeout: Duration::from_secs(300),
        };

        let message = err.to_string();
        assert!(message.contains("web-1"));
        assert!(message.contains("TERMINATED"));
        assert!(message.contains("STOPPING"));
        assert_eq!(err.kind(), "operation_timeout");
    }
}
