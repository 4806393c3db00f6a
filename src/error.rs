//! Error types for Agent Relay.

use uuid::Uuid;

use crate::task::TaskStatus;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task registry and coordination errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: TaskStatus },

    #[error("Task {id} has no pending question")]
    NoPendingQuestion { id: Uuid },

    #[error("Task {id} already has a pending question")]
    QuestionPending { id: Uuid },

    #[error("Task {id} was cancelled")]
    Cancelled { id: Uuid },
}

impl TaskError {
    /// True for errors that mean "the caller referred to nothing actionable"
    /// (unknown task, terminal task, no question to answer).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::AlreadyTerminal { .. } | Self::NoPendingQuestion { .. }
        )
    }
}

/// Errors surfaced by a worker's event source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker failed: {0}")]
    Failed(String),

    #[error("Worker turn was cancelled")]
    Cancelled,

    #[error("Worker loop detected: {0}")]
    LoopDetected(String),

    #[error("Worker stream error: {0}")]
    Stream(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        let id = Uuid::new_v4();
        assert!(TaskError::NotFound { id }.is_not_found());
        assert!(TaskError::NoPendingQuestion { id }.is_not_found());
        assert!(
            TaskError::AlreadyTerminal {
                id,
                status: TaskStatus::Cancelled
            }
            .is_not_found()
        );
        assert!(
            !TaskError::InvalidTransition {
                id,
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            }
            .is_not_found()
        );
    }

    #[test]
    fn error_messages() {
        let id = Uuid::nil();
        let err = TaskError::InvalidTransition {
            id,
            from: TaskStatus::Pending,
            to: TaskStatus::WaitingForAnswer,
        };
        assert_eq!(
            err.to_string(),
            format!("Task {id} cannot transition from pending to waiting_for_answer")
        );
    }
}
