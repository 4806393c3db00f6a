//! Task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task was accepted but the driver has not started the worker yet.
    Pending,
    /// The driver is consuming the worker's event stream.
    Running,
    /// The worker is blocked on a question only the caller can answer.
    WaitingForAnswer,
    /// The worker finished and produced a result.
    Completed,
    /// The worker failed.
    Error,
    /// Cancellation was requested before the task finished.
    Cancelled,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // From Pending
            (Pending, Running) | (Pending, Cancelled) |
            // From Running
            (Running, WaitingForAnswer) | (Running, Completed) |
            (Running, Error) | (Running, Cancelled) |
            // From WaitingForAnswer
            (WaitingForAnswer, Running) | (WaitingForAnswer, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Check if the task is active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingForAnswer => "waiting_for_answer",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: TaskStatus,
    /// New state.
    pub to: TaskStatus,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition.
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::WaitingForAnswer,
        TaskStatus::Completed,
        TaskStatus::Error,
        TaskStatus::Cancelled,
    ];

    #[test]
    fn state_transitions_valid() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::WaitingForAnswer));
        assert!(TaskStatus::WaitingForAnswer.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Error));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::WaitingForAnswer.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::WaitingForAnswer));
        assert!(!TaskStatus::WaitingForAnswer.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn every_active_state_can_be_cancelled() {
        for from in ALL.iter().filter(|s| s.is_active()) {
            assert!(from.can_transition_to(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn status_serde_matches_display() {
        for status in ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
