//! Task record and per-task configuration.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::state::{StateTransition, TaskStatus};
use crate::error::TaskError;

/// Cap on the per-task transition history.
const MAX_TRANSITIONS: usize = 200;

/// Whether the worker may run tools without asking first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    Auto,
    Manual,
}

/// Secrets handed to the worker for one task.
///
/// Never serialized, redacted in `Debug`.
#[derive(Clone, Default)]
pub struct Credentials(Arc<HashMap<String, SecretString>>);

impl Credentials {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.expose_secret())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.0.keys().collect();
        names.sort();
        f.debug_struct("Credentials")
            .field("names", &names)
            .finish_non_exhaustive()
    }
}

impl FromIterator<(String, String)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(Arc::new(
            iter.into_iter()
                .map(|(k, v)| (k, SecretString::from(v)))
                .collect(),
        ))
    }
}

fn deserialize_credentials<'de, D>(deserializer: D) -> Result<Option<Credentials>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, String>>::deserialize(deserializer)?;
    Ok(raw.map(|map| map.into_iter().collect()))
}

/// Options recognized on task submission. Unset fields fall back to
/// worker or relay defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_mode: Option<ApprovalMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    #[serde(default, skip_serializing, deserialize_with = "deserialize_credentials")]
    pub credentials: Option<Credentials>,
}

impl TaskConfig {
    /// Turn budget, falling back to `default` when unset or zero.
    pub fn max_turns_or(&self, default: u32) -> u32 {
        self.max_turns.filter(|n| *n > 0).unwrap_or(default)
    }

    pub fn approval_mode(&self) -> ApprovalMode {
        self.approval_mode.unwrap_or_default()
    }
}

/// The one outstanding question of a task waiting for an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestion {
    pub question_id: Uuid,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub asked_at: DateTime<Utc>,
}

impl PendingQuestion {
    pub fn new(question: impl Into<String>, context: Option<String>) -> Self {
        Self {
            question_id: Uuid::new_v4(),
            question: question.into(),
            context,
            asked_at: Utc::now(),
        }
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { result: String },
    Failed { error: String },
    Cancelled { reason: Option<String> },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Error,
            Self::Cancelled { .. } => TaskStatus::Cancelled,
        }
    }
}

/// A mutation applied atomically to one task record.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    /// Plain status change along the state machine.
    Status {
        to: TaskStatus,
        message: Option<String>,
    },
    /// Enter `waiting_for_answer` with this question outstanding.
    AwaitAnswer(PendingQuestion),
    /// Enter a terminal state, recording the result or error.
    Finish(TaskOutcome),
}

/// Authoritative state of one task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskStatus,
    pub description: String,
    pub config: TaskConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub pending_question: Option<PendingQuestion>,
    pub transitions: Vec<StateTransition>,
}

impl TaskRecord {
    /// Create a new task in `pending`.
    pub fn new(description: impl Into<String>, config: TaskConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            description: description.into(),
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            pending_question: None,
            transitions: Vec::new(),
        }
    }

    /// Apply an update, enforcing the state machine.
    pub fn apply(&mut self, update: TaskUpdate) -> Result<(), TaskError> {
        match update {
            TaskUpdate::Status { to, message } => self.transition_to(to, message),
            TaskUpdate::AwaitAnswer(question) => {
                self.transition_to(
                    TaskStatus::WaitingForAnswer,
                    Some(format!("Question {}", question.question_id)),
                )?;
                self.pending_question = Some(question);
                Ok(())
            }
            TaskUpdate::Finish(outcome) => {
                let to = outcome.status();
                match outcome {
                    TaskOutcome::Completed { result } => {
                        self.transition_to(to, None)?;
                        self.result = Some(result);
                    }
                    TaskOutcome::Failed { error } => {
                        self.transition_to(to, Some(error.clone()))?;
                        self.error = Some(error);
                    }
                    TaskOutcome::Cancelled { reason } => {
                        self.transition_to(to, reason)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Transition to a new state.
    pub fn transition_to(
        &mut self,
        new_status: TaskStatus,
        reason: Option<String>,
    ) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(new_status) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.status,
            to: new_status,
            timestamp: now,
            reason,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;

        // Only a waiting task may carry a question.
        if new_status != TaskStatus::WaitingForAnswer {
            self.pending_question = None;
        }

        match new_status {
            TaskStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            s if s.is_terminal() && self.completed_at.is_none() => {
                self.completed_at = Some(now);
            }
            _ => {}
        }

        Ok(())
    }

    pub fn has_pending_question(&self) -> bool {
        self.pending_question.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> TaskRecord {
        let mut task = TaskRecord::new("say hello", TaskConfig::default());
        task.transition_to(TaskStatus::Running, None).unwrap();
        task
    }

    #[test]
    fn new_task_is_pending() {
        let task = TaskRecord::new("say hello", TaskConfig::default());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(!task.has_pending_question());
    }

    #[test]
    fn started_at_set_once() {
        let mut task = running();
        let first = task.started_at.unwrap();
        task.apply(TaskUpdate::AwaitAnswer(PendingQuestion::new("Which file?", None)))
            .unwrap();
        task.transition_to(TaskStatus::Running, None).unwrap();
        assert_eq!(task.started_at, Some(first));
    }

    #[test]
    fn question_cleared_on_resume() {
        let mut task = running();
        task.apply(TaskUpdate::AwaitAnswer(PendingQuestion::new("Which file?", None)))
            .unwrap();
        assert_eq!(task.status, TaskStatus::WaitingForAnswer);
        assert_eq!(task.pending_question.as_ref().unwrap().question, "Which file?");

        task.transition_to(TaskStatus::Running, Some("answered".into()))
            .unwrap();
        assert!(task.pending_question.is_none());
    }

    #[test]
    fn question_cleared_on_cancel() {
        let mut task = running();
        task.apply(TaskUpdate::AwaitAnswer(PendingQuestion::new("Which file?", None)))
            .unwrap();
        task.apply(TaskUpdate::Finish(TaskOutcome::Cancelled { reason: None }))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.pending_question.is_none());
        assert!(task.result.is_none() && task.error.is_none());
    }

    #[test]
    fn finish_sets_exactly_one_of_result_or_error() {
        let mut ok = running();
        ok.apply(TaskUpdate::Finish(TaskOutcome::Completed {
            result: "hello".into(),
        }))
        .unwrap();
        assert_eq!(ok.result.as_deref(), Some("hello"));
        assert!(ok.error.is_none());
        assert!(ok.completed_at.is_some());

        let mut failed = running();
        failed
            .apply(TaskUpdate::Finish(TaskOutcome::Failed {
                error: "boom".into(),
            }))
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.result.is_none());
    }

    #[test]
    fn pending_cannot_complete() {
        let mut task = TaskRecord::new("x", TaskConfig::default());
        let err = task
            .apply(TaskUpdate::Finish(TaskOutcome::Completed {
                result: "r".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
    }

    #[test]
    fn terminal_rejects_everything() {
        let mut task = TaskRecord::new("x", TaskConfig::default());
        task.transition_to(TaskStatus::Cancelled, None).unwrap();
        let completed_at = task.completed_at;

        let err = task.transition_to(TaskStatus::Cancelled, None).unwrap_err();
        assert!(matches!(err, TaskError::AlreadyTerminal { .. }));
        assert_eq!(task.completed_at, completed_at);
    }

    #[test]
    fn transition_history_capped() {
        let mut task = running();
        for i in 0..150 {
            task.apply(TaskUpdate::AwaitAnswer(PendingQuestion::new(
                format!("q{i}"),
                None,
            )))
            .unwrap();
            task.transition_to(TaskStatus::Running, None).unwrap();
        }
        assert!(task.transitions.len() <= MAX_TRANSITIONS);
    }

    #[test]
    fn config_parses_camel_case() {
        let config: TaskConfig = serde_json::from_value(serde_json::json!({
            "model": "gpt-5",
            "maxTurns": 1,
            "approvalMode": "manual",
            "allowedTools": ["read_file"],
            "workingDirectory": "/tmp",
            "timeoutMinutes": 5,
            "credentials": {"API_KEY": "sk-123"}
        }))
        .unwrap();

        assert_eq!(config.max_turns_or(10), 1);
        assert_eq!(config.approval_mode(), ApprovalMode::Manual);
        assert_eq!(config.timeout_minutes, Some(5));
        let creds = config.credentials.as_ref().unwrap();
        assert_eq!(creds.get("API_KEY"), Some("sk-123"));
    }

    #[test]
    fn credentials_never_leak() {
        let config: TaskConfig = serde_json::from_value(serde_json::json!({
            "credentials": {"API_KEY": "sk-123"}
        }))
        .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-123"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-123"));
        assert!(debug.contains("API_KEY"));
    }

    #[test]
    fn max_turns_defaults() {
        let config = TaskConfig::default();
        assert_eq!(config.max_turns_or(7), 7);
        let zero = TaskConfig {
            max_turns: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.max_turns_or(7), 7);
        assert_eq!(config.approval_mode(), ApprovalMode::Auto);
    }
}
