//! Wire events — the closed set of event kinds a task's stream carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::TaskStatus;

/// Stable tag describing why an `error` event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    WorkerError,
    Cancelled,
    LoopDetected,
}

/// Kind-specific payload of a [`TaskEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    /// Worker reasoning.
    Thought { content: String },
    /// Incremental response text.
    Content { text: String },
    /// The worker requested a tool invocation.
    ToolCall {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    /// A tool invocation finished.
    ToolResult {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        result: serde_json::Value,
        success: bool,
    },
    /// The task is blocked until the caller answers.
    Question {
        question_id: Uuid,
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Final result of the task.
    Completed { result: String },
    /// The worker failed, was cancelled, or looped.
    Error { error: String, reason: ErrorReason },
    /// Task status changed.
    Status {
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl EventKind {
    /// SSE event name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Question { .. } => "question",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Status { .. } => "status",
        }
    }
}

/// One entry of a task's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: Uuid,
    /// Position in the task's log, assigned on append.
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TaskEvent {
    pub fn new(task_id: Uuid, kind: EventKind) -> Self {
        Self {
            task_id,
            seq: 0,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn status(task_id: Uuid, status: TaskStatus, message: Option<String>) -> Self {
        Self::new(task_id, EventKind::Status { status, message })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// True if this is the `status` event of a terminal transition.
    pub fn is_terminal_status(&self) -> bool {
        matches!(&self.kind, EventKind::Status { status, .. } if status.is_terminal())
    }
}

/// What an observer receives: log events, plus keep-alives that never enter the log.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Event(TaskEvent),
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_flat_and_camel_case() {
        let id = Uuid::new_v4();
        let event = TaskEvent::new(
            id,
            EventKind::ToolCall {
                call_id: "c1".into(),
                name: "read_file".into(),
                args: json!({"path": "main.go"}),
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["taskId"], id.to_string());
        assert_eq!(value["callId"], "c1");
        assert_eq!(value["args"]["path"], "main.go");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn question_event_omits_missing_context() {
        let event = TaskEvent::new(
            Uuid::new_v4(),
            EventKind::Question {
                question_id: Uuid::new_v4(),
                question: "Which file?".into(),
                context: None,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["question"], "Which file?");
        assert!(value.get("context").is_none());
        assert!(value["questionId"].is_string());
    }

    #[test]
    fn error_reason_tags() {
        let event = TaskEvent::new(
            Uuid::new_v4(),
            EventKind::Error {
                error: "loop".into(),
                reason: ErrorReason::LoopDetected,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], "loop_detected");
        assert_eq!(event.name(), "error");
    }

    #[test]
    fn parses_back_from_wire() {
        let event = TaskEvent::status(Uuid::new_v4(), TaskStatus::Cancelled, None);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.is_terminal_status());
    }
}
