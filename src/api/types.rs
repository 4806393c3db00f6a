//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{PendingQuestion, TaskConfig, TaskRecord, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub config: Option<TaskConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub task_id: Uuid,
    pub stream_url: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question_id: Uuid,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl From<&PendingQuestion> for QuestionView {
    fn from(q: &PendingQuestion) -> Self {
        Self {
            question_id: q.question_id,
            question: q.question.clone(),
            context: q.context.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub task: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub has_pending_question: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<QuestionView>,
}

impl From<&TaskRecord> for StatusResponse {
    fn from(t: &TaskRecord) -> Self {
        Self {
            task_id: t.id,
            status: t.status,
            task: t.description.clone(),
            created_at: t.created_at,
            started_at: t.started_at,
            completed_at: t.completed_at,
            result: t.result.clone(),
            error: t.error.clone(),
            has_pending_question: t.has_pending_question(),
            pending_question: t.pending_question.as_ref().map(QuestionView::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub task: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub has_pending_question: bool,
}

impl From<&TaskRecord> for TaskSummary {
    fn from(t: &TaskRecord) -> Self {
        Self {
            task_id: t.id,
            status: t.status,
            task: t.description.clone(),
            created_at: t.created_at,
            started_at: t.started_at,
            completed_at: t.completed_at,
            has_pending_question: t.has_pending_question(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    #[serde(default)]
    pub answer: Option<String>,
    /// Must match the pending question when given.
    #[serde(default)]
    pub question_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
    pub task_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub active_tasks: usize,
}
