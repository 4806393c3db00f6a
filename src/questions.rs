//! Question coordinator — detects when the worker needs input and suspends
//! the task until the caller answers.
//!
//! Detection precedence is fixed: an explicit `ask_user` request always wins
//! and ends the turn on the spot; text heuristics run only at the end of a
//! turn and only when no tool call is outstanding. Each task has
//! at most one pending question, tracked in a correlation table keyed by
//! task id and checked against the question id on answer.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::TaskError;
use crate::registry::TaskRegistry;
use crate::task::{PendingQuestion, TaskStatus};

/// How sure a detector is that the worker is waiting for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("expected low, medium or high, got '{other}'")),
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Which detector fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// The worker invoked `ask_user` or the question callback.
    Explicit,
    /// The worker's text ends with a question mark.
    TrailingQuestionMark,
    /// The worker's text matches a request-for-input phrasing.
    InputPhrase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedQuestion {
    pub question: String,
    pub context: Option<String>,
    pub confidence: Confidence,
    pub source: DetectionSource,
}

impl DetectedQuestion {
    pub fn explicit(question: impl Into<String>, context: Option<String>) -> Self {
        Self {
            question: question.into(),
            context,
            confidence: Confidence::High,
            source: DetectionSource::Explicit,
        }
    }
}

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](\s+)").expect("valid sentence regex"));

static INPUT_PHRASES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(please (provide|specify|clarify|confirm|let me know|tell me)|let me know (which|what|how|if|whether)|could you (provide|clarify|specify|confirm|tell me)|can you (provide|clarify|specify|confirm|tell me)|i need (more information|you to|to know)|waiting for your (input|answer|response|confirmation)|which (one|option) (would you|do you|should i))\b",
    )
    .expect("valid input phrase regex")
});

/// Heuristic detection over the worker's latest text.
///
/// Returns `None` while a tool call is outstanding: the worker is waiting on
/// the tool, not on the caller.
pub fn detect_implicit(text: &str, tool_call_outstanding: bool) -> Option<DetectedQuestion> {
    if tool_call_outstanding {
        return None;
    }
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.ends_with('?') {
        let (context, question) = split_last_sentence(text);
        return Some(DetectedQuestion {
            question: question.to_string(),
            context: context.map(str::to_string),
            confidence: Confidence::Medium,
            source: DetectionSource::TrailingQuestionMark,
        });
    }

    if INPUT_PHRASES.is_match(text) {
        return Some(DetectedQuestion {
            question: text.to_string(),
            context: None,
            confidence: Confidence::Low,
            source: DetectionSource::InputPhrase,
        });
    }

    None
}

/// Split off the final sentence. Returns `(earlier sentences, last sentence)`.
fn split_last_sentence(text: &str) -> (Option<&str>, &str) {
    // Ignore the terminal punctuation itself when looking for the boundary.
    let body = &text[..text.len() - 1];
    match SENTENCE_END.find_iter(body).last() {
        Some(m) => {
            let context = text[..m.start() + 1].trim();
            let question = text[m.end()..].trim();
            ((!context.is_empty()).then_some(context), question)
        }
        None => (None, text),
    }
}

struct PendingEntry {
    question_id: Uuid,
    responder: oneshot::Sender<String>,
}

/// Owns the suspend/resume mechanics for pending questions.
pub struct QuestionCoordinator {
    registry: Arc<TaskRegistry>,
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    min_confidence: Confidence,
}

impl QuestionCoordinator {
    pub fn new(registry: Arc<TaskRegistry>, min_confidence: Confidence) -> Self {
        Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            min_confidence,
        }
    }

    /// Whether a detection is confident enough to suspend the task.
    pub fn should_suspend(&self, detected: &DetectedQuestion) -> bool {
        detected.confidence >= self.min_confidence
    }

    /// Register a pending question, move the task to `waiting_for_answer` and
    /// emit the `question` event. The returned handle resolves with the
    /// caller's answer.
    pub async fn suspend(
        &self,
        task_id: Uuid,
        question: impl Into<String>,
        context: Option<String>,
    ) -> Result<AnswerHandle, TaskError> {
        let cancel = self
            .registry
            .cancellation_token(task_id)
            .await
            .ok_or(TaskError::NotFound { id: task_id })?;

        let mut pending = self.pending.lock().await;
        if let Some(existing) = pending.get(&task_id) {
            if !existing.responder.is_closed() {
                return Err(TaskError::QuestionPending { id: task_id });
            }
            // The driver that asked is gone; the entry is stale.
            pending.remove(&task_id);
        }

        let question = PendingQuestion::new(question, context);
        let question_id = question.question_id;
        self.registry.await_answer(task_id, question).await?;

        let (tx, rx) = oneshot::channel();
        pending.insert(
            task_id,
            PendingEntry {
                question_id,
                responder: tx,
            },
        );

        info!(task_id = %task_id, question_id = %question_id, "Task waiting for answer");
        Ok(AnswerHandle {
            task_id,
            question_id,
            rx,
            cancel,
        })
    }

    /// Answer the task's pending question. When `question_id` is given it
    /// must match the outstanding question.
    ///
    /// The task is back in `running` before the waiting driver resumes.
    pub async fn answer(
        &self,
        task_id: Uuid,
        question_id: Option<Uuid>,
        answer: String,
    ) -> Result<(), TaskError> {
        let mut pending = self.pending.lock().await;

        let matches = match pending.get(&task_id) {
            Some(entry) => question_id.is_none_or(|q| q == entry.question_id),
            None => false,
        };
        let record = self.registry.get(task_id).await?;
        if !matches || record.status != TaskStatus::WaitingForAnswer {
            return Err(TaskError::NoPendingQuestion { id: task_id });
        }

        let Some(entry) = pending.remove(&task_id) else {
            return Err(TaskError::NoPendingQuestion { id: task_id });
        };
        self.registry
            .set_status(
                task_id,
                TaskStatus::Running,
                Some("Answer received".to_string()),
            )
            .await?;

        if entry.responder.send(answer).is_err() {
            debug!(task_id = %task_id, "Driver stopped waiting before the answer arrived");
        }
        info!(task_id = %task_id, question_id = %entry.question_id, "Question answered");
        Ok(())
    }

    /// Forget a task's pending question, waking its driver with an error.
    pub async fn discard(&self, task_id: Uuid) -> bool {
        self.pending.lock().await.remove(&task_id).is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Deferred answer to one pending question.
#[derive(Debug)]
pub struct AnswerHandle {
    task_id: Uuid,
    question_id: Uuid,
    rx: oneshot::Receiver<String>,
    cancel: CancellationToken,
}

impl AnswerHandle {
    pub fn question_id(&self) -> Uuid {
        self.question_id
    }

    /// Wait for the answer. Fails if the task is cancelled first.
    pub async fn wait(self) -> Result<String, TaskError> {
        let id = self.task_id;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TaskError::Cancelled { id }),
            answer = self.rx => answer.map_err(|_| TaskError::Cancelled { id }),
        }
    }
}

/// Question callback handed to workers: ask, then wait for the answer.
#[derive(Clone)]
pub struct QuestionHandle {
    task_id: Uuid,
    coordinator: Arc<QuestionCoordinator>,
}

impl QuestionHandle {
    pub fn new(task_id: Uuid, coordinator: Arc<QuestionCoordinator>) -> Self {
        Self {
            task_id,
            coordinator,
        }
    }

    pub async fn ask(
        &self,
        question: impl Into<String>,
        context: Option<String>,
    ) -> Result<String, TaskError> {
        self.coordinator
            .suspend(self.task_id, question, context)
            .await?
            .wait()
            .await
    }
}
