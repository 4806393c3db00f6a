//! Worker boundary — the external engine that performs a task's turns.
//!
//! - `Worker` — trait the driver runs one turn at a time
//! - `WorkerItem` — typed progress items a turn's stream yields
//! - `echo` — `EchoWorker`, a self-contained worker for local runs
//! - `scripted` — `ScriptedWorker`, plays back fixed turns

pub mod echo;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::questions::QuestionHandle;
use crate::task::TaskConfig;

pub use echo::EchoWorker;
pub use scripted::{ScriptedWorker, Step};

/// Tool name a worker invokes to ask the caller a question.
/// Arguments: `{"question": string, "context"?: string}`.
pub const ASK_USER_TOOL: &str = "ask_user";

/// One progress item emitted by a worker turn.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerItem {
    /// Reasoning the caller may display.
    Thought(String),
    /// Incremental response text.
    ContentDelta(String),
    /// The worker wants a tool run.
    ToolCallRequest {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    /// A tool run finished.
    ToolCallResponse {
        call_id: String,
        result: serde_json::Value,
        success: bool,
    },
    /// The turn produced an explicit final result.
    Finished { result: Option<String> },
    /// Unrecoverable worker failure.
    Error(String),
    /// The worker stopped because it was cancelled.
    Cancelled,
    /// The worker detected it is repeating itself.
    LoopDetected(String),
    /// Internal bookkeeping the caller never sees.
    Other { kind: String },
}

impl WorkerItem {
    /// If this item is an explicit `ask_user` invocation, its call id,
    /// question and context.
    pub fn as_question(&self) -> Option<(String, String, Option<String>)> {
        match self {
            Self::ToolCallRequest {
                call_id,
                name,
                args,
            } if name == ASK_USER_TOOL => {
                let question = args.get("question")?.as_str()?;
                if question.trim().is_empty() {
                    return None;
                }
                let context = args
                    .get("context")
                    .and_then(|c| c.as_str())
                    .map(str::to_string);
                Some((call_id.clone(), question.to_string(), context))
            }
            _ => None,
        }
    }

    /// True for items after which the turn cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Cancelled | Self::LoopDetected(_))
    }
}

/// What the worker should act on in this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// The task description, for the first turn.
    Prompt(String),
    /// The caller's answer to the question that ended the previous turn.
    /// `call_id` is set when the question came from an `ask_user` call.
    Answer {
        call_id: Option<String>,
        answer: String,
    },
}

impl TurnInput {
    pub fn text(&self) -> &str {
        match self {
            Self::Prompt(text) => text,
            Self::Answer { answer, .. } => answer,
        }
    }
}

/// Everything a worker gets for one turn.
#[derive(Clone)]
pub struct TurnContext {
    pub task_id: Uuid,
    /// 1-based turn number.
    pub turn: u32,
    pub config: TaskConfig,
    /// Set when the task is cancelled; workers should stop yielding items.
    pub cancel: CancellationToken,
    /// Asks the caller a question and waits for the answer.
    pub questions: QuestionHandle,
}

/// Lazy, single-pass stream of a turn's items. Dropping it abandons the turn.
pub type ItemStream = BoxStream<'static, Result<WorkerItem, WorkerError>>;

/// The engine that performs the actual work.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Start one turn. The driver pulls items until the stream ends.
    async fn run_turn(
        &self,
        input: TurnInput,
        ctx: TurnContext,
    ) -> Result<ItemStream, WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ask_user_is_a_question() {
        let item = WorkerItem::ToolCallRequest {
            call_id: "c7".into(),
            name: ASK_USER_TOOL.into(),
            args: json!({"question": "Which file?", "context": "Two candidates"}),
        };
        assert_eq!(
            item.as_question(),
            Some((
                "c7".to_string(),
                "Which file?".to_string(),
                Some("Two candidates".to_string())
            ))
        );
    }

    #[test]
    fn question_text_is_kept_verbatim() {
        let item = WorkerItem::ToolCallRequest {
            call_id: "c3".into(),
            name: ASK_USER_TOOL.into(),
            args: json!({"question": "  Which branch?\n", "context": " main or dev "}),
        };
        let (_, question, context) = item.as_question().unwrap();
        assert_eq!(question, "  Which branch?\n");
        assert_eq!(context.as_deref(), Some(" main or dev "));
    }

    #[test]
    fn other_tools_and_blank_questions_are_not() {
        let read = WorkerItem::ToolCallRequest {
            call_id: "c1".into(),
            name: "read_file".into(),
            args: json!({"question": "ignored"}),
        };
        assert!(read.as_question().is_none());

        let blank = WorkerItem::ToolCallRequest {
            call_id: "c2".into(),
            name: ASK_USER_TOOL.into(),
            args: json!({"question": "   "}),
        };
        assert!(blank.as_question().is_none());
    }

    #[test]
    fn fatal_items() {
        assert!(WorkerItem::Error("x".into()).is_fatal());
        assert!(WorkerItem::Cancelled.is_fatal());
        assert!(WorkerItem::LoopDetected("x".into()).is_fatal());
        assert!(!WorkerItem::Thought("x".into()).is_fatal());
    }
}
