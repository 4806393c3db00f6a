//! Event transform — maps worker items onto wire events.
//!
//! Mapping depends only on the item's kind. The transform also keeps the
//! task's content buffer (the fallback result text) and the tool calls seen
//! so far, so a `tool_result` can be correlated with its request.

use std::collections::{HashMap, HashSet};

use crate::events::{ErrorReason, EventKind};
use crate::worker::WorkerItem;

/// A tool call as requested by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallInfo {
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct EventTransform {
    /// Every content delta of the task, in order.
    content: String,
    /// Content of the current turn only.
    turn_text: String,
    calls: HashMap<String, ToolCallInfo>,
    /// Calls of the current turn requested but not yet answered.
    outstanding: HashSet<String>,
    explicit_result: Option<String>,
}

impl EventTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map one item. `None` means the item is intentionally dropped.
    pub fn apply(&mut self, item: &WorkerItem) -> Option<EventKind> {
        match item {
            WorkerItem::Thought(content) => Some(EventKind::Thought {
                content: content.clone(),
            }),
            WorkerItem::ContentDelta(text) => {
                self.content.push_str(text);
                self.turn_text.push_str(text);
                Some(EventKind::Content { text: text.clone() })
            }
            WorkerItem::ToolCallRequest {
                call_id,
                name,
                args,
            } => {
                self.calls.insert(
                    call_id.clone(),
                    ToolCallInfo {
                        name: name.clone(),
                        args: args.clone(),
                    },
                );
                self.outstanding.insert(call_id.clone());
                Some(EventKind::ToolCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                })
            }
            WorkerItem::ToolCallResponse {
                call_id,
                result,
                success,
            } => {
                self.outstanding.remove(call_id);
                Some(EventKind::ToolResult {
                    call_id: call_id.clone(),
                    name: self.calls.get(call_id).map(|c| c.name.clone()),
                    result: result.clone(),
                    success: *success,
                })
            }
            WorkerItem::Finished { result } => {
                if let Some(result) = result {
                    self.explicit_result = Some(result.clone());
                }
                None
            }
            WorkerItem::Error(error) => Some(EventKind::Error {
                error: error.clone(),
                reason: ErrorReason::WorkerError,
            }),
            WorkerItem::Cancelled => Some(EventKind::Error {
                error: "Worker turn was cancelled".to_string(),
                reason: ErrorReason::Cancelled,
            }),
            WorkerItem::LoopDetected(detail) => Some(EventKind::Error {
                error: format!("Loop detected: {detail}"),
                reason: ErrorReason::LoopDetected,
            }),
            WorkerItem::Other { .. } => None,
        }
    }

    /// Reset per-turn state before the next turn starts. Calls left
    /// unanswered by the previous turn no longer count as outstanding.
    pub fn begin_turn(&mut self) {
        self.turn_text.clear();
        self.outstanding.clear();
    }

    /// Text the worker produced in the current turn.
    pub fn turn_text(&self) -> &str {
        &self.turn_text
    }

    /// All text the worker produced for this task.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn call(&self, call_id: &str) -> Option<&ToolCallInfo> {
        self.calls.get(call_id)
    }

    pub fn has_outstanding_calls(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Explicit result if the worker gave one, otherwise the buffered content.
    pub fn final_result(&self) -> String {
        self.explicit_result
            .clone()
            .unwrap_or_else(|| self.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_is_buffered() {
        let mut t = EventTransform::new();
        assert_eq!(
            t.apply(&WorkerItem::ContentDelta("Hello, ".into())),
            Some(EventKind::Content {
                text: "Hello, ".into()
            })
        );
        t.apply(&WorkerItem::ContentDelta("world".into()));
        assert_eq!(t.content(), "Hello, world");
        assert_eq!(t.final_result(), "Hello, world");
    }

    #[test]
    fn explicit_result_wins_over_buffer() {
        let mut t = EventTransform::new();
        t.apply(&WorkerItem::ContentDelta("draft".into()));
        assert_eq!(
            t.apply(&WorkerItem::Finished {
                result: Some("final".into())
            }),
            None
        );
        assert_eq!(t.final_result(), "final");
    }

    #[test]
    fn tool_result_is_correlated_with_request() {
        let mut t = EventTransform::new();
        t.apply(&WorkerItem::ToolCallRequest {
            call_id: "c1".into(),
            name: "read_file".into(),
            args: json!({"path": "main.go"}),
        });
        assert!(t.has_outstanding_calls());
        assert_eq!(t.call("c1").unwrap().args["path"], "main.go");

        let event = t.apply(&WorkerItem::ToolCallResponse {
            call_id: "c1".into(),
            result: json!("package main"),
            success: true,
        });
        assert_eq!(
            event,
            Some(EventKind::ToolResult {
                call_id: "c1".into(),
                name: Some("read_file".into()),
                result: json!("package main"),
                success: true,
            })
        );
        assert!(!t.has_outstanding_calls());
    }

    #[test]
    fn unknown_call_result_has_no_name() {
        let mut t = EventTransform::new();
        match t.apply(&WorkerItem::ToolCallResponse {
            call_id: "ghost".into(),
            result: json!(null),
            success: false,
        }) {
            Some(EventKind::ToolResult { name, .. }) => assert!(name.is_none()),
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn failures_carry_stable_reasons() {
        let mut t = EventTransform::new();
        let reasons: Vec<ErrorReason> = [
            WorkerItem::Error("boom".into()),
            WorkerItem::Cancelled,
            WorkerItem::LoopDetected("same tool 5x".into()),
        ]
        .iter()
        .filter_map(|item| match t.apply(item) {
            Some(EventKind::Error { reason, .. }) => Some(reason),
            _ => None,
        })
        .collect();
        assert_eq!(
            reasons,
            vec![
                ErrorReason::WorkerError,
                ErrorReason::Cancelled,
                ErrorReason::LoopDetected
            ]
        );
    }

    #[test]
    fn bookkeeping_is_dropped() {
        let mut t = EventTransform::new();
        assert!(t.apply(&WorkerItem::Other { kind: "usage".into() }).is_none());
        assert!(t.apply(&WorkerItem::Finished { result: None }).is_none());
    }

    #[test]
    fn turn_text_resets_but_content_accumulates() {
        let mut t = EventTransform::new();
        t.apply(&WorkerItem::ContentDelta("Which file?".into()));
        t.begin_turn();
        t.apply(&WorkerItem::ContentDelta(" Done.".into()));
        assert_eq!(t.turn_text(), " Done.");
        assert_eq!(t.content(), "Which file? Done.");
    }

    #[test]
    fn unanswered_call_does_not_outlive_its_turn() {
        let mut t = EventTransform::new();
        t.apply(&WorkerItem::ToolCallRequest {
            call_id: "c9".into(),
            name: "run_tests".into(),
            args: json!({}),
        });
        assert!(t.has_outstanding_calls());

        t.begin_turn();
        assert!(!t.has_outstanding_calls());
        assert_eq!(t.call("c9").unwrap().name, "run_tests");
    }
}
