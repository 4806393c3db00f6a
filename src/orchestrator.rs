//! Orchestration driver — runs one task's worker turns end to end.
//!
//! Per task: mark it running, pull items from the worker turn by turn, map
//! them through [`EventTransform`] into the registry, and suspend on detected
//! questions until the caller answers. The task ends `completed`, `error` or
//! `cancelled`; the token is checked between every pulled item.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{TaskError, WorkerError};
use crate::events::{ErrorReason, EventKind};
use crate::questions::{self, DetectedQuestion, QuestionCoordinator, QuestionHandle};
use crate::registry::TaskRegistry;
use crate::task::{TaskConfig, TaskRecord, TaskStatus};
use crate::transform::EventTransform;
use crate::worker::{TurnContext, TurnInput, Worker, WorkerItem};

/// Why a task's execution loop stopped early.
#[derive(Debug)]
enum Stop {
    /// The worker failed. The `error` event is logged with the terminal
    /// status.
    Failed { error: String, reason: ErrorReason },
    /// The task's cancellation token was tripped.
    Cancelled,
}

pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    questions: Arc<QuestionCoordinator>,
    worker: Arc<dyn Worker>,
    config: RelayConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<TaskRegistry>, worker: Arc<dyn Worker>, config: RelayConfig) -> Self {
        let questions = Arc::new(QuestionCoordinator::new(
            Arc::clone(&registry),
            config.question_min_confidence,
        ));
        Self {
            registry,
            questions,
            worker,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn questions(&self) -> &Arc<QuestionCoordinator> {
        &self.questions
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Create a task and start driving it in the background.
    pub async fn submit(self: &Arc<Self>, description: String, config: TaskConfig) -> Uuid {
        let task_id = self.registry.create(description, config).await;
        self.spawn(task_id);
        task_id
    }

    /// Start driving an existing `pending` task in the background.
    pub fn spawn(self: &Arc<Self>, task_id: Uuid) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(task_id).await })
    }

    /// Answer the task's pending question.
    pub async fn answer(
        &self,
        task_id: Uuid,
        question_id: Option<Uuid>,
        answer: String,
    ) -> Result<(), TaskError> {
        self.questions.answer(task_id, question_id, answer).await
    }

    /// Cancel a task and drop any question it was waiting on.
    pub async fn cancel(&self, task_id: Uuid, reason: Option<String>) -> Result<TaskRecord, TaskError> {
        let record = self.registry.cancel(task_id, reason).await?;
        if self.questions.discard(task_id).await {
            debug!(task_id = %task_id, "Discarded pending question of cancelled task");
        }
        Ok(record)
    }

    /// Drive a task to a terminal state.
    pub async fn run(&self, task_id: Uuid) {
        let Some(cancel) = self.registry.cancellation_token(task_id).await else {
            warn!(task_id = %task_id, "Cannot run unknown task");
            return;
        };
        let record = match self
            .registry
            .set_status(task_id, TaskStatus::Running, None)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                debug!(task_id = %task_id, error = %e, "Task stopped before starting");
                return;
            }
        };

        info!(task_id = %task_id, worker = self.worker.name(), "Driver started");

        let mut transform = EventTransform::new();
        let outcome = self.execution_loop(&record, &cancel, &mut transform).await;
        self.questions.discard(task_id).await;

        match outcome {
            Ok(()) => self.mark_completed(task_id, transform.final_result()).await,
            Err(Stop::Failed { error, reason }) => self.mark_failed(task_id, error, reason).await,
            Err(Stop::Cancelled) => {
                debug!(task_id = %task_id, "Driver stopped on cancellation");
            }
        }
    }

    async fn execution_loop(
        &self,
        record: &TaskRecord,
        cancel: &CancellationToken,
        transform: &mut EventTransform,
    ) -> Result<(), Stop> {
        let task_id = record.id;
        let max_turns = record.config.max_turns_or(self.config.default_max_turns);
        let mut input = TurnInput::Prompt(record.description.clone());
        let mut turn = 0;

        loop {
            turn += 1;
            transform.begin_turn();
            debug!(task_id = %task_id, turn, max_turns, "Starting worker turn");

            let ctx = TurnContext {
                task_id,
                turn,
                config: record.config.clone(),
                cancel: cancel.clone(),
                questions: QuestionHandle::new(task_id, Arc::clone(&self.questions)),
            };
            let started = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Stop::Cancelled),
                started = self.worker.run_turn(input, ctx) => started,
            };
            let mut items = match started {
                Ok(items) => items,
                Err(e) => return Err(worker_failed(cancel, e)),
            };

            let mut next_input = None;
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Stop::Cancelled),
                    item = items.next() => item,
                };
                let item = match item {
                    Some(Ok(item)) => item,
                    Some(Err(e)) => return Err(worker_failed(cancel, e)),
                    None => break,
                };

                // An explicit ask ends the turn; its answer starts the next one.
                if let Some((call_id, question, context)) = item.as_question() {
                    let detected = DetectedQuestion::explicit(question, context);
                    let answer = self.ask(task_id, cancel, detected).await?;
                    next_input = Some(TurnInput::Answer {
                        call_id: Some(call_id),
                        answer,
                    });
                    break;
                }

                let kind = transform.apply(&item);
                if item.is_fatal() {
                    if cancel.is_cancelled() {
                        return Err(Stop::Cancelled);
                    }
                    return Err(match kind {
                        Some(EventKind::Error { error, reason }) => Stop::Failed { error, reason },
                        _ => Stop::Failed {
                            error: describe_fatal(&item),
                            reason: ErrorReason::WorkerError,
                        },
                    });
                }
                if let Some(kind) = kind {
                    self.registry.append(task_id, kind).await;
                }
            }
            drop(items);

            if next_input.is_none() && turn < max_turns {
                let detected =
                    questions::detect_implicit(transform.turn_text(), transform.has_outstanding_calls());
                if let Some(detected) = detected {
                    if self.questions.should_suspend(&detected) {
                        let answer = self.ask(task_id, cancel, detected).await?;
                        next_input = Some(TurnInput::Answer {
                            call_id: None,
                            answer,
                        });
                    } else {
                        info!(
                            task_id = %task_id,
                            confidence = %detected.confidence,
                            question = %detected.question,
                            "Possible question below confidence threshold, continuing"
                        );
                    }
                }
            }

            match next_input {
                Some(next) => input = next,
                None => return Ok(()),
            }
        }
    }

    /// Suspend on a question and wait for the caller's answer.
    async fn ask(
        &self,
        task_id: Uuid,
        cancel: &CancellationToken,
        detected: DetectedQuestion,
    ) -> Result<String, Stop> {
        debug!(
            task_id = %task_id,
            source = ?detected.source,
            confidence = %detected.confidence,
            "Suspending on question"
        );
        let suspended = self
            .questions
            .suspend(task_id, detected.question, detected.context)
            .await;
        let waited = match suspended {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };
        match waited {
            Ok(answer) => Ok(answer),
            Err(_) if cancel.is_cancelled() => Err(Stop::Cancelled),
            Err(e) => Err(Stop::Failed {
                error: e.to_string(),
                reason: ErrorReason::WorkerError,
            }),
        }
    }

    async fn mark_completed(&self, task_id: Uuid, result: String) {
        if let Err(e) = self.registry.set_result(task_id, result).await {
            debug!(task_id = %task_id, error = %e, "Task finished elsewhere before completion");
        }
    }

    async fn mark_failed(&self, task_id: Uuid, error: String, reason: ErrorReason) {
        warn!(task_id = %task_id, error = %error, "Task failed");
        if let Err(e) = self.registry.set_error(task_id, error, reason).await {
            debug!(task_id = %task_id, error = %e, "Could not mark task failed");
        }
    }
}

/// Classify a failure surfaced by the worker's event source.
fn worker_failed(cancel: &CancellationToken, e: WorkerError) -> Stop {
    if cancel.is_cancelled() {
        return Stop::Cancelled;
    }
    let reason = match e {
        WorkerError::Cancelled => ErrorReason::Cancelled,
        WorkerError::LoopDetected(_) => ErrorReason::LoopDetected,
        WorkerError::Failed(_) | WorkerError::Stream(_) => ErrorReason::WorkerError,
    };
    Stop::Failed {
        error: e.to_string(),
        reason,
    }
}

fn describe_fatal(item: &WorkerItem) -> String {
    match item {
        WorkerItem::Error(error) => error.clone(),
        WorkerItem::Cancelled => "Worker turn was cancelled".to_string(),
        WorkerItem::LoopDetected(detail) => format!("Loop detected: {detail}"),
        other => format!("Unexpected fatal item: {other:?}"),
    }
}
