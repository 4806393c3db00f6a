//! `ScriptedWorker` — plays back pre-recorded turns.
//!
//! Used by the test suites to drive the relay through exact item sequences,
//! including explicit questions, mid-turn failures and turns that never end.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{ItemStream, TurnContext, TurnInput, Worker, WorkerItem};
use crate::error::WorkerError;

/// One scripted step of a turn.
#[derive(Debug, Clone)]
pub enum Step {
    Item(WorkerItem),
    /// The stream yields an error instead of an item.
    Fail(WorkerError),
    /// Ask through the question callback and emit the answer as a thought.
    Ask {
        question: String,
        context: Option<String>,
    },
    Sleep(Duration),
    /// Stop yielding without ending the stream.
    Hang,
}

impl From<WorkerItem> for Step {
    fn from(item: WorkerItem) -> Self {
        Self::Item(item)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedWorker {
    turns: Mutex<VecDeque<Vec<Step>>>,
    inputs: Mutex<Vec<TurnInput>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a turn. Turns are consumed in order; once the script runs out,
    /// every further turn just finishes.
    pub fn turn<I, S>(self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(steps.into_iter().map(Into::into).collect());
        self
    }

    /// Inputs of every turn started so far.
    pub fn inputs(&self) -> Vec<TurnInput> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_turn(
        &self,
        input: TurnInput,
        ctx: TurnContext,
    ) -> Result<ItemStream, WorkerError> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input);
        let steps = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| vec![Step::Item(WorkerItem::Finished { result: None })]);

        let stream = futures::stream::iter(steps)
            .then(move |step| {
                let ctx = ctx.clone();
                async move {
                    match step {
                        Step::Item(item) => Some(Ok(item)),
                        Step::Fail(err) => Some(Err(err)),
                        Step::Ask { question, context } => {
                            match ctx.questions.ask(question, context).await {
                                Ok(answer) => {
                                    Some(Ok(WorkerItem::Thought(format!("Caller answered: {answer}"))))
                                }
                                Err(_) => Some(Err(WorkerError::Cancelled)),
                            }
                        }
                        Step::Sleep(d) => {
                            tokio::time::sleep(d).await;
                            None
                        }
                        Step::Hang => futures::future::pending().await,
                    }
                }
            })
            .filter_map(futures::future::ready);

        Ok(stream.boxed())
    }
}
