//! `EchoWorker` — answers every turn by echoing its input back.
//!
//! Lets the relay run end to end without an external agent engine.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{ItemStream, TurnContext, TurnInput, Worker, WorkerItem};
use crate::error::WorkerError;

#[derive(Debug, Clone, Default)]
pub struct EchoWorker {
    /// Pause before each item, to make streaming visible.
    delay: Duration,
}

impl EchoWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Worker for EchoWorker {
    fn name(&self) -> &str {
        "echo"
    }

    async fn run_turn(
        &self,
        input: TurnInput,
        ctx: TurnContext,
    ) -> Result<ItemStream, WorkerError> {
        let text = input.text().trim().to_string();

        let mut items = vec![WorkerItem::Thought(format!(
            "Turn {} of task {}: echoing {} characters",
            ctx.turn,
            ctx.task_id,
            text.len()
        ))];
        let reply = format!("Echo: {text}");
        items.extend(
            reply
                .split_inclusive(' ')
                .map(|word| WorkerItem::ContentDelta(word.to_string())),
        );
        items.push(WorkerItem::Finished { result: None });

        let delay = self.delay;
        let cancel = ctx.cancel.clone();
        let stream = futures::stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .take_while(move |_| {
                let live = !cancel.is_cancelled();
                async move { live }
            })
            .map(Ok);

        Ok(stream.boxed())
    }
}
