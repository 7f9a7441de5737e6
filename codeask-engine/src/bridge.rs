//! Thread bridge.
//!
//! Handles the message flow for one incoming question:
//! 1. Post a placeholder reply into the thread
//! 2. Run the exchange, editing the placeholder with throttled progress
//! 3. Replace the placeholder with the answer (or an apology on failure)

use crate::engine::{Engine, Question};
use crate::prefix::PromptContext;
use crate::traits::{ChatSink, MessageProgress};
use codeask_common::Result;
use std::sync::Arc;

/// Placeholder posted while the agent works.
pub const PLACEHOLDER_TEXT: &str = "Looking into it…";

/// Shown in place of an answer when the exchange fails.
pub const APOLOGY_TEXT: &str =
    "Sorry, something went wrong while looking into that. Please try again in a moment.";

/// Build the durable key for a chat thread.
pub fn thread_key(channel_id: &str, thread_id: &str) -> String {
    format!("{channel_id}:{thread_id}")
}

/// A question arriving from a chat platform adapter.
#[derive(Debug, Clone, Default)]
pub struct IncomingQuestion {
    pub channel_id: String,
    pub thread_id: String,
    pub question: Question,
    /// Conversation metadata and channel settings snapshot
    pub context: PromptContext,
}

/// What was posted back into the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReply {
    pub text: String,
    /// The answer ended with a question back to the user
    pub awaiting_user: bool,
}

/// Connects a chat platform to the engine.
pub struct ThreadBridge {
    engine: Arc<Engine>,
    sink: Arc<dyn ChatSink>,
}

impl ThreadBridge {
    pub fn new(engine: Arc<Engine>, sink: Arc<dyn ChatSink>) -> Self {
        Self { engine, sink }
    }

    /// Answer one question in its thread.
    ///
    /// Fails only when the placeholder or the final reply cannot be posted;
    /// exchange failures are logged and answered with an apology.
    pub async fn handle(&self, incoming: IncomingQuestion) -> Result<ThreadReply> {
        let key = thread_key(&incoming.channel_id, &incoming.thread_id);

        tracing::info!(
            thread_key = %key,
            user = %incoming.context.user.name,
            "Question received"
        );

        let placeholder = self
            .sink
            .post_message(&incoming.channel_id, &incoming.thread_id, PLACEHOLDER_TEXT)
            .await?;

        let reporter = Arc::new(MessageProgress::new(self.sink.clone(), placeholder.clone()));

        let reply = match self
            .engine
            .ask(&key, &incoming.question, &incoming.context, reporter)
            .await
        {
            Ok(outcome) => ThreadReply {
                text: outcome.text,
                awaiting_user: outcome.is_question,
            },
            Err(e) => {
                tracing::error!(
                    thread_key = %key,
                    error = %e,
                    stream_failure = e.is_stream(),
                    "Exchange failed"
                );
                ThreadReply {
                    text: APOLOGY_TEXT.to_string(),
                    awaiting_user: false,
                }
            }
        };

        self.sink.update_message(&placeholder, &reply.text).await?;
        Ok(reply)
    }
}
