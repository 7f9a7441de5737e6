//! Capability traits the engine consumes from its surroundings.

use async_trait::async_trait;
use codeask_common::Result;

/// Reference to a message posted into a chat thread, used for later edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: String,
    pub thread_id: String,
    /// Platform message identifier (e.g. a Slack `ts`)
    pub message_id: String,
}

/// Chat platform capability: send or update a message in a channel thread.
///
/// Implement this trait to connect a chat platform adapter.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Post a new message into a thread.
    async fn post_message(&self, channel_id: &str, thread_id: &str, text: &str)
        -> Result<MessageRef>;

    /// Replace the text of a previously posted message.
    async fn update_message(&self, message: &MessageRef, text: &str) -> Result<()>;
}

/// Receives intermediate progress text for one exchange.
///
/// The throttler is the only caller during an exchange, so implementations
/// see at most one call per progress interval.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, text: &str) -> Result<()>;
}

/// Reporter that discards all progress.
pub struct NoopReporter;

#[async_trait]
impl ProgressReporter for NoopReporter {
    async fn report(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Reporter that edits a posted message in place with each progress update.
pub struct MessageProgress<S: ChatSink + ?Sized> {
    sink: std::sync::Arc<S>,
    message: MessageRef,
}

impl<S: ChatSink + ?Sized> MessageProgress<S> {
    pub fn new(sink: std::sync::Arc<S>, message: MessageRef) -> Self {
        Self { sink, message }
    }
}

#[async_trait]
impl<S: ChatSink + ?Sized> ProgressReporter for MessageProgress<S> {
    async fn report(&self, text: &str) -> Result<()> {
        self.sink.update_message(&self.message, text).await
    }
}
