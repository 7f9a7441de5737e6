//! Terminal adapter for asking questions locally.
//!
//! stdin/stdout stand in for a chat platform: every line is a question in
//! one terminal thread, and replies are printed instead of posted.

use crate::bridge::{IncomingQuestion, ThreadBridge};
use crate::engine::Question;
use crate::prefix::{ChannelInfo, PromptContext, UserProfile};
use crate::traits::{ChatSink, MessageRef};
use async_trait::async_trait;
use codeask_common::Result;
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Channel id used for terminal threads.
pub const CLI_CHANNEL: &str = "cli";

/// Prints posted and updated messages to stdout.
pub struct StdoutSink;

impl StdoutSink {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatSink for StdoutSink {
    async fn post_message(
        &self,
        channel_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<MessageRef> {
        println!("… {text}");
        Ok(MessageRef {
            channel_id: channel_id.to_string(),
            thread_id: thread_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn update_message(&self, _message: &MessageRef, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }
}

/// Whether an input line ends the session.
pub fn is_exit_command(line: &str) -> bool {
    matches!(line.trim(), "/quit" | "/exit")
}

/// Read questions from stdin until EOF or an exit command.
pub async fn run(bridge: &ThreadBridge) -> Result<()> {
    let thread_id = uuid::Uuid::new_v4().to_string();
    let context = PromptContext {
        user: UserProfile {
            name: whoami(),
            ..Default::default()
        },
        channel: ChannelInfo {
            name: "terminal".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    tracing::info!(thread_id = %thread_id, "Terminal session started");

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit_command(line) {
            break;
        }

        let reply = bridge
            .handle(IncomingQuestion {
                channel_id: CLI_CHANNEL.to_string(),
                thread_id: thread_id.clone(),
                question: Question::new(line),
                context: context.clone(),
            })
            .await?;

        if reply.awaiting_user {
            println!("(waiting for your reply)");
        }
    }

    tracing::info!(thread_id = %thread_id, "Terminal session ended");
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_string())
}
