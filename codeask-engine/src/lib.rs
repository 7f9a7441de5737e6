//! Codeask Engine - answers chat-thread questions about a codebase through
//! an agent runtime.
//!
//! This crate provides:
//! - Session directory (thread → runtime session, persisted in SQLite)
//! - Context prefix builder
//! - Progress throttling
//! - Stream consumer and answer classification
//! - HTTP/SSE agent runtime client
//! - Thread bridge for chat platform adapters

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod bridge;
pub mod cli;
pub mod engine;
pub mod events;
pub mod exchange;
pub mod prefix;
pub mod runtime;
pub mod sessions;
pub mod store;
pub mod throttle;
pub mod traits;

pub use bridge::{thread_key, IncomingQuestion, ThreadBridge, ThreadReply};
pub use engine::{Attachment, Engine, Question};
pub use events::{MessageRole, RuntimeEvent, ToolStatus};
pub use exchange::{classify_answer, ExchangeLimits, ExchangeOutcome, FALLBACK_ANSWER};
pub use prefix::{ChannelInfo, ChannelSettings, PromptContext, ToolHint, UserProfile};
pub use runtime::{AgentRuntime, EventSubscription, HttpAgentRuntime, PromptPart};
pub use sessions::{SessionDirectory, SessionHandle};
pub use store::{SessionStore, ThreadSession};
pub use throttle::ProgressThrottler;
pub use traits::{ChatSink, MessageProgress, MessageRef, NoopReporter, ProgressReporter};
