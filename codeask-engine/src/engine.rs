//! Engine facade: the operations surrounding handler code calls.

use crate::exchange::{self, ExchangeLimits, ExchangeOutcome};
use crate::prefix::{build_prompt, PromptContext};
use crate::runtime::{AgentRuntime, PromptPart};
use crate::sessions::{SessionDirectory, SessionHandle};
use crate::store::SessionStore;
use crate::throttle::ProgressThrottler;
use crate::traits::ProgressReporter;
use codeask_common::{Config, Result};
use std::sync::Arc;

/// A file attached to a question, already converted to something the
/// runtime can fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime: String,
    pub url: String,
    pub filename: Option<String>,
}

/// One question asked in a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Session streaming engine.
pub struct Engine {
    runtime: Arc<dyn AgentRuntime>,
    sessions: SessionDirectory,
    limits: ExchangeLimits,
    default_agent: Option<String>,
}

impl Engine {
    pub fn new(store: Arc<SessionStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            sessions: SessionDirectory::new(store, runtime.clone()),
            runtime,
            limits: ExchangeLimits::default(),
            default_agent: None,
        }
    }

    /// Build an engine with the exchange limits and default agent from config.
    pub fn from_config(
        config: &Config,
        store: Arc<SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Self {
        Self::new(store, runtime)
            .with_limits(ExchangeLimits::from(&config.exchange))
            .with_default_agent(config.runtime.default_agent.clone())
    }

    pub fn with_limits(mut self, limits: ExchangeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_default_agent(mut self, agent: Option<String>) -> Self {
        self.default_agent = agent;
        self
    }

    pub async fn get_or_create_session(&self, thread_key: &str) -> Result<SessionHandle> {
        self.sessions.get_or_create(thread_key).await
    }

    pub fn is_compacted(&self, thread_key: &str) -> Result<bool> {
        self.sessions.is_compacted(thread_key)
    }

    pub fn set_compacted(&self, thread_key: &str, compacted: bool) -> Result<()> {
        self.sessions.set_compacted(thread_key, compacted)
    }

    /// Run one exchange against an existing session.
    ///
    /// Progress text reaches `reporter` at most once per progress interval.
    pub async fn run_exchange(
        &self,
        session_id: &str,
        question: &Question,
        ctx: &PromptContext,
        needs_full_context: bool,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ExchangeOutcome> {
        let mut parts = vec![PromptPart::text(build_prompt(
            ctx,
            needs_full_context,
            &question.text,
        ))];
        parts.extend(question.attachments.iter().map(|a| PromptPart::File {
            mime: a.mime.clone(),
            url: a.url.clone(),
            filename: a.filename.clone(),
        }));

        let agent = ctx
            .settings
            .agent
            .as_deref()
            .or(self.default_agent.as_deref());

        tracing::debug!(
            session_id = %session_id,
            agent = agent.unwrap_or("default"),
            full_context = needs_full_context,
            attachments = question.attachments.len(),
            "Submitting question"
        );

        let throttler = ProgressThrottler::new(reporter, self.limits.progress_interval);
        exchange::run_exchange(
            self.runtime.as_ref(),
            session_id,
            agent,
            &parts,
            &throttler,
            self.limits,
        )
        .await
    }

    /// Answer a question in a thread, managing the session and the
    /// compaction flag around the exchange.
    pub async fn ask(
        &self,
        thread_key: &str,
        question: &Question,
        ctx: &PromptContext,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ExchangeOutcome> {
        let handle = self.get_or_create_session(thread_key).await?;
        let needs_full_context = handle.is_new || self.is_compacted(thread_key)?;

        let outcome = self
            .run_exchange(&handle.session_id, question, ctx, needs_full_context, reporter)
            .await?;

        self.set_compacted(thread_key, outcome.compacted)?;
        Ok(outcome)
    }
}
