//! Stream consumer for one question/answer exchange.
//!
//! # State Machine
//!
//! ```text
//! AwaitingFirstEvent ──text/tool──▶ Accumulating ──step-finish(stop)──▶ AnswerCaptured
//!         │                              │                                  │
//!         └──────────── idle ────────────┴──────── idle / compaction ───────┴──▶ Done
//! ```
//!
//! Once the answer is captured its text is frozen; only a compaction signal
//! (or idle) is still interpreted. A grace window bounds how long we wait for
//! that signal, and a hard ceiling bounds the whole exchange.

use crate::events::{MessageRole, RuntimeEvent, ToolStatus};
use crate::runtime::{AgentRuntime, EventSubscription, PromptPart};
use crate::throttle::ProgressThrottler;
use codeask_common::{Error, ExchangeConfig, Result};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Text returned when the agent produced no answer.
pub const FALLBACK_ANSWER: &str = "No answer was produced.";

/// Timing limits for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeLimits {
    pub progress_interval: Duration,
    pub grace_window: Duration,
    pub hard_ceiling: Duration,
}

impl Default for ExchangeLimits {
    fn default() -> Self {
        Self::from(&ExchangeConfig::default())
    }
}

impl From<&ExchangeConfig> for ExchangeLimits {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            progress_interval: config.progress_interval(),
            grace_window: config.grace_window(),
            hard_ceiling: config.hard_ceiling(),
        }
    }
}

/// Final result of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub text: String,
    /// The answer looks like a question back to the user
    pub is_question: bool,
    /// The agent compacted its memory after answering
    pub compacted: bool,
}

/// Classified answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub is_question: bool,
}

/// Decide what to show for the captured text.
///
/// Whether the agent is waiting on the user is a heuristic: the trimmed text
/// ends with a question mark.
pub fn classify_answer(latest_text: &str) -> Answer {
    let trimmed = latest_text.trim();
    if trimmed.is_empty() {
        return Answer {
            text: FALLBACK_ANSWER.to_string(),
            is_question: false,
        };
    }
    Answer {
        text: latest_text.to_string(),
        is_question: trimmed.ends_with('?') || trimmed.ends_with('？'),
    }
}

// ============================================================================
// Exchange State
// ============================================================================

/// Phase of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstEvent,
    Accumulating,
    AnswerCaptured,
    Done,
}

/// What the consumer loop should do after applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to report
    Continue,
    /// Forward this text to the progress throttler
    Progress(String),
    /// The answer was just captured; start the grace window
    AnswerCaptured,
    /// Stop consuming
    Done,
}

/// Per-exchange state driven by runtime events for a single session.
#[derive(Debug)]
pub struct ExchangeState {
    session_id: String,
    phase: Phase,
    latest_text: String,
    /// call id → tool name, ordered for stable progress text
    active_tools: BTreeMap<String, String>,
    user_messages: HashSet<String>,
    captured: bool,
    compacted: bool,
}

impl ExchangeState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            phase: Phase::AwaitingFirstEvent,
            latest_text: String::new(),
            active_tools: BTreeMap::new(),
            user_messages: HashSet::new(),
            captured: false,
            compacted: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn latest_text(&self) -> &str {
        &self.latest_text
    }

    pub fn answer_captured(&self) -> bool {
        self.captured
    }

    pub fn compacted(&self) -> bool {
        self.compacted
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Names of tools currently running, in call-id order.
    pub fn active_tools(&self) -> Vec<&str> {
        self.active_tools.values().map(String::as_str).collect()
    }

    /// Apply one event. Events for other sessions are ignored.
    pub fn apply(&mut self, event: &RuntimeEvent) -> Result<Step> {
        if self.phase == Phase::Done {
            return Ok(Step::Done);
        }
        match event.session_id() {
            Some(id) if id == self.session_id => {}
            // Errors without a session id apply to everyone.
            None if matches!(event, RuntimeEvent::SessionError { .. }) => {}
            _ => return Ok(Step::Continue),
        }

        if self.phase == Phase::AnswerCaptured {
            return Ok(self.apply_after_capture(event));
        }

        match event {
            RuntimeEvent::MessageUpdated {
                message_id, role, ..
            } => {
                if *role == MessageRole::User {
                    self.user_messages.insert(message_id.clone());
                }
                Ok(Step::Continue)
            }
            RuntimeEvent::TextUpdated {
                message_id, text, ..
            } => {
                if self.user_messages.contains(message_id) {
                    return Ok(Step::Continue);
                }
                self.phase = Phase::Accumulating;
                self.latest_text = text.clone();
                if text.trim().is_empty() {
                    Ok(Step::Continue)
                } else {
                    Ok(Step::Progress(text.clone()))
                }
            }
            RuntimeEvent::ToolUpdated {
                call_id,
                tool,
                status,
                ..
            } => {
                self.phase = Phase::Accumulating;
                match status {
                    ToolStatus::Running => {
                        self.active_tools.insert(call_id.clone(), tool.clone());
                        Ok(Step::Progress(self.tool_progress()))
                    }
                    ToolStatus::Completed | ToolStatus::Error => {
                        self.active_tools.remove(call_id);
                        Ok(Step::Continue)
                    }
                    ToolStatus::Pending | ToolStatus::Unknown => Ok(Step::Continue),
                }
            }
            RuntimeEvent::StepFinished { reason, .. } if reason == "stop" => {
                self.phase = Phase::AnswerCaptured;
                self.captured = true;
                Ok(Step::AnswerCaptured)
            }
            RuntimeEvent::SessionIdle { .. } => {
                self.phase = Phase::Done;
                Ok(Step::Done)
            }
            RuntimeEvent::SessionError { message, .. } => {
                self.phase = Phase::Done;
                Err(Error::External(message.clone()))
            }
            // Compaction before the answer is part of normal work.
            RuntimeEvent::StepFinished { .. }
            | RuntimeEvent::Compacted { .. }
            | RuntimeEvent::Other => Ok(Step::Continue),
        }
    }

    fn apply_after_capture(&mut self, event: &RuntimeEvent) -> Step {
        match event {
            RuntimeEvent::Compacted { .. } => {
                self.compacted = true;
                self.phase = Phase::Done;
                Step::Done
            }
            RuntimeEvent::SessionIdle { .. } => {
                self.phase = Phase::Done;
                Step::Done
            }
            _ => Step::Continue,
        }
    }

    fn tool_progress(&self) -> String {
        let tools = self.active_tools().join(", ");
        if self.latest_text.trim().is_empty() {
            format!("Using: {tools}…")
        } else {
            format!("{} — Using: {tools}…", self.latest_text.trim_end())
        }
    }

    /// Mark the exchange finished (timeout or end of stream).
    pub fn finish(&mut self) {
        self.phase = Phase::Done;
    }

    /// Produce the outcome from whatever was captured.
    pub fn outcome(&self) -> ExchangeOutcome {
        let answer = classify_answer(&self.latest_text);
        ExchangeOutcome {
            text: answer.text,
            is_question: answer.is_question,
            compacted: self.compacted,
        }
    }
}

// ============================================================================
// Consumer Loop
// ============================================================================

/// Why the consumer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Resolved,
    GraceElapsed,
    HardCeiling,
    StreamEnded,
}

/// Submit a prompt and drive the exchange to completion.
///
/// The subscription is opened before the prompt is submitted and is closed
/// on every exit path.
pub async fn run_exchange(
    runtime: &dyn AgentRuntime,
    session_id: &str,
    agent: Option<&str>,
    parts: &[PromptPart],
    throttler: &ProgressThrottler,
    limits: ExchangeLimits,
) -> Result<ExchangeOutcome> {
    let started = Instant::now();
    let mut subscription = runtime.subscribe_events().await?;

    let result = async {
        runtime.submit_question(session_id, agent, parts).await?;
        consume(&mut subscription, session_id, throttler, limits, started).await
    }
    .await;

    subscription.close();
    throttler.stop();

    let outcome = result?;
    tracing::info!(
        session_id = %session_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        is_question = outcome.is_question,
        compacted = outcome.compacted,
        "Exchange finished"
    );
    Ok(outcome)
}

/// Consume events until the exchange resolves or a time limit is hit.
pub async fn consume(
    subscription: &mut EventSubscription,
    session_id: &str,
    throttler: &ProgressThrottler,
    limits: ExchangeLimits,
    started: Instant,
) -> Result<ExchangeOutcome> {
    let mut state = ExchangeState::new(session_id);
    let hard_deadline = started + limits.hard_ceiling;
    let mut grace_deadline: Option<Instant> = None;

    let termination = loop {
        let deadline = grace_deadline.map_or(hard_deadline, |g| g.min(hard_deadline));

        let next = tokio::select! {
            next = subscription.next() => next,
            _ = tokio::time::sleep_until(deadline) => {
                break if grace_deadline.is_some_and(|g| g <= hard_deadline) {
                    Termination::GraceElapsed
                } else {
                    Termination::HardCeiling
                };
            }
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                tracing::error!(session_id = %session_id, error = %e, "Event stream failed mid-exchange");
                return Err(e);
            }
            None => break Termination::StreamEnded,
        };

        match state.apply(&event)? {
            Step::Continue => {}
            Step::Progress(text) => throttler.update(text),
            Step::AnswerCaptured => {
                tracing::debug!(session_id = %session_id, "Answer captured, waiting for compaction or idle");
                grace_deadline = Some(Instant::now() + limits.grace_window);
            }
            Step::Done => break Termination::Resolved,
        }
    };

    match termination {
        Termination::Resolved => {}
        Termination::GraceElapsed => {
            tracing::debug!(session_id = %session_id, "Grace window elapsed without compaction");
        }
        Termination::HardCeiling => {
            tracing::warn!(
                session_id = %session_id,
                ceiling_secs = limits.hard_ceiling.as_secs(),
                "Exchange hit the hard ceiling, using partial answer"
            );
        }
        Termination::StreamEnded => {
            if !state.answer_captured() {
                return Err(Error::Stream(
                    "event stream closed before the answer was complete".into(),
                ));
            }
            tracing::debug!(session_id = %session_id, "Event stream ended after answer capture");
        }
    }

    state.finish();
    Ok(state.outcome())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ProgressReporter;
    use async_trait::async_trait;
    use std::sync::Arc;
    use test_case::test_case;

    fn text(session: &str, message: &str, body: &str) -> RuntimeEvent {
        RuntimeEvent::TextUpdated {
            session_id: session.into(),
            message_id: message.into(),
            text: body.into(),
        }
    }

    fn tool(session: &str, call: &str, name: &str, status: ToolStatus) -> RuntimeEvent {
        RuntimeEvent::ToolUpdated {
            session_id: session.into(),
            call_id: call.into(),
            tool: name.into(),
            status,
        }
    }

    fn stop(session: &str) -> RuntimeEvent {
        RuntimeEvent::StepFinished {
            session_id: session.into(),
            reason: "stop".into(),
        }
    }

    #[test_case("Answer.", false ; "statement")]
    #[test_case("Which file?", true ; "question")]
    #[test_case("Which file?  \n", true ; "trailing whitespace")]
    #[test_case("Is it this? No, it is in lib.rs.", false ; "question mid text")]
    fn test_classify_answer(input: &str, is_question: bool) {
        let answer = classify_answer(input);
        assert_eq!(answer.is_question, is_question);
        assert_eq!(answer.text, input);
    }

    #[test]
    fn test_classify_empty_uses_fallback() {
        let answer = classify_answer("  ");
        assert_eq!(answer.text, FALLBACK_ANSWER);
        assert!(!answer.is_question);
    }

    #[test]
    fn test_phases() {
        let mut state = ExchangeState::new("s1");
        assert_eq!(state.phase(), Phase::AwaitingFirstEvent);

        assert_eq!(
            state.apply(&text("s1", "m1", "Looking")).unwrap(),
            Step::Progress("Looking".into())
        );
        assert_eq!(state.phase(), Phase::Accumulating);

        assert_eq!(state.apply(&stop("s1")).unwrap(), Step::AnswerCaptured);
        assert_eq!(state.phase(), Phase::AnswerCaptured);
        assert!(state.answer_captured());

        assert_eq!(
            state
                .apply(&RuntimeEvent::SessionIdle {
                    session_id: "s1".into()
                })
                .unwrap(),
            Step::Done
        );
        assert!(state.is_done());
        assert!(!state.compacted());
    }

    #[test]
    fn test_text_replaces_rather_than_appends() {
        let mut state = ExchangeState::new("s1");
        state.apply(&text("s1", "m1", "The")).unwrap();
        state.apply(&text("s1", "m1", "The answer")).unwrap();
        assert_eq!(state.latest_text(), "The answer");
    }

    #[test]
    fn test_empty_text_is_not_forwarded() {
        let mut state = ExchangeState::new("s1");
        assert_eq!(state.apply(&text("s1", "m1", "")).unwrap(), Step::Continue);
    }

    #[test]
    fn test_tool_tracking_and_progress_text() {
        let mut state = ExchangeState::new("s1");
        state.apply(&text("s1", "m1", "Checking the router")).unwrap();

        let step = state
            .apply(&tool("s1", "c1", "grep", ToolStatus::Running))
            .unwrap();
        assert_eq!(step, Step::Progress("Checking the router — Using: grep…".into()));

        let step = state
            .apply(&tool("s1", "c2", "read", ToolStatus::Running))
            .unwrap();
        assert_eq!(
            step,
            Step::Progress("Checking the router — Using: grep, read…".into())
        );

        state
            .apply(&tool("s1", "c1", "grep", ToolStatus::Completed))
            .unwrap();
        assert_eq!(state.active_tools(), vec!["read"]);
        state
            .apply(&tool("s1", "c2", "read", ToolStatus::Error))
            .unwrap();
        assert!(state.active_tools().is_empty());
    }

    #[test]
    fn test_tool_progress_without_text() {
        let mut state = ExchangeState::new("s1");
        let step = state
            .apply(&tool("s1", "c1", "glob", ToolStatus::Running))
            .unwrap();
        assert_eq!(step, Step::Progress("Using: glob…".into()));
    }

    #[test]
    fn test_answer_frozen_after_capture() {
        let mut state = ExchangeState::new("s1");
        state.apply(&text("s1", "m1", "Final answer.")).unwrap();
        state.apply(&stop("s1")).unwrap();

        assert_eq!(
            state.apply(&text("s1", "m2", "Something else")).unwrap(),
            Step::Continue
        );
        assert_eq!(
            state
                .apply(&tool("s1", "c1", "read", ToolStatus::Running))
                .unwrap(),
            Step::Continue
        );
        assert_eq!(state.latest_text(), "Final answer.");
    }

    #[test]
    fn test_compaction_only_counts_after_capture() {
        let mut state = ExchangeState::new("s1");
        let compacted = RuntimeEvent::Compacted {
            session_id: "s1".into(),
        };

        assert_eq!(state.apply(&compacted).unwrap(), Step::Continue);
        assert!(!state.compacted());

        state.apply(&stop("s1")).unwrap();
        assert_eq!(state.apply(&compacted).unwrap(), Step::Done);
        assert!(state.compacted());
    }

    #[test]
    fn test_other_sessions_ignored() {
        let mut state = ExchangeState::new("s1");
        state.apply(&text("s2", "m1", "not mine")).unwrap();
        state.apply(&stop("s2")).unwrap();
        state
            .apply(&RuntimeEvent::SessionIdle {
                session_id: "s2".into(),
            })
            .unwrap();

        assert_eq!(state.phase(), Phase::AwaitingFirstEvent);
        assert_eq!(state.latest_text(), "");
    }

    #[test]
    fn test_non_stop_step_finish_keeps_accumulating() {
        let mut state = ExchangeState::new("s1");
        let step = state
            .apply(&RuntimeEvent::StepFinished {
                session_id: "s1".into(),
                reason: "tool-calls".into(),
            })
            .unwrap();
        assert_eq!(step, Step::Continue);
        assert_ne!(state.phase(), Phase::AnswerCaptured);
    }

    #[test]
    fn test_user_message_text_ignored() {
        let mut state = ExchangeState::new("s1");
        state
            .apply(&RuntimeEvent::MessageUpdated {
                session_id: "s1".into(),
                message_id: "m_user".into(),
                role: MessageRole::User,
            })
            .unwrap();

        assert_eq!(
            state.apply(&text("s1", "m_user", "<question>hi</question>")).unwrap(),
            Step::Continue
        );
        assert_eq!(state.latest_text(), "");
    }

    #[test]
    fn test_session_error_is_fatal() {
        let mut state = ExchangeState::new("s1");
        let err = state
            .apply(&RuntimeEvent::SessionError {
                session_id: Some("s1".into()),
                message: "provider overloaded".into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::External(m) if m == "provider overloaded"));

        let mut other = ExchangeState::new("s1");
        assert_eq!(
            other
                .apply(&RuntimeEvent::SessionError {
                    session_id: Some("s2".into()),
                    message: "not ours".into(),
                })
                .unwrap(),
            Step::Continue
        );
    }

    /// Chat API that accepts the request and never answers.
    struct StalledReporter;

    #[async_trait]
    impl ProgressReporter for StalledReporter {
        async fn report(&self, _text: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_ceiling_holds_while_progress_delivery_stalls() {
        let limits = ExchangeLimits {
            progress_interval: Duration::from_millis(10),
            grace_window: Duration::from_secs(30),
            hard_ceiling: Duration::from_secs(600),
        };
        let throttler = ProgressThrottler::new(Arc::new(StalledReporter), limits.progress_interval);
        let (tx, mut subscription) = EventSubscription::channel(8);
        tx.send(Ok(text("s1", "m1", "Reading the router"))).await.unwrap();
        tx.send(Ok(tool("s1", "c1", "grep", ToolStatus::Running)))
            .await
            .unwrap();

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            consume(&mut subscription, "s1", &throttler, limits, started),
        )
        .await
        .expect("consume ignored the hard ceiling")
        .unwrap();
        throttler.stop();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(600) && elapsed < Duration::from_secs(601));
        assert_eq!(outcome.text, "Reading the router");
        drop(tx);
    }
}
