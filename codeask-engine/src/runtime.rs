//! Agent runtime client.
//!
//! The engine needs three capabilities from the runtime: mint a session,
//! submit a prompt to it, and follow the shared live event feed. They are
//! expressed by the [`AgentRuntime`] trait; [`HttpAgentRuntime`] implements
//! it against the runtime's REST + SSE API.
//!
//! # Architecture
//!
//! ```text
//! Agent runtime                          codeask-engine
//! ┌──────────────────┐  POST /session    ┌──────────────────┐
//! │                  │ ◀──────────────── │ SessionDirectory │
//! │                  │  POST .../prompt  │                  │
//! │                  │ ◀──────────────── │ Exchange         │
//! │  GET /event      │  SSE stream       │                  │
//! │                  │ ────────────────▶ │ EventSubscription│
//! └──────────────────┘                   └──────────────────┘
//! ```

use crate::events::RuntimeEvent;
use async_trait::async_trait;
use codeask_common::{Error, Result, RuntimeConfig, Validate};
use eventsource_client::{Client, ReconnectOptions, SSE};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Buffered events per subscription before the reader applies backpressure.
const EVENT_BUFFER: usize = 256;

// ============================================================================
// Prompt Types
// ============================================================================

/// One part of a prompt submitted to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptPart {
    Text {
        text: String,
    },
    File {
        mime: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
    parts: &'a [PromptPart],
}

// ============================================================================
// Runtime Trait
// ============================================================================

/// Capabilities the engine consumes from the agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a new runtime session and return its id.
    async fn create_session(&self, title: &str) -> Result<String>;

    /// Submit a prompt to a session without waiting for the answer.
    ///
    /// The answer arrives on the event feed.
    async fn submit_question(
        &self,
        session_id: &str,
        agent: Option<&str>,
        parts: &[PromptPart],
    ) -> Result<()>;

    /// Open the shared live event feed.
    ///
    /// Returns once the feed is connected, so events caused by a prompt
    /// submitted afterwards are not missed.
    async fn subscribe_events(&self) -> Result<EventSubscription>;
}

// ============================================================================
// Event Subscription
// ============================================================================

/// An open event feed owned by exactly one exchange.
///
/// Yields decoded events until the feed ends (`None`) or fails (`Some(Err)`).
/// Closing (or dropping) the subscription stops the background reader.
pub struct EventSubscription {
    rx: mpsc::Receiver<Result<RuntimeEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl EventSubscription {
    /// Wrap a receiver fed by a background reader task.
    pub fn new(rx: mpsc::Receiver<Result<RuntimeEvent>>, reader: Option<JoinHandle<()>>) -> Self {
        Self { rx, reader }
    }

    /// Create a subscription fed directly through the returned sender.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<RuntimeEvent>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx, None))
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<Result<RuntimeEvent>> {
        self.rx.recv().await
    }

    /// Release the feed.
    pub fn close(&mut self) {
        self.rx.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// HTTP Runtime
// ============================================================================

/// Agent runtime reached over HTTP.
///
/// Constructed from a validated [`RuntimeConfig`]; an unconfigured client
/// cannot be built.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    endpoint: String,
    directory: Option<String>,
    connect_timeout: Duration,
}

impl HttpAgentRuntime {
    /// Create a client for the configured runtime.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim().trim_end_matches('/').to_string(),
            directory: config.directory.clone(),
            connect_timeout: config.connect_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<reqwest::Url> {
        let base = format!("{}{}", self.endpoint, path);
        let url = match &self.directory {
            Some(dir) => reqwest::Url::parse_with_params(&base, &[("directory", dir.as_str())]),
            None => reqwest::Url::parse(&base),
        };
        url.map_err(|e| Error::Config(format!("Invalid runtime URL '{base}': {e}")))
    }

    /// Turn a non-2xx response into an `External` error.
    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::External(format!("{action} failed with {status}: {body}")))
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn create_session(&self, title: &str) -> Result<String> {
        let url = self.url("/session")?;
        tracing::debug!(endpoint = %url, title = %title, "Creating runtime session");

        let response = self
            .client
            .post(url)
            .json(&CreateSessionRequest { title })
            .send()
            .await?;
        let created: CreateSessionResponse = Self::check(response, "create session")
            .await?
            .json()
            .await?;

        tracing::info!(session_id = %created.id, "Runtime session created");
        Ok(created.id)
    }

    async fn submit_question(
        &self,
        session_id: &str,
        agent: Option<&str>,
        parts: &[PromptPart],
    ) -> Result<()> {
        let url = self.url(&format!("/session/{session_id}/prompt_async"))?;
        tracing::debug!(
            session_id = %session_id,
            agent = ?agent,
            parts = parts.len(),
            "Submitting prompt"
        );

        let response = self
            .client
            .post(url)
            .json(&PromptRequest { agent, parts })
            .send()
            .await?;
        Self::check(response, "submit prompt").await?;
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<EventSubscription> {
        let url = self.url("/event")?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        let reader = tokio::spawn(read_event_stream(url.to_string(), tx, ready_tx));

        let outcome = match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Stream("event reader stopped before connecting".into())),
            Err(_) => Err(Error::Stream(format!(
                "timed out after {}s connecting to event stream",
                self.connect_timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(()) => Ok(EventSubscription::new(rx, Some(reader))),
            Err(e) => {
                reader.abort();
                Err(e)
            }
        }
    }
}

/// Read the SSE feed and forward decoded events.
///
/// `ready` resolves once the connection is established (or fails). Automatic
/// reconnection is off: a dropped feed ends the subscription.
async fn read_event_stream(
    url: String,
    tx: mpsc::Sender<Result<RuntimeEvent>>,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);

    let client = match eventsource_client::ClientBuilder::for_url(&url) {
        Ok(builder) => builder
            .reconnect(ReconnectOptions::reconnect(false).build())
            .build(),
        Err(e) => {
            if let Some(ready) = ready.take() {
                let _ = ready.send(Err(Error::Stream(format!("Invalid event URL: {e}"))));
            }
            return;
        }
    };

    let mut stream = client.stream();

    while let Some(item) = stream.next().await {
        match item {
            Ok(SSE::Connected(_)) => {
                tracing::debug!(url = %url, "Event stream connected");
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
            }
            Ok(SSE::Event(ev)) => {
                let event = RuntimeEvent::decode(&ev.data);
                if event == RuntimeEvent::Other {
                    continue;
                }
                if tx.send(Ok(event)).await.is_err() {
                    tracing::debug!("Event receiver dropped");
                    return;
                }
            }
            Ok(SSE::Comment(_)) => {
                // Heartbeats
            }
            Err(e) => {
                tracing::error!(error = %e, "Event stream error");
                let err = Error::Stream(format!("Event stream error: {e}"));
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(err));
                    }
                    None => {
                        let _ = tx.send(Err(err)).await;
                    }
                }
                return;
            }
        }
    }

    tracing::debug!(url = %url, "Event stream ended");
    if let Some(ready) = ready.take() {
        let _ = ready.send(Err(Error::Stream("event stream ended before connecting".into())));
    }
}

// ============================================================================
// Tests
// ============================================================================
