//! Progress throttling.
//!
//! Coalesces frequent status updates into at most one outward notification
//! per interval. The latest text always wins: intermediate updates that
//! arrive inside an interval are replaced, never delivered.

use crate::traits::ProgressReporter;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct ThrottleState {
    last_emit: Option<Instant>,
    pending: Option<String>,
    /// Delivery task; at most one exists at a time.
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

struct Shared {
    reporter: Arc<dyn ProgressReporter>,
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        // The state is plain data; a poisoned lock still holds a usable value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Rate-limited progress channel for one exchange.
///
/// Callers never wait on the reporter: [`update`](Self::update) only records
/// the text, and a single throttler-owned task performs deliveries in order.
pub struct ProgressThrottler {
    shared: Arc<Shared>,
}

impl ProgressThrottler {
    pub fn new(reporter: Arc<dyn ProgressReporter>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                reporter,
                interval,
                state: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    /// Offer a new progress text.
    ///
    /// Delivered right away when the interval since the last notification
    /// has elapsed; otherwise held as pending and delivered at the end of
    /// the interval (if nothing newer replaces it first).
    pub fn update(&self, text: impl Into<String>) {
        let mut state = self.shared.state();
        if state.stopped {
            return;
        }
        state.pending = Some(text.into());
        if state.worker.is_none() {
            state.worker = Some(tokio::spawn(deliver_pending(self.shared.clone())));
        }
    }

    /// Cancel any pending or in-flight delivery. Later updates are ignored.
    pub fn stop(&self) {
        let mut state = self.shared.state();
        state.stopped = true;
        state.pending = None;
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for ProgressThrottler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deliver pending texts one at a time, spaced by the interval, until
/// nothing is pending.
async fn deliver_pending(shared: Arc<Shared>) {
    loop {
        let wait = {
            let state = shared.state();
            state
                .last_emit
                .map(|last| (last + shared.interval).saturating_duration_since(Instant::now()))
                .unwrap_or_default()
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let text = {
            let mut state = shared.state();
            match state.pending.take() {
                Some(text) if !state.stopped => {
                    state.last_emit = Some(Instant::now());
                    text
                }
                _ => {
                    state.worker = None;
                    return;
                }
            }
        };

        if let Err(e) = shared.reporter.report(&text).await {
            tracing::warn!(error = %e, "Failed to deliver progress update");
        }
    }
}
