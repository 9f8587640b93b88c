//! Single-assignment completion signal for one inbound request

use bytes::Bytes;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tokio::sync::Notify;

use crate::error::RequestFailure;
use crate::utils::elapsed_ms;

pub type Outcome = std::result::Result<Bytes, RequestFailure>;

/// Labelled timestamp recorded while a request is being served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub label: String,
    pub elapsed_ms: u64,
}

/// Completion handle shared between the inbound server, the aggregator and
/// any watchdog. The first `try_succeed`/`try_fail` wins; every later
/// attempt is a no-op that reports `false`.
#[derive(Clone)]
pub struct RequestCompletion {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    outcome: OnceLock<Outcome>,
    done: Notify,
    checkpoints: Option<Mutex<Vec<Checkpoint>>>,
    started: Instant,
}

impl RequestCompletion {
    pub fn new(trace: bool) -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                outcome: OnceLock::new(),
                done: Notify::new(),
                checkpoints: trace.then(|| Mutex::new(Vec::new())),
                started: Instant::now(),
            }),
        }
    }

    pub fn try_succeed(&self, payload: Bytes) -> bool {
        self.complete(Ok(payload))
    }

    pub fn try_fail(&self, failure: impl Into<RequestFailure>) -> bool {
        self.complete(Err(failure.into()))
    }

    fn complete(&self, outcome: Outcome) -> bool {
        let won = self.inner.outcome.set(outcome).is_ok();
        if won {
            self.checkpoint(if self.is_success() { "succeeded" } else { "failed" });
            self.inner.done.notify_waiters();
        }
        won
    }

    pub fn is_done(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    fn is_success(&self) -> bool {
        matches!(self.inner.outcome.get(), Some(Ok(_)))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.outcome.get().cloned()
    }

    /// Wait for the terminal outcome
    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not lost
            notified.as_mut().enable();
            if let Some(outcome) = self.inner.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Record a tracing checkpoint. Ignored unless tracing was enabled.
    pub fn checkpoint(&self, label: &str) {
        if let Some(checkpoints) = &self.inner.checkpoints {
            if let Ok(mut checkpoints) = checkpoints.lock() {
                checkpoints.push(Checkpoint {
                    label: label.to_string(),
                    elapsed_ms: elapsed_ms(self.inner.started),
                });
            }
        }
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner
            .checkpoints
            .as_ref()
            .and_then(|checkpoints| checkpoints.lock().ok().map(|c| c.clone()))
            .unwrap_or_default()
    }

    pub fn elapsed_ms(&self) -> u64 {
        elapsed_ms(self.inner.started)
    }
}
