//! Per-request cancellation and deadline carried into every store query.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct QueryCtx {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryCtx {
    /// A context with no deadline that is never cancelled unless asked to.
    pub fn background() -> Self {
        QueryCtx::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        QueryCtx { cancel: CancellationToken::new(), deadline: Some(Instant::now() + timeout) }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        QueryCtx { cancel: CancellationToken::new(), deadline: Some(deadline) }
    }

    /// Derives a context that is cancelled along with `self` and never outlives it.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(d), Some(t)) => Some(d.min(Instant::now() + t)),
            (Some(d), None) => Some(d),
            (None, Some(t)) => Some(Instant::now() + t),
            (None, None) => None,
        };
        QueryCtx { cancel: self.cancel.child_token(), deadline }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deadline for one statement: the caller's deadline capped by `backstop`.
    pub fn statement_deadline(&self, backstop: Duration) -> Instant {
        let cap = Instant::now() + backstop;
        match self.deadline {
            Some(d) => d.min(cap),
            None => cap,
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
