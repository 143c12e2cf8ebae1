//! Cancellable, deadline-bearing call context.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};

/// Carries cancellation and an optional deadline through every storage and
/// client call.
///
/// Contexts form a tree: cancelling a parent cancels every child derived
/// from it, and a child's deadline is never later than its parent's.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A root context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A child context that is cancelled with this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// A child context that times out after `timeout`. A timeout past the
    /// representable range means no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// A child context that times out at `deadline` (or earlier, if this
    /// context's own deadline comes first).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Err(Cancelled)` or `Err(Timeout)` if the context is already done.
    pub fn check(&self) -> StorageResult<()> {
        if self.token.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StorageError::Timeout);
            }
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes,
    /// yielding the matching error.
    pub async fn done(&self) -> StorageError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => StorageError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => StorageError::Timeout,
            },
            None => {
                self.token.cancelled().await;
                StorageError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StorageError>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err.into()),
            out = fut => out,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
