//! Single-consumer watch stream handle.
//!
//! A backend creates a pair with [`watch_channel`], keeps the
//! [`WatchSender`] in its producer task, and returns the [`WatchStream`] to
//! the caller. The stream ends when the caller calls [`WatchStream::stop`],
//! when the issuing context is cancelled or times out, or when the producer
//! goes away. Once ended, reads keep returning `None`.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::types::WatchEvent;

/// Create a connected sender/stream pair bound to `ctx`.
pub fn watch_channel(ctx: &Context, capacity: usize) -> (WatchSender, WatchStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stop = ctx.token().child_token();
    (
        WatchSender {
            tx,
            stop: stop.clone(),
            deadline: ctx.deadline(),
        },
        WatchStream {
            rx,
            stop,
            closed: false,
        },
    )
}

/// Read end of a watch.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent>,
    stop: CancellationToken,
    closed: bool,
}

impl WatchStream {
    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        if self.closed {
            return None;
        }
        let event = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            event = self.rx.recv() => event,
        };
        if event.is_none() {
            self.close();
        }
        event
    }

    /// Stop the watch. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// A token that stops this stream from elsewhere when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.closed || self.stop.is_cancelled()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stop.cancel();
            self.rx.close();
        }
    }
}

impl Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        if self.stop.is_cancelled() {
            self.close();
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                self.close();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Producer end of a watch, held by the backend.
#[derive(Debug)]
pub struct WatchSender {
    tx: mpsc::Sender<WatchEvent>,
    stop: CancellationToken,
    deadline: Option<Instant>,
}

impl WatchSender {
    /// Deliver one event. Returns `false` once the consumer has stopped,
    /// after which the producer should exit.
    pub async fn send(&self, event: WatchEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.stopped() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Resolves when the consumer stops, the issuing context is cancelled,
    /// or its deadline passes.
    pub async fn stopped(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.stop.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => self.stop.cancel(),
            },
            None => self.stop.cancelled().await,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }
}
