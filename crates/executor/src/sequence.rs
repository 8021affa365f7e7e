//! Demand-driven result sequences
//!
//! A [`ResultSequence`] is the consumer half and an [`Emitter`] the producer
//! half of a single-consumer asynchronous sequence with explicit demand:
//!
//! - The consumer grants demand with [`ResultSequence::request`]; polling the
//!   sequence as a [`Stream`] grants demand for one item whenever none is
//!   outstanding.
//! - The producer suspends in [`Emitter::emit`] until demand is available, so
//!   it never emits more items than were requested.
//! - Cancellation is a separate signal observed by the producer at every
//!   suspension point. Dropping the sequence cancels it.
//! - Exactly one terminal signal is delivered: completion, error, or
//!   cancellation.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecutorError;

enum Signal<T> {
    Item(T),
    Error(ExecutorError),
    Complete,
}

/// Returned by [`Emitter::emit`] once the consumer has cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("result sequence was cancelled")]
pub struct Cancelled;

/// Create a connected emitter / sequence pair
///
/// `cancel` is observed by the emitter; cancelling it (directly, through a
/// parent token, or through [`ResultSequence::cancel`]) stops emission.
pub fn channel<T>(cancel: CancellationToken) -> (Emitter<T>, ResultSequence<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let demand = Arc::new(Semaphore::new(0));

    let emitter = Emitter {
        tx,
        demand: Arc::clone(&demand),
        cancel: cancel.clone(),
    };
    let sequence = ResultSequence {
        rx,
        demand,
        cancel,
        outstanding: 0,
        terminated: false,
    };
    (emitter, sequence)
}

/// Producer half of a [`ResultSequence`]
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    demand: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<T> Emitter<T> {
    /// Emit one item, waiting for consumer demand first
    pub async fn emit(&self, item: T) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Cancelled),
            permit = self.demand.acquire() => match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(Cancelled),
            },
        }
        self.tx.send(Signal::Item(item)).map_err(|_| Cancelled)
    }

    /// Terminate the sequence normally
    pub fn complete(self) {
        let _ = self.tx.send(Signal::Complete);
    }

    /// Terminate the sequence with an error
    pub fn fail(self, error: ExecutorError) {
        let _ = self.tx.send(Signal::Error(error));
    }

    /// Whether the consumer has cancelled (or gone away)
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the sequence is cancelled
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Token observed by this emitter
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Consumer half: a demand-driven, single-consumer result sequence
///
/// Yields `Ok(item)` for each emitted item, at most one `Err` (fail-fast
/// termination), then ends.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut results = executor.write_reactive_stream(statements);
/// results.request(16);
/// while let Some(result) = results.next().await {
///     let result = result?;
///     // ...
/// }
/// ```
pub struct ResultSequence<T> {
    rx: mpsc::UnboundedReceiver<Signal<T>>,
    demand: Arc<Semaphore>,
    cancel: CancellationToken,
    outstanding: usize,
    terminated: bool,
}

impl<T> ResultSequence<T> {
    /// Grant demand for `n` more items
    ///
    /// A request of zero is ignored. Demand saturates at the semaphore
    /// capacity, which is effectively unbounded.
    pub fn request(&mut self, n: usize) {
        if n == 0 || self.terminated {
            return;
        }
        let room = Semaphore::MAX_PERMITS - self.demand.available_permits();
        let granted = n.min(room);
        self.demand.add_permits(granted);
        self.outstanding = self.outstanding.saturating_add(granted);
    }

    /// Cancel the sequence
    ///
    /// No further items are delivered. Operations already dispatched run to
    /// completion and release their admission slots; their results are
    /// dropped.
    pub fn cancel(&mut self) {
        if !self.terminated {
            debug!("Result sequence cancelled by consumer");
        }
        self.terminated = true;
        self.cancel.cancel();
        self.demand.close();
        self.rx.close();
    }

    /// Whether a terminal signal has been observed (or the sequence cancelled)
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Demand granted but not yet satisfied
    pub fn outstanding_demand(&self) -> usize {
        self.outstanding
    }
}

impl<T> Stream for ResultSequence<T> {
    type Item = Result<T, ExecutorError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        if this.outstanding == 0 {
            this.request(1);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Item(item))) => {
                this.outstanding = this.outstanding.saturating_sub(1);
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Signal::Error(error))) => {
                this.terminated = true;
                this.cancel.cancel();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Signal::Complete)) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(Some(Err(ExecutorError::ProducerAborted)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for ResultSequence<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
