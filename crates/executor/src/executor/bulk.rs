//! Bulk executor
//!
//! Dispatches statements to a [`Session`] under admission control and
//! delivers outcomes as demand-driven [`ResultSequence`]s.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, FutureExt, Stream, StreamExt, TryStreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::builder::BulkExecutorBuilder;
use super::fetch::RowFetcher;
use crate::admission::{InFlightLimiter, InFlightPermit, RateGate};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, StatementError};
use crate::listener::{ExecutionContext, ExecutionListener, OperationKind};
use crate::result::{ReadResult, WriteResult};
use crate::sequence::{self, Emitter, ResultSequence};
use crate::session::Session;

/// Result sequence of a write operation
pub type WriteSequence<S> = ResultSequence<WriteResult<<S as Session>::Statement>>;

/// Result sequence of a read operation
pub type ReadSequence<S> =
    ResultSequence<ReadResult<<S as Session>::Statement, <S as Session>::Row>>;

/// Total of a dispatch whose input is not exhausted yet
const UNKNOWN_TOTAL: u64 = u64::MAX;

/// A finished write on its way to the consumer
struct Completion<St> {
    result: Result<WriteResult<St>, ExecutorError>,
    // Returned once the result has been handed to the consumer
    _window: OwnedSemaphorePermit,
}

/// Admission-controlled bulk executor
///
/// Every session call first takes an in-flight slot, then a rate token. The
/// slot is held until the call resolves. Both limits belong to this executor
/// instance and are shared by all of its clones.
///
/// In fail-fast mode (the default) the first statement failure terminates
/// the result sequence with [`ExecutorError::Statement`]; results of
/// operations still in flight at that point are discarded. In fail-safe mode
/// failures are delivered as failed results and the sequence continues.
///
/// # Example
///
/// ```ignore
/// use futures::{stream, StreamExt};
///
/// let executor = BulkExecutor::builder(Arc::new(session))
///     .with_max_in_flight(64)
///     .build()?;
///
/// let mut results = executor.write_reactive_stream(stream::iter(statements));
/// while let Some(result) = results.next().await {
///     let result = result?;
///     tracker.update(&resource, result.statement().position)?;
/// }
/// ```
pub struct BulkExecutor<S: Session> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: Session> {
    session: Arc<S>,
    config: ExecutorConfig,
    rate: RateGate,
    limiter: InFlightLimiter,
    fetcher: Arc<dyn RowFetcher<S>>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl<S: Session> Clone for BulkExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> BulkExecutor<S> {
    /// Start building an executor for `session`
    pub fn builder(session: Arc<S>) -> BulkExecutorBuilder<S> {
        BulkExecutorBuilder::new(session)
    }

    pub(crate) fn from_parts(
        session: Arc<S>,
        config: ExecutorConfig,
        fetcher: Arc<dyn RowFetcher<S>>,
        listeners: Vec<Arc<dyn ExecutionListener>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                rate: RateGate::from_rate(config.max_per_second),
                limiter: InFlightLimiter::new(config.max_in_flight),
                config,
                fetcher,
                listeners,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Effective configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Name of the read strategy selected at build time
    pub fn read_strategy(&self) -> &'static str {
        self.inner.fetcher.name()
    }

    /// Number of currently outstanding session calls
    pub fn in_flight(&self) -> usize {
        self.inner.limiter.outstanding()
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Reject new operations and stop dispatch in all open sequences
    ///
    /// Session calls already dispatched run to completion. Open sequences
    /// terminate with [`ExecutorError::Closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!(in_flight = self.in_flight(), "Closing bulk executor");
            self.inner.shutdown.cancel();
        }
    }

    /// Wait until no session call is outstanding
    #[instrument(skip(self))]
    pub async fn drain(&self, timeout: Duration) -> Result<(), ExecutorError> {
        info!(in_flight = self.in_flight(), "Draining bulk executor");
        self.inner.limiter.wait_idle(timeout).await
    }

    /// Execute one write and wait for its result
    ///
    /// In fail-fast mode a statement failure is returned as
    /// [`ExecutorError::Statement`]; in fail-safe mode as a failed result.
    pub async fn write_sync(
        &self,
        statement: impl Into<Arc<S::Statement>>,
    ) -> Result<WriteResult<S::Statement>, ExecutorError> {
        self.ensure_open()?;
        let statement = statement.into();

        let slot = self
            .admit(&self.inner.shutdown)
            .await
            .ok_or(ExecutorError::Closed)?;
        let outcome = self.execute_write(&statement).await;
        drop(slot);

        match outcome? {
            Err(err) if !self.inner.config.fail_safe => Err(ExecutorError::Statement(err)),
            outcome => Ok(WriteResult::from_outcome(statement, outcome)),
        }
    }

    /// Execute one write, delivering its result as a sequence
    pub fn write_reactive(&self, statement: impl Into<Arc<S::Statement>>) -> WriteSequence<S> {
        let statement: Arc<S::Statement> = statement.into();
        self.write_reactive_stream(stream::once(async move { statement }))
    }

    /// Execute a stream of writes, delivering results in completion order
    ///
    /// `statements` is only pulled when a slot is available for the next
    /// statement and fewer than `max_in_flight` results are waiting for
    /// consumer demand, so a slow consumer slows down the producer.
    pub fn write_reactive_stream<I>(&self, statements: I) -> WriteSequence<S>
    where
        I: Stream + Send + 'static,
        I::Item: Into<Arc<S::Statement>> + Send,
    {
        let token = self.inner.shutdown.child_token();
        let (emitter, sequence) = sequence::channel(token.clone());
        if self.is_closed() {
            emitter.fail(ExecutorError::Closed);
            return sequence;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatch = token.child_token();
        let total = Arc::new(AtomicU64::new(UNKNOWN_TOTAL));
        tokio::spawn(self.clone().dispatch_writes(
            statements,
            tx,
            dispatch.clone(),
            Arc::clone(&total),
        ));
        tokio::spawn(self.clone().deliver_writes(rx, emitter, dispatch, total));
        sequence
    }

    /// Execute a read, delivering its rows as a sequence
    ///
    /// Rows are only pulled from the session as the consumer grants demand.
    /// In fail-safe mode a failed read ends with one failed result.
    pub fn read_reactive(&self, statement: impl Into<Arc<S::Statement>>) -> ReadSequence<S> {
        let statement = statement.into();
        let (emitter, sequence) = sequence::channel(self.inner.shutdown.child_token());
        if self.is_closed() {
            emitter.fail(ExecutorError::Closed);
            return sequence;
        }

        tokio::spawn(self.clone().run_read(statement, emitter));
        sequence
    }

    /// Execute a read and collect all of its rows
    pub async fn read_sync(
        &self,
        statement: impl Into<Arc<S::Statement>>,
    ) -> Result<Vec<ReadResult<S::Statement, S::Row>>, ExecutorError> {
        self.ensure_open()?;
        let mut rows = self.read_reactive(statement);
        rows.request(usize::MAX);
        rows.try_collect().await
    }

    fn ensure_open(&self) -> Result<(), ExecutorError> {
        if self.is_closed() {
            return Err(ExecutorError::Closed);
        }
        Ok(())
    }

    /// Take an in-flight slot, then a rate token
    ///
    /// Returns `None` if `cancel` fires first.
    async fn admit(&self, cancel: &CancellationToken) -> Option<InFlightPermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            admitted = async {
                let slot = self.inner.limiter.acquire().await.ok()?;
                self.inner.rate.acquire().await;
                Some(slot)
            } => admitted,
        }
    }

    fn start(&self, kind: OperationKind) -> ExecutionContext {
        let context = ExecutionContext {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            started_at: tokio::time::Instant::now(),
        };
        for listener in &self.inner.listeners {
            listener.on_execution_started(&context);
        }
        context
    }

    fn succeeded(&self, context: &ExecutionContext) {
        for listener in &self.inner.listeners {
            listener.on_execution_succeeded(context);
        }
    }

    fn failed(&self, context: &ExecutionContext, error: &StatementError) {
        debug!(id = context.id, kind = ?context.kind, error = %error, "Statement failed");
        for listener in &self.inner.listeners {
            listener.on_execution_failed(context, error);
        }
    }

    fn cancelled(&self, context: &ExecutionContext) {
        for listener in &self.inner.listeners {
            listener.on_execution_cancelled(context);
        }
    }

    /// Run one session write; the outer error reports a panicking session
    async fn execute_write(
        &self,
        statement: &S::Statement,
    ) -> Result<Result<(), StatementError>, ExecutorError> {
        let context = self.start(OperationKind::Write);
        let outcome = AssertUnwindSafe(self.inner.session.execute_write(statement))
            .catch_unwind()
            .await;
        match outcome {
            Ok(outcome) => {
                match &outcome {
                    Ok(()) => self.succeeded(&context),
                    Err(err) => self.failed(&context, err),
                }
                Ok(outcome)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(id = context.id, panic = %message, "Session write panicked");
                self.cancelled(&context);
                Err(ExecutorError::SessionPanicked(message))
            }
        }
    }

    /// Pull statements and dispatch them while capacity allows
    async fn dispatch_writes<I>(
        self,
        statements: I,
        completions: mpsc::UnboundedSender<Completion<S::Statement>>,
        dispatch: CancellationToken,
        total: Arc<AtomicU64>,
    ) where
        I: Stream + Send + 'static,
        I::Item: Into<Arc<S::Statement>> + Send,
    {
        let window = Arc::new(Semaphore::new(self.inner.config.max_in_flight));
        let mut statements = Box::pin(statements);
        let mut dispatched = 0u64;

        loop {
            let window_permit = tokio::select! {
                biased;
                _ = dispatch.cancelled() => break,
                permit = Arc::clone(&window).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let statement: Arc<S::Statement> = tokio::select! {
                biased;
                _ = dispatch.cancelled() => break,
                next = statements.next() => match next {
                    Some(statement) => statement.into(),
                    None => {
                        total.store(dispatched, Ordering::Release);
                        break;
                    }
                },
            };

            let Some(slot) = self.admit(&dispatch).await else {
                break;
            };

            let executor = self.clone();
            let completions = completions.clone();
            tokio::spawn(async move {
                let outcome = executor.execute_write(&statement).await;
                drop(slot);
                let _ = completions.send(Completion {
                    result: outcome.map(|outcome| WriteResult::from_outcome(statement, outcome)),
                    _window: window_permit,
                });
            });
            dispatched += 1;
        }

        debug!(
            dispatched,
            cancelled = dispatch.is_cancelled(),
            "Write dispatch finished"
        );
    }

    /// Hand completed writes to the consumer, applying the error policy
    async fn deliver_writes(
        self,
        mut completions: mpsc::UnboundedReceiver<Completion<S::Statement>>,
        emitter: Emitter<WriteResult<S::Statement>>,
        dispatch: CancellationToken,
        total: Arc<AtomicU64>,
    ) {
        let fail_safe = self.inner.config.fail_safe;
        let mut delivered = 0u64;
        // Every statement of the input was dispatched and its result delivered
        let finished = |delivered: u64| total.load(Ordering::Acquire) == delivered;

        while !finished(delivered) {
            let completion = tokio::select! {
                biased;
                _ = emitter.cancelled() => return self.abandon(emitter),
                completion = completions.recv() => match completion {
                    Some(completion) => completion,
                    None => break,
                },
            };

            let result = match completion.result {
                Ok(result) => result,
                Err(err) => {
                    error!(error = %err, "Result lost, terminating bulk execution");
                    dispatch.cancel();
                    emitter.fail(err);
                    return;
                }
            };

            if let (false, Some(err)) = (fail_safe, result.error()) {
                warn!(error = %err, "Statement failed, terminating bulk execution");
                dispatch.cancel();
                emitter.fail(ExecutorError::Statement(err.clone()));
                return;
            }

            if emitter.emit(result).await.is_err() {
                return self.abandon(emitter);
            }
            delivered += 1;
        }

        if !finished(delivered) && self.inner.shutdown.is_cancelled() {
            emitter.fail(ExecutorError::Closed);
        } else {
            emitter.complete();
        }
    }

    async fn run_read(
        self,
        statement: Arc<S::Statement>,
        emitter: Emitter<ReadResult<S::Statement, S::Row>>,
    ) {
        let Some(_slot) = self.admit(emitter.cancellation_token()).await else {
            return self.abandon(emitter);
        };

        let context = self.start(OperationKind::Read);
        let streamed = AssertUnwindSafe(self.stream_rows(&context, &statement, &emitter))
            .catch_unwind()
            .await;
        let streamed = match streamed {
            Ok(streamed) => streamed,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(id = context.id, panic = %message, "Session read panicked");
                self.cancelled(&context);
                emitter.fail(ExecutorError::SessionPanicked(message));
                return;
            }
        };
        match streamed {
            Ok(true) => {
                self.succeeded(&context);
                emitter.complete();
            }
            Ok(false) => {
                self.cancelled(&context);
                self.abandon(emitter);
            }
            Err(err) => {
                self.failed(&context, &err);
                if self.inner.config.fail_safe {
                    match emitter.emit(ReadResult::failure(statement, err)).await {
                        Ok(()) => emitter.complete(),
                        Err(_) => self.abandon(emitter),
                    }
                } else {
                    warn!(error = %err, "Read failed, terminating sequence");
                    emitter.fail(ExecutorError::Statement(err));
                }
            }
        }
    }

    /// Emit rows page by page; `Ok(false)` if the consumer cancelled
    async fn stream_rows(
        &self,
        context: &ExecutionContext,
        statement: &Arc<S::Statement>,
        emitter: &Emitter<ReadResult<S::Statement, S::Row>>,
    ) -> Result<bool, StatementError> {
        let mut pages = self
            .inner
            .fetcher
            .fetch(&self.inner.session, statement)
            .await?;

        loop {
            let page = tokio::select! {
                biased;
                _ = emitter.cancelled() => return Ok(false),
                page = pages.next() => match page {
                    Some(page) => page?,
                    None => return Ok(true),
                },
            };

            for row in page {
                for listener in &self.inner.listeners {
                    listener.on_row_received(context);
                }
                if emitter
                    .emit(ReadResult::row(Arc::clone(statement), row))
                    .await
                    .is_err()
                {
                    return Ok(false);
                }
            }
        }
    }

    /// Stop producing for a cancelled sequence
    fn abandon<T>(&self, emitter: Emitter<T>) {
        if self.inner.shutdown.is_cancelled() {
            debug!("Sequence stopped by executor close");
            emitter.fail(ExecutorError::Closed);
        } else {
            debug!("Sequence cancelled by consumer");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
