//! In-memory session for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::time::Instant;

use super::traits::{ContinuousPagingSession, RowPages, Session};
use crate::config::{ContinuousPagingOptions, PageUnit};
use crate::error::StatementError;

/// Statement understood by [`InMemorySession`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryStatement {
    /// Caller-assigned identifier (e.g. a record position)
    pub id: u64,
    /// Query text; reads use it as the table name
    pub query: String,
}

impl MemoryStatement {
    /// Create a statement
    pub fn new(id: u64, query: impl Into<String>) -> Self {
        Self {
            id,
            query: query.into(),
        }
    }
}

type FailurePredicate = Arc<dyn Fn(&MemoryStatement) -> Option<StatementError> + Send + Sync>;

/// Call observations recorded by an [`InMemorySession`]
#[derive(Debug, Default)]
pub struct SessionStats {
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    pages: AtomicUsize,
    admissions: Mutex<Vec<Instant>>,
}

impl SessionStats {
    /// Total number of session calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls currently executing
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously executing calls
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Pages handed out by continuous reads
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    /// Instants at which calls started, in call order
    pub fn admissions(&self) -> Vec<Instant> {
        self.admissions.lock().clone()
    }
}

/// Decrements the current-call gauge when the call ends
struct CallGuard<'a>(&'a SessionStats);

impl<'a> CallGuard<'a> {
    fn enter(stats: &'a SessionStats) -> Self {
        stats.calls.fetch_add(1, Ordering::SeqCst);
        stats.admissions.lock().push(Instant::now());
        let current = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(current, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory implementation of [`Session`] and [`ContinuousPagingSession`]
///
/// This is primarily for testing. Writes are recorded, reads are served from
/// tables of JSON rows keyed by query text, and failures are injected with a
/// predicate.
///
/// # Example
///
/// ```
/// use bulkload_executor::session::{InMemorySession, MemoryStatement};
/// use bulkload_executor::StatementError;
/// use serde_json::json;
///
/// let session = InMemorySession::new()
///     .with_table("users", vec![json!({"id": 1}), json!({"id": 2})])
///     .fail_when(|s: &MemoryStatement| {
///         (s.id % 10 == 0).then(|| StatementError::Write("rejected".into()))
///     });
/// ```
pub struct InMemorySession {
    latency: Duration,
    jitter: Duration,
    failure: Option<FailurePredicate>,
    tables: RwLock<HashMap<String, Vec<serde_json::Value>>>,
    page_failures: RwLock<HashMap<String, usize>>,
    written: Mutex<Vec<u64>>,
    stats: Arc<SessionStats>,
}

impl InMemorySession {
    /// Create a session answering immediately and never failing
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            failure: None,
            tables: RwLock::new(HashMap::new()),
            page_failures: RwLock::new(HashMap::new()),
            written: Mutex::new(Vec::new()),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add a random extra delay in `[0, jitter]` to every call
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Fail statements for which `predicate` returns an error
    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MemoryStatement) -> Option<StatementError> + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(predicate));
        self
    }

    /// Register the rows returned for `query`
    pub fn with_table(self, query: impl Into<String>, rows: Vec<serde_json::Value>) -> Self {
        self.tables.write().insert(query.into(), rows);
        self
    }

    /// Make continuous reads of `query` fail after `pages` pages
    pub fn fail_after_pages(self, query: impl Into<String>, pages: usize) -> Self {
        self.page_failures.write().insert(query.into(), pages);
        self
    }

    /// Call observations
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Ids of successfully written statements, in completion order
    pub fn written(&self) -> Vec<u64> {
        self.written.lock().clone()
    }

    async fn simulate_latency(&self) {
        let mut delay = self.latency;
        if !self.jitter.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=self.jitter.as_micros() as u64);
            delay += Duration::from_micros(extra);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_failure(&self, statement: &MemoryStatement) -> Result<(), StatementError> {
        match self.failure.as_ref().and_then(|f| f(statement)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rows_for(&self, query: &str) -> Result<Vec<serde_json::Value>, StatementError> {
        self.tables
            .read()
            .get(query)
            .cloned()
            .ok_or_else(|| StatementError::Rejected(format!("unknown table: {query}")))
    }
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

/// Split rows into pages of at most `size` rows or roughly `size` bytes
fn paginate(
    rows: Vec<serde_json::Value>,
    options: &ContinuousPagingOptions,
) -> Vec<Vec<serde_json::Value>> {
    let size = options.page_size.max(1) as usize;
    match options.page_unit {
        PageUnit::Rows => rows.chunks(size).map(<[_]>::to_vec).collect(),
        PageUnit::Bytes => {
            let mut pages = Vec::new();
            let mut page = Vec::new();
            let mut bytes = 0;
            for row in rows {
                let row_bytes = row.to_string().len();
                if !page.is_empty() && bytes + row_bytes > size {
                    pages.push(std::mem::take(&mut page));
                    bytes = 0;
                }
                bytes += row_bytes;
                page.push(row);
            }
            if !page.is_empty() {
                pages.push(page);
            }
            pages
        }
    }
}

#[async_trait]
impl Session for InMemorySession {
    type Statement = MemoryStatement;
    type Row = serde_json::Value;

    async fn execute_write(&self, statement: &MemoryStatement) -> Result<(), StatementError> {
        let _guard = CallGuard::enter(&self.stats);
        self.simulate_latency().await;
        self.check_failure(statement)?;
        self.written.lock().push(statement.id);
        Ok(())
    }

    async fn execute_read(
        &self,
        statement: &MemoryStatement,
    ) -> Result<Vec<serde_json::Value>, StatementError> {
        let _guard = CallGuard::enter(&self.stats);
        self.simulate_latency().await;
        self.check_failure(statement)?;
        self.rows_for(&statement.query)
    }
}

#[async_trait]
impl ContinuousPagingSession for InMemorySession {
    async fn execute_continuous_read(
        &self,
        statement: &MemoryStatement,
        options: &ContinuousPagingOptions,
    ) -> Result<RowPages<serde_json::Value>, StatementError> {
        let _guard = CallGuard::enter(&self.stats);
        self.simulate_latency().await;
        self.check_failure(statement)?;

        let pages = paginate(self.rows_for(&statement.query)?, options);
        let fail_after = self.page_failures.read().get(&statement.query).copied();
        let query = statement.query.clone();
        let stats = Arc::clone(&self.stats);

        let mut items: Vec<Result<Vec<serde_json::Value>, StatementError>> =
            pages.into_iter().map(Ok).collect();
        if let Some(n) = fail_after {
            items.truncate(n);
            items.push(Err(StatementError::Read(format!(
                "continuous paging of {query} interrupted after {n} pages"
            ))));
        }

        Ok(stream::iter(items)
            .inspect(move |_| {
                stats.pages.fetch_add(1, Ordering::SeqCst);
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn rows(n: u64) -> Vec<serde_json::Value> {
        (1..=n).map(|i| json!({ "id": i })).collect()
    }

    #[tokio::test]
    async fn test_write_records_statement() {
        let session = InMemorySession::new();
        session
            .execute_write(&MemoryStatement::new(7, "insert"))
            .await
            .unwrap();
        assert_eq!(session.written(), vec![7]);
        assert_eq!(session.stats().calls(), 1);
        assert_eq!(session.stats().current(), 0);
        assert_eq!(session.stats().peak(), 1);
    }

    #[tokio::test]
    async fn test_failure_predicate() {
        let session = InMemorySession::new()
            .fail_when(|s| (s.id == 2).then(|| StatementError::Write("boom".into())));

        assert!(session
            .execute_write(&MemoryStatement::new(1, "insert"))
            .await
            .is_ok());
        assert_eq!(
            session
                .execute_write(&MemoryStatement::new(2, "insert"))
                .await,
            Err(StatementError::Write("boom".into()))
        );
        assert_eq!(session.written(), vec![1]);
    }

    #[tokio::test]
    async fn test_unknown_table_is_rejected() {
        let session = InMemorySession::new();
        let err = session
            .execute_read(&MemoryStatement::new(1, "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StatementError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_continuous_read_by_rows() {
        let session = InMemorySession::new().with_table("t", rows(7));
        let options = ContinuousPagingOptions::default().with_page_size(3, PageUnit::Rows);

        let pages: Vec<_> = session
            .execute_continuous_read(&MemoryStatement::new(1, "t"), &options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(session.stats().pages(), 3);
    }

    #[test]
    fn test_paginate_by_bytes() {
        // each row serializes to {"id":N} = 8 bytes for single digits
        let options = ContinuousPagingOptions::default().with_page_size(17, PageUnit::Bytes);
        let pages = paginate(rows(5), &options);
        let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        // a row larger than the page still gets its own page
        let options = ContinuousPagingOptions::default().with_page_size(1, PageUnit::Bytes);
        assert_eq!(paginate(rows(2), &options).len(), 2);
    }

    #[tokio::test]
    async fn test_continuous_read_interrupted() {
        let session = InMemorySession::new()
            .with_table("t", rows(10))
            .fail_after_pages("t", 1);
        let options = ContinuousPagingOptions::default().with_page_size(4, PageUnit::Rows);

        let mut pages = session
            .execute_continuous_read(&MemoryStatement::new(1, "t"), &options)
            .await
            .unwrap();
        assert_eq!(pages.next().await.unwrap().unwrap().len(), 4);
        assert!(matches!(
            pages.next().await,
            Some(Err(StatementError::Read(_)))
        ));
        assert!(pages.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_tracks_concurrency() {
        let session = Arc::new(InMemorySession::new().with_latency(Duration::from_millis(20)));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    session
                        .execute_write(&MemoryStatement::new(i, "insert"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(session.stats().peak(), 4);
        assert_eq!(session.stats().current(), 0);
        assert_eq!(session.stats().admissions().len(), 4);
    }
}
