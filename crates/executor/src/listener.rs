//! Execution listeners
//!
//! Listeners observe every statement the executor dispatches. They are called
//! synchronously from the dispatching task and must not block.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::StatementError;

/// Kind of operation being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Write,
    Read,
}

/// Identity and timing of one dispatched statement
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    /// Executor-local, monotonically assigned id
    pub id: u64,
    /// Write or read
    pub kind: OperationKind,
    /// When the session call started
    pub started_at: Instant,
}

impl ExecutionContext {
    /// Time since the session call started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Hooks called around every session call
///
/// All methods default to no-ops.
pub trait ExecutionListener: Send + Sync {
    /// The session call is about to start
    fn on_execution_started(&self, _context: &ExecutionContext) {}

    /// The statement completed successfully (for reads: all rows received)
    fn on_execution_succeeded(&self, _context: &ExecutionContext) {}

    /// The statement failed at the session
    fn on_execution_failed(&self, _context: &ExecutionContext, _error: &StatementError) {}

    /// The statement ended without an outcome (consumer cancellation or a
    /// panicking session call)
    fn on_execution_cancelled(&self, _context: &ExecutionContext) {}

    /// A read delivered one row
    fn on_row_received(&self, _context: &ExecutionContext) {}
}

/// Point-in-time copy of [`MetricsListener`] counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rows: u64,
    pub in_flight: u64,
    pub mean_latency_micros: u64,
    pub min_latency_micros: u64,
    pub max_latency_micros: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Completed statements (succeeded + failed)
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Listener counting outcomes and latencies
///
/// # Example
///
/// ```ignore
/// let metrics = Arc::new(MetricsListener::new());
/// let executor = BulkExecutor::builder(session)
///     .with_listener(metrics.clone())
///     .build()?;
/// // ... run
/// tracing::info!(?metrics.snapshot(), "done");
/// ```
#[derive(Debug)]
pub struct MetricsListener {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rows: AtomicU64,
    latency_sum_micros: AtomicU64,
    latency_min_micros: AtomicU64,
    latency_max_micros: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<&'static str, u64>>,
}

impl Default for MetricsListener {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsListener {
    pub fn new() -> Self {
        Self {
            started: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            rows: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_min_micros: AtomicU64::new(u64::MAX),
            latency_max_micros: AtomicU64::new(0),
            failures_by_kind: Mutex::new(BTreeMap::new()),
        }
    }

    fn record_latency(&self, context: &ExecutionContext) {
        let micros = context.elapsed().as_micros() as u64;
        self.latency_sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.latency_min_micros.fetch_min(micros, Ordering::Relaxed);
        self.latency_max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let started = self.started.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        let completed = succeeded + failed;
        let min = self.latency_min_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            started,
            succeeded,
            failed,
            cancelled,
            rows: self.rows.load(Ordering::Relaxed),
            in_flight: started.saturating_sub(completed + cancelled),
            mean_latency_micros: if completed == 0 {
                0
            } else {
                self.latency_sum_micros.load(Ordering::Relaxed) / completed
            },
            min_latency_micros: if min == u64::MAX { 0 } else { min },
            max_latency_micros: self.latency_max_micros.load(Ordering::Relaxed),
            failures_by_kind: self
                .failures_by_kind
                .lock()
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
        }
    }
}

impl ExecutionListener for MetricsListener {
    fn on_execution_started(&self, _context: &ExecutionContext) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_execution_succeeded(&self, context: &ExecutionContext) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(context);
    }

    fn on_execution_failed(&self, context: &ExecutionContext, error: &StatementError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(context);
        *self.failures_by_kind.lock().entry(error.kind()).or_insert(0) += 1;
    }

    fn on_execution_cancelled(&self, _context: &ExecutionContext) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn on_row_received(&self, _context: &ExecutionContext) {
        self.rows.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(kind: OperationKind) -> ExecutionContext {
        ExecutionContext {
            id: 1,
            kind,
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsListener::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_and_latency() {
        let metrics = MetricsListener::new();

        let first = context(OperationKind::Write);
        metrics.on_execution_started(&first);
        tokio::time::sleep(Duration::from_millis(10)).await;
        metrics.on_execution_succeeded(&first);

        let second = context(OperationKind::Write);
        metrics.on_execution_started(&second);
        tokio::time::sleep(Duration::from_millis(30)).await;
        metrics.on_execution_failed(&second, &StatementError::Timeout("slow".into()));

        let third = context(OperationKind::Read);
        metrics.on_execution_started(&third);
        metrics.on_row_received(&third);
        metrics.on_row_received(&third);

        let fourth = context(OperationKind::Read);
        metrics.on_execution_started(&fourth);
        metrics.on_execution_cancelled(&fourth);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.started, 4);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.completed(), 2);
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(snapshot.rows, 2);
        assert!((10_000..11_000).contains(&snapshot.min_latency_micros));
        assert!((30_000..31_000).contains(&snapshot.max_latency_micros));
        assert!((20_000..21_000).contains(&snapshot.mean_latency_micros));
        assert_eq!(snapshot.failures_by_kind.get("timeout"), Some(&1));
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsListener::new();
        metrics.on_execution_started(&context(OperationKind::Write));
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["started"], 1);
        assert_eq!(json["in_flight"], 1);
    }
}
