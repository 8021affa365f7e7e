//! Resumable load run against the in-memory session

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use bulkload_executor::session::{InMemorySession, MemoryStatement};
use bulkload_executor::{
    BulkExecutor, Checkpoint, ExecutorConfig, ExecutorError, MetricsListener, MetricsSnapshot,
    PositionsTracker, StatementError,
};

use crate::config::RunnerConfig;

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub run_id: Uuid,
    /// Positions already covered by the checkpoint
    pub skipped: u64,
    /// Results received in this run
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// The error threshold was exceeded and the run cancelled
    pub aborted: bool,
    /// Fail-fast termination error, if any
    pub error: Option<String>,
    pub metrics: MetricsSnapshot,
}

impl LoadSummary {
    /// Whether every remaining position was written
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.error.is_none() && self.failed == 0
    }
}

fn insert_statement(position: u64) -> MemoryStatement {
    MemoryStatement::new(position, format!("INSERT INTO records (position) VALUES ({position})"))
}

fn build_session(config: &RunnerConfig) -> InMemorySession {
    let fail_every = config.fail_every;
    InMemorySession::new()
        .with_latency(config.latency)
        .fail_when(move |statement| {
            (fail_every > 0 && statement.id % fail_every == 0).then(|| {
                StatementError::Write(format!("record {} rejected", statement.id))
            })
        })
}

async fn load_tracker(config: &RunnerConfig) -> Result<PositionsTracker> {
    match Checkpoint::load_if_exists(&config.checkpoint_path)
        .await
        .context("Failed to read checkpoint")?
    {
        Some(checkpoint) => {
            PositionsTracker::from_checkpoint(&checkpoint).context("Checkpoint is invalid")
        }
        None => Ok(PositionsTracker::new()),
    }
}

/// Write every position of the resource not covered by the checkpoint
///
/// Successful positions are recorded in the tracker, which is written back
/// to the checkpoint file when the run ends, whatever its outcome.
pub async fn run(executor_config: ExecutorConfig, config: &RunnerConfig) -> Result<LoadSummary> {
    let run_id = Uuid::now_v7();
    let tracker = load_tracker(config).await?;

    let remaining = tracker.uncovered(&config.resource, 1..=config.records);
    let remaining_count: u64 = remaining.iter().map(|interval| interval.len()).sum();
    let skipped = config.records - remaining_count;
    info!(
        %run_id,
        resource = %config.resource,
        records = config.records,
        skipped,
        "Starting load"
    );

    let metrics = Arc::new(MetricsListener::new());
    let executor = BulkExecutor::builder(Arc::new(build_session(config)))
        .with_config(executor_config)
        .with_listener(metrics.clone())
        .build()?;

    let statements = stream::iter(remaining)
        .flat_map(|interval| stream::iter(interval.lo..=interval.hi))
        .map(insert_statement);
    let mut results = executor.write_reactive_stream(statements);

    let (mut completed, mut succeeded, mut failed) = (0u64, 0u64, 0u64);
    let mut aborted = false;
    let mut termination: Option<ExecutorError> = None;

    while let Some(result) = results.next().await {
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "Load terminated");
                termination = Some(err);
                break;
            }
        };

        completed += 1;
        match result.error() {
            None => {
                succeeded += 1;
                tracker.update(&config.resource, result.statement().id)?;
            }
            Some(err) => {
                failed += 1;
                warn!(position = result.statement().id, error = %err, "Record failed");
            }
        }

        if config.max_errors.exceeded(completed, failed) {
            error!(
                failed,
                completed,
                threshold = %config.max_errors,
                "Too many errors, aborting load"
            );
            results.cancel();
            aborted = true;
            break;
        }
    }

    if let Err(err) = executor.drain(config.drain_timeout).await {
        warn!(error = %err, "Outstanding statements did not finish");
    }
    executor.close();

    tracker
        .checkpoint(run_id)
        .write_to(&config.checkpoint_path)
        .await
        .context("Failed to write checkpoint")?;

    let metrics = metrics.snapshot();
    info!(
        metrics = %serde_json::to_string(&metrics)?,
        "Load metrics"
    );

    Ok(LoadSummary {
        run_id,
        skipped,
        completed,
        succeeded,
        failed,
        aborted,
        error: termination.map(|err| err.to_string()),
        metrics,
    })
}
