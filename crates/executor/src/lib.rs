//! # Bulk Execution Engine
//!
//! Admission-controlled executor for moving large volumes of data into and
//! out of a clustered database through a pooled session.
//!
//! ## Features
//!
//! - **Admission control**: Bounded in-flight operations and a maximum rate, owned per executor
//! - **Backpressure**: Demand-driven result sequences; input is only pulled when there is capacity
//! - **Error policies**: Fail-fast termination or fail-safe per statement results
//! - **Continuous paging**: Page-by-page reads for capable sessions, single-shot fallback otherwise
//! - **Resumable runs**: Interval-based position tracking with JSON checkpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BulkExecutor                           │
//! │  (dispatches statements, applies fail-fast / fail-safe)     │
//! └─────────────────────────────────────────────────────────────┘
//!           │                                        │
//!           ▼                                        ▼
//! ┌──────────────────────────┐         ┌──────────────────────────┐
//! │  InFlightLimiter         │         │  ResultSequence           │
//! │  RateGate                │         │  (request(n) / cancel())  │
//! └──────────────────────────┘         └──────────────────────────┘
//!           │
//!           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Session                              │
//! │  (writes, single-shot reads, continuous paging reads)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`PositionsTracker`] sits beside the executor: callers record confirmed
//! positions and consult it before a resumed run.
//!
//! ## Example
//!
//! ```ignore
//! use bulkload_executor::prelude::*;
//! use futures::{stream, StreamExt};
//!
//! let executor = BulkExecutor::builder(Arc::new(session))
//!     .with_config(ExecutorConfig::from_env()?)
//!     .build()?;
//!
//! let tracker = PositionsTracker::new();
//! let mut results = executor.write_reactive_stream(stream::iter(statements));
//! while let Some(result) = results.next().await {
//!     let result = result?;
//!     tracker.update("file:///data.csv", result.statement().id)?;
//! }
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod executor;
pub mod listener;
pub mod result;
pub mod sequence;
pub mod session;
pub mod threshold;
pub mod tracker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ContinuousPagingOptions, ExecutorConfig, PageUnit};
    pub use crate::error::{ExecutorError, StatementError};
    pub use crate::executor::{BulkExecutor, BulkExecutorBuilder};
    pub use crate::listener::{ExecutionListener, MetricsListener, MetricsSnapshot};
    pub use crate::result::{ReadResult, WriteResult};
    pub use crate::sequence::ResultSequence;
    pub use crate::session::{ContinuousPagingSession, InMemorySession, MemoryStatement, Session};
    pub use crate::threshold::ErrorThreshold;
    pub use crate::tracker::{Checkpoint, Interval, PositionsTracker, TrackerError};
}

// Re-export key types at crate root
pub use admission::{InFlightLimiter, RateGate};
pub use config::{ConfigError, ContinuousPagingOptions, ExecutorConfig, PageUnit};
pub use error::{ExecutorError, StatementError};
pub use executor::{BulkExecutor, BulkExecutorBuilder, ReadSequence, WriteSequence};
pub use listener::{
    ExecutionContext, ExecutionListener, MetricsListener, MetricsSnapshot, OperationKind,
};
pub use result::{ReadResult, WriteResult};
pub use sequence::ResultSequence;
pub use session::{ContinuousPagingSession, Session};
pub use threshold::{ErrorThreshold, ThresholdError};
pub use tracker::{Checkpoint, Interval, PositionsTracker, TrackerError};
