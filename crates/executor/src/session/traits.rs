//! Session capability traits

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::ContinuousPagingOptions;
use crate::error::StatementError;

/// Stream of row pages produced by a continuous paging read
pub type RowPages<R> = BoxStream<'static, Result<Vec<R>, StatementError>>;

/// Session that executes statements against the backing service
///
/// Implementations must support concurrent invocation. Retries and timeouts
/// are the session's concern; the executor calls each method exactly once
/// per statement.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Opaque unit of work
    type Statement: Send + Sync + 'static;

    /// One result row
    type Row: Send + 'static;

    /// Execute a write and wait for its acknowledgment
    async fn execute_write(&self, statement: &Self::Statement) -> Result<(), StatementError>;

    /// Execute a read and fetch all of its rows at once
    async fn execute_read(
        &self,
        statement: &Self::Statement,
    ) -> Result<Vec<Self::Row>, StatementError>;
}

/// Session that can stream query results in bounded pages
///
/// Executors built for such a session with continuous paging enabled read
/// page by page instead of fetching everything at once.
#[async_trait]
pub trait ContinuousPagingSession: Session {
    /// Start a continuous paging read
    ///
    /// The returned stream yields pages sized according to `options`; an
    /// error item ends the read.
    async fn execute_continuous_read(
        &self,
        statement: &Self::Statement,
        options: &ContinuousPagingOptions,
    ) -> Result<RowPages<Self::Row>, StatementError>;
}
