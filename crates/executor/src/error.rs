//! Error types shared by the executor and session layers

use std::time::Duration;

use crate::config::ConfigError;

/// A single statement failed at the session
///
/// Always wrapped into a failed result in fail-safe mode; terminates the
/// result sequence in fail-fast mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatementError {
    /// The session did not answer in time
    #[error("statement timed out: {0}")]
    Timeout(String),

    /// No replica or node could serve the statement
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The statement was rejected (syntax, invalid query, authorization)
    #[error("statement rejected: {0}")]
    Rejected(String),

    /// The write could not be applied
    #[error("write failed: {0}")]
    Write(String),

    /// The read could not be completed
    #[error("read failed: {0}")]
    Read(String),
}

impl StatementError {
    /// Short kind label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Rejected(_) => "rejected",
            Self::Write(_) => "write",
            Self::Read(_) => "read",
        }
    }
}

/// Errors from executor operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// The executor was closed before or during the operation
    #[error("executor is closed")]
    Closed,

    /// Fail-fast termination with the first statement failure
    #[error("bulk execution failed: {0}")]
    Statement(#[from] StatementError),

    /// The producer of a result sequence stopped without a terminal signal
    #[error("result sequence producer aborted")]
    ProducerAborted,

    /// A session call panicked, so its result can never be delivered
    #[error("session call panicked: {0}")]
    SessionPanicked(String),

    /// Outstanding operations did not complete in time
    #[error("{outstanding} operations still in flight after {waited:?}")]
    DrainTimeout { outstanding: usize, waited: Duration },

    /// Invalid executor configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<ConfigError> for ExecutorError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl ExecutorError {
    /// The statement failure behind a fail-fast termination, if any
    pub fn statement_error(&self) -> Option<&StatementError> {
        match self {
            Self::Statement(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_display() {
        let err = StatementError::Write("node down".into());
        assert_eq!(err.to_string(), "write failed: node down");
        assert_eq!(err.kind(), "write");
    }

    #[test]
    fn test_executor_error_from_statement() {
        let err: ExecutorError = StatementError::Timeout("5s".into()).into();
        assert_eq!(
            err.statement_error(),
            Some(&StatementError::Timeout("5s".into()))
        );
        assert_eq!(
            err.to_string(),
            "bulk execution failed: statement timed out: 5s"
        );
        assert!(ExecutorError::Closed.statement_error().is_none());
    }
}
