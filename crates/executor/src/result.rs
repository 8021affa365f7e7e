//! Execution results
//!
//! Each result carries the originating statement and either a payload or the
//! statement error, never both. Reporting layers classify and count outcomes
//! from these values alone.

use std::sync::Arc;

use crate::error::StatementError;

/// Outcome of one write statement
#[derive(Debug)]
pub struct WriteResult<St> {
    statement: Arc<St>,
    outcome: Result<(), StatementError>,
}

impl<St> WriteResult<St> {
    /// Successful write
    pub fn success(statement: Arc<St>) -> Self {
        Self {
            statement,
            outcome: Ok(()),
        }
    }

    /// Failed write
    pub fn failure(statement: Arc<St>, error: StatementError) -> Self {
        Self {
            statement,
            outcome: Err(error),
        }
    }

    pub(crate) fn from_outcome(statement: Arc<St>, outcome: Result<(), StatementError>) -> Self {
        Self { statement, outcome }
    }

    /// Statement that produced this result
    pub fn statement(&self) -> &Arc<St> {
        &self.statement
    }

    /// Whether the write succeeded
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Failure, if the write failed
    pub fn error(&self) -> Option<&StatementError> {
        self.outcome.as_ref().err()
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<Arc<St>, StatementError> {
        self.outcome.map(|()| self.statement)
    }
}

impl<St> Clone for WriteResult<St> {
    fn clone(&self) -> Self {
        Self {
            statement: Arc::clone(&self.statement),
            outcome: self.outcome.clone(),
        }
    }
}

/// One row of a read, or the failure of the read
#[derive(Debug)]
pub struct ReadResult<St, R> {
    statement: Arc<St>,
    outcome: Result<R, StatementError>,
}

impl<St, R> ReadResult<St, R> {
    /// One row received
    pub fn row(statement: Arc<St>, row: R) -> Self {
        Self {
            statement,
            outcome: Ok(row),
        }
    }

    /// The read failed
    pub fn failure(statement: Arc<St>, error: StatementError) -> Self {
        Self {
            statement,
            outcome: Err(error),
        }
    }

    /// Statement that produced this result
    pub fn statement(&self) -> &Arc<St> {
        &self.statement
    }

    /// Whether this result carries a row
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The row, if any
    pub fn value(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    /// Failure, if the read failed
    pub fn error(&self) -> Option<&StatementError> {
        self.outcome.as_ref().err()
    }

    /// Take the row out
    pub fn into_value(self) -> Result<R, StatementError> {
        self.outcome
    }
}

impl<St, R: Clone> Clone for ReadResult<St, R> {
    fn clone(&self) -> Self {
        Self {
            statement: Arc::clone(&self.statement),
            outcome: self.outcome.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_result_exclusive_outcome() {
        let ok = WriteResult::success(Arc::new("insert 1"));
        assert!(ok.is_success());
        assert!(ok.error().is_none());

        let failed = WriteResult::failure(Arc::new("insert 2"), StatementError::Write("x".into()));
        assert!(!failed.is_success());
        assert_eq!(failed.error(), Some(&StatementError::Write("x".into())));
        assert_eq!(**failed.statement(), "insert 2");
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn test_read_result_payload() {
        let row = ReadResult::row(Arc::new("select"), 42);
        assert_eq!(row.value(), Some(&42));
        assert!(row.error().is_none());
        assert_eq!(row.clone().into_value(), Ok(42));

        let failed: ReadResult<&str, i32> =
            ReadResult::failure(Arc::new("select"), StatementError::Read("gone".into()));
        assert!(failed.value().is_none());
        assert!(!failed.is_success());
    }
}
