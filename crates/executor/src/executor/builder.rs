//! Executor builder

use std::sync::Arc;

use tracing::{info, warn};

use super::bulk::BulkExecutor;
use super::fetch::{ContinuousPagingFetcher, FetcherFactory, RowFetcher, SingleShotFetcher};
use crate::config::{ContinuousPagingOptions, ExecutorConfig};
use crate::error::ExecutorError;
use crate::listener::ExecutionListener;
use crate::session::{ContinuousPagingSession, Session};

/// Builder for [`BulkExecutor`]
///
/// # Example
///
/// ```ignore
/// let executor = BulkExecutor::builder(Arc::new(session))
///     .with_max_in_flight(256)
///     .with_max_per_second(10_000.0)
///     .with_fail_safe(true)
///     .enable_continuous_paging()
///     .build()?;
/// ```
pub struct BulkExecutorBuilder<S: Session> {
    session: Arc<S>,
    config: ExecutorConfig,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    paging: Option<FetcherFactory<S>>,
}

impl<S: Session> BulkExecutorBuilder<S> {
    pub(crate) fn new(session: Arc<S>) -> Self {
        Self {
            session,
            config: ExecutorConfig::default(),
            listeners: Vec::new(),
            paging: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of in-flight operations
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.config = self.config.with_max_in_flight(max);
        self
    }

    /// Set the maximum rate in operations per second
    pub fn with_max_per_second(mut self, rate: f64) -> Self {
        self.config = self.config.with_max_per_second(rate);
        self
    }

    /// Select fail-safe (true) or fail-fast (false) error handling
    pub fn with_fail_safe(mut self, fail_safe: bool) -> Self {
        self.config = self.config.with_fail_safe(fail_safe);
        self
    }

    /// Register an execution listener
    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration and build the executor
    ///
    /// Continuous paging options in the configuration are ignored (with a
    /// warning) unless paging was enabled for a capable session.
    pub fn build(mut self) -> Result<BulkExecutor<S>, ExecutorError> {
        self.config.validate()?;

        let fetcher: Arc<dyn RowFetcher<S>> = match (self.paging, self.config.continuous_paging)
        {
            (Some(factory), options) => {
                let options = options.unwrap_or_default();
                self.config.continuous_paging = Some(options);
                factory(options)
            }
            (None, Some(options)) => {
                warn!(
                    page_size = options.page_size,
                    page_unit = %options.page_unit,
                    "Continuous paging configured but not enabled for this session, falling back to single-shot reads"
                );
                Arc::new(SingleShotFetcher)
            }
            (None, None) => Arc::new(SingleShotFetcher),
        };

        info!(
            max_in_flight = self.config.max_in_flight,
            max_per_second = ?self.config.max_per_second,
            fail_safe = self.config.fail_safe,
            read_strategy = fetcher.name(),
            listeners = self.listeners.len(),
            "Bulk executor built"
        );

        Ok(BulkExecutor::from_parts(
            self.session,
            self.config,
            fetcher,
            self.listeners,
        ))
    }
}

impl<S: ContinuousPagingSession> BulkExecutorBuilder<S> {
    /// Read with continuous paging
    ///
    /// Paging options come from the configuration; defaults apply when it
    /// has none.
    pub fn enable_continuous_paging(mut self) -> Self {
        self.paging = Some(ContinuousPagingFetcher::factory::<S>);
        self
    }

    /// Read with continuous paging using `options`
    pub fn with_continuous_paging(mut self, options: ContinuousPagingOptions) -> Self {
        self.config = self.config.with_continuous_paging(options);
        self.enable_continuous_paging()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageUnit;
    use crate::session::InMemorySession;

    #[test]
    fn test_build_defaults() {
        let executor = BulkExecutor::builder(Arc::new(InMemorySession::new()))
            .build()
            .unwrap();
        assert_eq!(executor.config(), &ExecutorConfig::default());
        assert_eq!(executor.read_strategy(), "single_shot");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = BulkExecutor::builder(Arc::new(InMemorySession::new()))
            .with_max_per_second(-5.0)
            .build();
        assert!(matches!(result, Err(ExecutorError::Config(_))));
    }

    #[test]
    fn test_enable_paging_uses_defaults() {
        let executor = BulkExecutor::builder(Arc::new(InMemorySession::new()))
            .enable_continuous_paging()
            .build()
            .unwrap();
        assert_eq!(executor.read_strategy(), "continuous_paging");
        assert_eq!(
            executor.config().continuous_paging,
            Some(ContinuousPagingOptions::default())
        );
    }

    #[test]
    fn test_paging_options_from_config() {
        let options = ContinuousPagingOptions::default().with_page_size(10, PageUnit::Bytes);
        let executor = BulkExecutor::builder(Arc::new(InMemorySession::new()))
            .with_config(ExecutorConfig::default().with_continuous_paging(options))
            .enable_continuous_paging()
            .build()
            .unwrap();
        assert_eq!(executor.config().continuous_paging, Some(options));
    }
}
