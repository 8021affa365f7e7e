//! Read strategies
//!
//! The strategy is chosen when the executor is built: continuous paging is
//! only available for sessions implementing [`ContinuousPagingSession`], so
//! the choice is checked by the type system instead of at run time.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::admission::RateGate;
use crate::config::ContinuousPagingOptions;
use crate::error::StatementError;
use crate::session::{ContinuousPagingSession, RowPages, Session};

/// Produces the pages of rows for one read statement
#[async_trait]
pub(crate) trait RowFetcher<S: Session>: Send + Sync {
    /// Start the read
    async fn fetch(
        &self,
        session: &S,
        statement: &S::Statement,
    ) -> Result<RowPages<S::Row>, StatementError>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Builds the continuous paging strategy for a capable session
pub(crate) type FetcherFactory<S> = fn(ContinuousPagingOptions) -> Arc<dyn RowFetcher<S>>;

/// Fetches all rows with one call, delivered as a single page
pub(crate) struct SingleShotFetcher;

#[async_trait]
impl<S: Session> RowFetcher<S> for SingleShotFetcher {
    async fn fetch(
        &self,
        session: &S,
        statement: &S::Statement,
    ) -> Result<RowPages<S::Row>, StatementError> {
        let rows = session.execute_read(statement).await?;
        Ok(stream::once(async move { Ok(rows) }).boxed())
    }

    fn name(&self) -> &'static str {
        "single_shot"
    }
}

/// Streams rows page by page
///
/// `max_pages` truncates the read; `max_pages_per_second` spaces page
/// deliveries with a per-read [`RateGate`].
pub(crate) struct ContinuousPagingFetcher {
    options: ContinuousPagingOptions,
}

impl ContinuousPagingFetcher {
    pub(crate) fn factory<S: ContinuousPagingSession>(
        options: ContinuousPagingOptions,
    ) -> Arc<dyn RowFetcher<S>> {
        Arc::new(Self { options })
    }
}

#[async_trait]
impl<S: ContinuousPagingSession> RowFetcher<S> for ContinuousPagingFetcher {
    async fn fetch(
        &self,
        session: &S,
        statement: &S::Statement,
    ) -> Result<RowPages<S::Row>, StatementError> {
        let pages = session
            .execute_continuous_read(statement, &self.options)
            .await?;

        let pages = match self.options.max_pages {
            0 => pages,
            max => pages.take(max as usize).boxed(),
        };

        match self.options.max_pages_per_second {
            0 => Ok(pages),
            rate => {
                let gate = RateGate::per_second(f64::from(rate));
                Ok(stream::unfold((pages, gate), |(mut pages, gate)| async move {
                    let page = pages.next().await?;
                    gate.acquire().await;
                    Some((page, (pages, gate)))
                })
                .boxed())
            }
        }
    }

    fn name(&self) -> &'static str {
        "continuous_paging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageUnit;
    use crate::session::{InMemorySession, MemoryStatement};
    use futures::TryStreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn session(rows: u64) -> InMemorySession {
        InMemorySession::new().with_table("t", (1..=rows).map(|i| json!({ "id": i })).collect())
    }

    #[tokio::test]
    async fn test_single_shot_is_one_page() {
        let session = session(10);
        let fetcher: Arc<dyn RowFetcher<InMemorySession>> = Arc::new(SingleShotFetcher);
        let pages: Vec<_> = fetcher
            .fetch(&session, &MemoryStatement::new(1, "t"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 10);
        assert_eq!(fetcher.name(), "single_shot");
    }

    #[tokio::test]
    async fn test_max_pages_truncates() {
        let session = session(10);
        let options = ContinuousPagingOptions::default()
            .with_page_size(3, PageUnit::Rows)
            .with_max_pages(2);
        let fetcher = ContinuousPagingFetcher::factory::<InMemorySession>(options);
        let pages: Vec<_> = fetcher
            .fetch(&session, &MemoryStatement::new(1, "t"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_per_second() {
        let session = session(10);
        let options = ContinuousPagingOptions::default()
            .with_page_size(2, PageUnit::Rows)
            .with_max_pages_per_second(2);
        let fetcher = ContinuousPagingFetcher::factory::<InMemorySession>(options);

        let start = Instant::now();
        let pages: Vec<_> = fetcher
            .fetch(&session, &MemoryStatement::new(1, "t"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        // 5 pages at 2 per second: the first is immediate, four more 500ms apart
        assert_eq!(pages.len(), 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "elapsed {elapsed:?}");
    }
}
