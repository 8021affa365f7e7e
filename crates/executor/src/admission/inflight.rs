//! Bounded in-flight operations

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::ExecutorError;

/// Bounds the number of concurrently outstanding operations
///
/// Slots are handed out as [`InFlightPermit`]s which release themselves on
/// drop, so a slot is returned exactly once on every exit path (completion,
/// failure, cancellation of the owning task, or panic).
#[derive(Debug, Clone)]
pub struct InFlightLimiter {
    slots: Arc<Semaphore>,
    max_in_flight: usize,
}

/// One reserved in-flight slot
#[derive(Debug)]
pub struct InFlightPermit {
    _permit: OwnedSemaphorePermit,
}

impl InFlightLimiter {
    /// Create a limiter with `max_in_flight` slots
    ///
    /// The count is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Wait for a free slot and reserve it
    pub async fn acquire(&self) -> Result<InFlightPermit, ExecutorError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::Closed)?;
        debug_assert!(self.outstanding() <= self.max_in_flight);
        Ok(InFlightPermit { _permit: permit })
    }

    /// Number of currently outstanding operations
    pub fn outstanding(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }

    /// Configured maximum
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Wait until no operation is outstanding
    ///
    /// Polls the free slot count until every slot is back or `timeout` passes.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), ExecutorError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let outstanding = self.outstanding();
            if outstanding == 0 {
                debug!("All in-flight operations completed");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(outstanding, "Drain timeout reached");
                return Err(ExecutorError::DrainTimeout {
                    outstanding,
                    waited: timeout,
                });
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = InFlightLimiter::new(2);
        assert_eq!(limiter.outstanding(), 0);

        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.outstanding(), 2);

        drop(a);
        assert_eq!(limiter.outstanding(), 1);
        drop(b);
        assert_eq!(limiter.outstanding(), 0);
    }

    #[test]
    fn test_max_in_flight_is_clamped() {
        let limiter = InFlightLimiter::new(0);
        assert_eq!(limiter.max_in_flight(), 1);

        let limiter = InFlightLimiter::new(usize::MAX);
        assert_eq!(limiter.max_in_flight(), Semaphore::MAX_PERMITS);
        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let limiter = InFlightLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_permit_released_on_panic() {
        let limiter = InFlightLimiter::new(1);

        let task = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                panic!("operation blew up");
            })
        };
        assert!(task.await.is_err());

        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_permit_released_on_abort() {
        let limiter = InFlightLimiter::new(1);

        let task = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                std::future::pending::<()>().await;
            })
        };
        while limiter.outstanding() == 0 {
            tokio::task::yield_now().await;
        }

        task.abort();
        let _ = task.await;
        assert_eq!(limiter.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_timeout() {
        let limiter = InFlightLimiter::new(3);
        let _held = limiter.acquire().await.unwrap();

        let err = limiter
            .wait_idle(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::DrainTimeout { outstanding: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_completes() {
        let limiter = InFlightLimiter::new(3);
        let held = limiter.acquire().await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(held);
        });

        limiter.wait_idle(Duration::from_secs(1)).await.unwrap();
    }
}
