//! Operation rate limiting

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Horizon used when the next slot lies beyond what an `Instant` can hold
const STALLED: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Admits operations at a maximum rate
///
/// Each admission reserves the next free slot on a schedule spaced
/// `1 / rate` seconds apart, so no burst is ever admitted and the number of
/// admissions in any one-second window never exceeds the rate. Reservations
/// are taken under a lock, which gives callers FIFO admission order.
///
/// # Example
///
/// ```ignore
/// use bulkload_executor::admission::RateGate;
///
/// let gate = RateGate::per_second(1000.0);
/// gate.acquire().await;
/// ```
#[derive(Debug)]
pub struct RateGate {
    interval: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateGate {
    /// A gate that never waits
    pub fn unbounded() -> Self {
        Self {
            interval: None,
            next_slot: Mutex::new(None),
        }
    }

    /// A gate admitting at most `rate` operations per second
    ///
    /// Non-positive or non-finite rates produce an unbounded gate. A rate
    /// too small for its spacing to be represented admits one operation and
    /// then stalls.
    pub fn per_second(rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::unbounded();
        }
        let interval = Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::MAX);
        Self {
            interval: Some(interval),
            next_slot: Mutex::new(None),
        }
    }

    /// Build from an optional rate (None = unbounded)
    pub fn from_rate(rate: Option<f64>) -> Self {
        rate.map_or_else(Self::unbounded, Self::per_second)
    }

    /// Whether this gate limits anything
    pub fn is_unbounded(&self) -> bool {
        self.interval.is_none()
    }

    /// Spacing between two admissions
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Wait until one more operation may be admitted
    pub async fn acquire(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot.checked_add(interval).unwrap_or(slot + STALLED));
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
