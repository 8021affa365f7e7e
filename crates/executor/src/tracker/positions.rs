//! Interval sets of processed positions

use std::collections::BTreeMap;
use std::ops::{Bound, RangeInclusive};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::TrackerError;

/// Closed interval `[lo, hi]` of positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub lo: u64,
    pub hi: u64,
}

impl Interval {
    /// Create an interval; `lo` must not exceed `hi`
    pub fn new(lo: u64, hi: u64) -> Self {
        debug_assert!(lo <= hi, "inverted interval [{lo}, {hi}]");
        Self { lo, hi }
    }

    /// Interval containing a single position
    pub fn singleton(position: u64) -> Self {
        Self::new(position, position)
    }

    /// Whether `position` lies inside
    pub fn contains(&self, position: u64) -> bool {
        self.lo <= position && position <= self.hi
    }

    /// Number of positions covered
    pub fn len(&self) -> u64 {
        self.hi - self.lo + 1
    }

    /// Always false, intervals are never empty
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.lo, self.hi)
    }
}

/// Ordered, disjoint, non-adjacent intervals keyed by lower bound
type Ranges = BTreeMap<u64, u64>;

/// Records which positions of each resource have been processed
///
/// Positions are positive integers chosen by the caller (a line number, a
/// record ordinal). For every resource the tracker keeps a set of closed
/// intervals that are sorted, pairwise disjoint and never adjacent: adding a
/// position either does nothing (already covered), grows a neighbour by one,
/// bridges two neighbours into one interval, or starts a new singleton.
///
/// Updates to different resources proceed concurrently; updates to the same
/// resource are serialized by the map shard lock.
///
/// # Example
///
/// ```
/// use bulkload_executor::tracker::{Interval, PositionsTracker};
///
/// let tracker = PositionsTracker::new();
/// for position in [3, 1, 2, 5] {
///     tracker.update("file:///data.csv", position).unwrap();
/// }
/// assert_eq!(
///     tracker.positions("file:///data.csv"),
///     vec![Interval::new(1, 3), Interval::new(5, 5)]
/// );
/// assert!(tracker.covered("file:///data.csv", 2));
/// assert!(!tracker.covered("file:///data.csv", 4));
/// ```
#[derive(Debug, Default)]
pub struct PositionsTracker {
    resources: DashMap<String, Ranges>,
}

impl PositionsTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `position` of `resource` as processed
    ///
    /// Returns `true` if the position was not covered before.
    pub fn update(&self, resource: &str, position: u64) -> Result<bool, TrackerError> {
        if position == 0 {
            return Err(TrackerError::InvalidPosition(position));
        }
        Ok(self.with_ranges(resource, |ranges| {
            if is_covered(ranges, position) {
                false
            } else {
                merge(ranges, position, position);
                true
            }
        }))
    }

    /// Mark every position in `[lo, hi]` as processed
    pub fn merge_range(&self, resource: &str, lo: u64, hi: u64) -> Result<(), TrackerError> {
        if lo == 0 || lo > hi {
            return Err(TrackerError::InvalidInterval {
                resource: resource.to_string(),
                lo,
                hi,
            });
        }
        self.with_ranges(resource, |ranges| merge(ranges, lo, hi));
        Ok(())
    }

    /// Whether `position` of `resource` has been processed
    pub fn covered(&self, resource: &str, position: u64) -> bool {
        self.resources
            .get(resource)
            .is_some_and(|ranges| is_covered(&ranges, position))
    }

    /// Processed intervals of `resource`, sorted by lower bound
    pub fn positions(&self, resource: &str) -> Vec<Interval> {
        self.resources
            .get(resource)
            .map(|ranges| to_intervals(&ranges))
            .unwrap_or_default()
    }

    /// Positions of `range` not yet processed, as maximal intervals
    ///
    /// Used on resume to decide which input positions still need work.
    pub fn uncovered(&self, resource: &str, range: RangeInclusive<u64>) -> Vec<Interval> {
        let (start, end) = (*range.start().max(&1), *range.end());
        if start > end {
            return Vec::new();
        }
        let Some(ranges) = self.resources.get(resource) else {
            return vec![Interval::new(start, end)];
        };

        let mut gaps = Vec::new();
        let mut cursor = start;
        let first = ranges
            .range(..=start)
            .next_back()
            .map(|(&lo, &hi)| (lo, hi))
            .into_iter();
        let rest = (start < end)
            .then(|| ranges.range(start + 1..=end))
            .into_iter()
            .flatten()
            .map(|(&lo, &hi)| (lo, hi));

        for (lo, hi) in first.chain(rest) {
            if hi < cursor {
                continue;
            }
            if lo > cursor {
                gaps.push(Interval::new(cursor, lo - 1));
            }
            if hi >= end {
                return gaps;
            }
            cursor = hi + 1;
        }
        gaps.push(Interval::new(cursor, end));
        gaps
    }

    /// Number of processed positions of `resource`
    pub fn covered_count(&self, resource: &str) -> u64 {
        self.positions(resource).iter().map(Interval::len).sum()
    }

    /// Names of all tracked resources, sorted
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Copy of every resource's intervals
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Interval>> {
        self.resources
            .iter()
            .map(|entry| (entry.key().clone(), to_intervals(entry.value())))
            .collect()
    }

    /// Whether nothing has been tracked
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Verify that every interval set is sorted, disjoint and non-adjacent
    ///
    /// A violation is a merge defect, never a runtime condition.
    pub fn check_invariants(&self) -> Result<(), TrackerError> {
        for entry in self.resources.iter() {
            let mut previous: Option<(u64, u64)> = None;
            for (&lo, &hi) in entry.value() {
                if lo == 0 || lo > hi {
                    return Err(TrackerError::InvariantViolation(format!(
                        "{}: malformed interval [{lo},{hi}]",
                        entry.key()
                    )));
                }
                if let Some((plo, phi)) = previous {
                    if phi.saturating_add(1) >= lo {
                        return Err(TrackerError::InvariantViolation(format!(
                            "{}: [{plo},{phi}] touches [{lo},{hi}]",
                            entry.key()
                        )));
                    }
                }
                previous = Some((lo, hi));
            }
        }
        Ok(())
    }

    fn with_ranges<T>(&self, resource: &str, f: impl FnOnce(&mut Ranges) -> T) -> T {
        if let Some(mut ranges) = self.resources.get_mut(resource) {
            return f(&mut ranges);
        }
        let mut ranges = self.resources.entry(resource.to_string()).or_default();
        f(&mut ranges)
    }
}

fn is_covered(ranges: &Ranges, position: u64) -> bool {
    ranges
        .range(..=position)
        .next_back()
        .is_some_and(|(_, &hi)| hi >= position)
}

fn to_intervals(ranges: &Ranges) -> Vec<Interval> {
    ranges
        .iter()
        .map(|(&lo, &hi)| Interval::new(lo, hi))
        .collect()
}

/// Insert `[lo, hi]`, absorbing every interval it overlaps or touches
///
/// Walks backwards from the last interval starting at or before `hi + 1`
/// and stops at the first one ending before `lo - 1`, so only touched
/// intervals are visited.
fn merge(ranges: &mut Ranges, lo: u64, hi: u64) {
    let upper = hi.saturating_add(1);
    let lower = lo.saturating_sub(1);

    let touched: Vec<(u64, u64)> = ranges
        .range(..=upper)
        .rev()
        .take_while(|(_, &end)| end >= lower)
        .map(|(&start, &end)| (start, end))
        .collect();

    let mut merged_lo = lo;
    let mut merged_hi = hi;
    for (start, end) in touched {
        merged_lo = merged_lo.min(start);
        merged_hi = merged_hi.max(end);
        ranges.remove(&start);
    }
    ranges.insert(merged_lo, merged_hi);

    debug_assert!(
        ranges
            .range(..merged_lo)
            .next_back()
            .map_or(true, |(_, &end)| end.saturating_add(1) < merged_lo),
        "interval before [{merged_lo},{merged_hi}] was not merged"
    );
    debug_assert!(
        ranges
            .range((Bound::Excluded(merged_lo), Bound::Unbounded))
            .next()
            .map_or(true, |(&start, _)| merged_hi.saturating_add(1) < start),
        "interval after [{merged_lo},{merged_hi}] was not merged"
    );
}
