//! Property tests for PositionsTracker interval merging
//!
//! Run with: cargo test -p bulkload-executor --test tracker_proptest

use std::collections::BTreeSet;

use bulkload_executor::tracker::{Interval, PositionsTracker};
use proptest::prelude::*;

const RESOURCE: &str = "file:///data.csv";

fn tracker_with(positions: &[u64]) -> PositionsTracker {
    let tracker = PositionsTracker::new();
    for &position in positions {
        tracker
            .update(RESOURCE, position)
            .expect("generated positions are positive");
    }
    tracker
}

/// Canonical intervals of a set of positions, computed naively
fn expected_intervals(positions: &BTreeSet<u64>) -> Vec<Interval> {
    let mut intervals: Vec<Interval> = Vec::new();
    for &position in positions {
        match intervals.last_mut() {
            Some(last) if last.hi + 1 == position => last.hi = position,
            _ => intervals.push(Interval::new(position, position)),
        }
    }
    intervals
}

proptest! {
    #[test]
    fn intervals_are_sorted_disjoint_and_non_adjacent(
        positions in prop::collection::vec(1_u64..200, 0..300)
    ) {
        let tracker = tracker_with(&positions);
        prop_assert!(tracker.check_invariants().is_ok());

        let intervals = tracker.positions(RESOURCE);
        for pair in intervals.windows(2) {
            prop_assert!(pair[0].hi + 1 < pair[1].lo, "{} and {} touch", pair[0], pair[1]);
        }
        for interval in &intervals {
            prop_assert!(interval.lo >= 1 && interval.lo <= interval.hi);
        }
    }

    #[test]
    fn insertion_order_does_not_matter(
        positions in prop::collection::vec(1_u64..100, 0..150).prop_shuffle()
    ) {
        let tracker = tracker_with(&positions);
        let unique: BTreeSet<u64> = positions.iter().copied().collect();

        prop_assert_eq!(tracker.positions(RESOURCE), expected_intervals(&unique));

        let sorted: Vec<u64> = unique.iter().copied().collect();
        prop_assert_eq!(tracker_with(&sorted).positions(RESOURCE), tracker.positions(RESOURCE));
    }

    #[test]
    fn inserted_positions_stay_covered(
        positions in prop::collection::vec(1_u64..500, 1..200)
    ) {
        let tracker = PositionsTracker::new();
        for (i, &position) in positions.iter().enumerate() {
            tracker.update(RESOURCE, position).expect("positive position");
            for &earlier in &positions[..=i] {
                prop_assert!(tracker.covered(RESOURCE, earlier));
            }
        }

        let unique: BTreeSet<u64> = positions.iter().copied().collect();
        prop_assert_eq!(tracker.covered_count(RESOURCE), unique.len() as u64);
        for position in 1..500 {
            prop_assert_eq!(tracker.covered(RESOURCE, position), unique.contains(&position));
        }
    }

    #[test]
    fn ranges_merge_like_single_positions(
        ranges in prop::collection::vec((1_u64..150, 0_u64..10), 0..40)
    ) {
        let by_range = PositionsTracker::new();
        let by_position = PositionsTracker::new();
        for &(lo, len) in &ranges {
            by_range.merge_range(RESOURCE, lo, lo + len).expect("valid range");
            for position in lo..=lo + len {
                by_position.update(RESOURCE, position).expect("positive position");
            }
        }
        prop_assert!(by_range.check_invariants().is_ok());
        prop_assert_eq!(by_range.positions(RESOURCE), by_position.positions(RESOURCE));
    }
}
