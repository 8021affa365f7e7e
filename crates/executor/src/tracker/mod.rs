//! Position tracking for resumable runs
//!
//! This module provides:
//! - [`PositionsTracker`] - Per-resource interval sets of processed positions
//! - [`Interval`] - Closed interval of positions
//! - [`Checkpoint`] - JSON persistence of a tracker between runs
//!
//! The executor never updates the tracker itself; callers record a position
//! once they have confirmed its result, and consult the tracker on resume.

mod checkpoint;
mod positions;

pub use checkpoint::Checkpoint;
pub use positions::{Interval, PositionsTracker};

/// Tracker errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Positions start at 1
    #[error("invalid position {0}: positions start at 1")]
    InvalidPosition(u64),

    /// Interval bounds are zero or inverted
    #[error("invalid interval [{lo},{hi}] for {resource}")]
    InvalidInterval { resource: String, lo: u64, hi: u64 },

    /// Interval set is no longer sorted, disjoint and non-adjacent
    #[error("tracker invariant violated: {0}")]
    InvariantViolation(String),

    /// Checkpoint file I/O failed
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint could not be encoded or decoded
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
