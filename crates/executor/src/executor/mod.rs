//! Bulk execution
//!
//! This module provides:
//! - [`BulkExecutor`] - Admission-controlled dispatch of writes and reads
//! - [`BulkExecutorBuilder`] - Configuration and read strategy selection
//!
//! # Write dispatch
//!
//! ```text
//!  statements ──► dispatcher ──► session call ──► completions ──► deliverer ──► ResultSequence
//!                    │  ▲                                              │
//!                    │  └──────── result window (max_in_flight) ◄──────┘
//!                    └──► InFlightLimiter + RateGate
//! ```
//!
//! The dispatcher pulls the next statement only when the result window has
//! room, so results waiting for consumer demand hold back the input.

mod builder;
mod bulk;
mod fetch;

pub use builder::BulkExecutorBuilder;
pub use bulk::{BulkExecutor, ReadSequence, WriteSequence};
