//! Session layer
//!
//! This module provides:
//! - [`Session`] trait for statement execution (writes and single-shot reads)
//! - [`ContinuousPagingSession`] trait for sessions that stream pages of rows
//! - [`InMemorySession`] for testing

mod memory;
mod traits;

pub use memory::{InMemorySession, MemoryStatement, SessionStats};
pub use traits::{ContinuousPagingSession, RowPages, Session};
