//! Load driver for the bulk execution engine
//!
//! Writes the records of one resource through a [`BulkExecutor`], recording
//! confirmed positions so that an interrupted or partially failed run can be
//! resumed from its checkpoint.
//!
//! [`BulkExecutor`]: bulkload_executor::BulkExecutor

pub mod config;
pub mod load;

pub use config::RunnerConfig;
pub use load::{run, LoadSummary};
