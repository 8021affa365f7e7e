//! Admission control for session calls
//!
//! This module provides:
//! - [`RateGate`] - Maximum operations per second, independent of concurrency
//! - [`InFlightLimiter`] - Maximum concurrently outstanding operations
//!
//! Both are owned by one executor instance; nothing here is process-wide.
//!
//! # Dispatch protocol
//!
//! ```text
//!   statement ──► InFlightLimiter::acquire ──► RateGate::acquire ──► session call
//!                        │                                                │
//!                        └──────────── InFlightPermit dropped ◄───────────┘
//! ```

mod inflight;
mod rate;

pub use inflight::{InFlightLimiter, InFlightPermit};
pub use rate::RateGate;
