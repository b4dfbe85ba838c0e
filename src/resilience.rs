//! Admission control and retry primitives wrapped around every upstream call.
//!
//! - [`rate_limit`] gates connector requests with a single process-wide fixed window.
//! - [`retry`] bounds each attempt with a timeout, classifies failures, and backs off
//!   exponentially while honoring caller cancellation.

pub mod rate_limit;
pub mod retry;

pub use rate_limit::*;
pub use retry::*;
