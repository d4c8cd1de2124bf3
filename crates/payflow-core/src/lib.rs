//! Core infrastructure for the Payflow engine.
//!
//! This crate contains the admission-control rate limiter and the task
//! scheduler used to drive the periodic sweeps. Extracting these from the
//! pool crate keeps the allocator domain free of infrastructure concerns.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod prelude;
pub mod rate_limit;
pub mod scheduler;

pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use scheduler::{CronSchedule, RetryPolicy, Scheduler, Task, TaskId};

// vim: ts=4
