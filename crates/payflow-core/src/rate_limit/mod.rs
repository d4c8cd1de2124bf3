//! Rate limiting subsystem.
//!
//! A three-tier token-bucket admission gate for address generation: one
//! global bucket, one lazily created bucket per client IP, one per customer
//! email. Checks are strictly hierarchical and a denial at a later tier
//! refunds every token consumed by earlier tiers in the same call.

pub mod bucket;
pub mod config;
pub mod error;
pub mod limiter;

pub use bucket::TokenBucket;
pub use config::{RateLimitConfig, TierLimit};
pub use error::RateLimitError;
pub use limiter::{ActiveLimit, LimitScope, RateLimiter, RateLimiterStats};

// vim: ts=4
