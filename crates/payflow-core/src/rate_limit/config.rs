//! Rate limiting configuration.

use crate::prelude::*;

/// Token-bucket parameters for a single tier.
#[derive(Clone, Copy, Debug)]
pub struct TierLimit {
	/// Bucket capacity; also the burst allowance.
	pub max_tokens: u32,
	/// Tokens credited per elapsed refill interval.
	pub refill_rate: u32,
	/// Length of one refill interval, in seconds.
	pub refill_interval_secs: i64,
}

impl TierLimit {
	pub fn new(max_tokens: u32, refill_rate: u32, refill_interval_secs: i64) -> Self {
		Self { max_tokens, refill_rate, refill_interval_secs }
	}

	fn validate(&self, tier: &str) -> PfResult<()> {
		if self.max_tokens == 0 {
			return Err(Error::ValidationError(format!("{}: max_tokens must be > 0", tier)));
		}
		if self.refill_rate == 0 {
			return Err(Error::ValidationError(format!("{}: refill_rate must be > 0", tier)));
		}
		if self.refill_interval_secs <= 0 {
			return Err(Error::ValidationError(format!(
				"{}: refill_interval_secs must be > 0",
				tier
			)));
		}
		Ok(())
	}
}

/// Main rate limit configuration.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
	/// Shared allowance across every caller.
	pub global: TierLimit,
	/// Per client IP.
	pub per_ip: TierLimit,
	/// Per customer email.
	pub per_email: TierLimit,
	/// Hard cap on tracked IP buckets (memory bound).
	pub max_tracked_ips: usize,
	/// Hard cap on tracked email buckets (memory bound).
	pub max_tracked_emails: usize,
	/// Buckets idle longer than this are purged by the eviction sweep;
	/// purging resets the key's allowance.
	pub idle_ttl_secs: i64,
}

impl RateLimitConfig {
	/// Rejects nonsensical configurations; callers keep the prior
	/// configuration when this fails.
	pub fn validate(&self) -> PfResult<()> {
		self.global.validate("global")?;
		self.per_ip.validate("per_ip")?;
		self.per_email.validate("per_email")?;
		if self.max_tracked_ips == 0 || self.max_tracked_emails == 0 {
			return Err(Error::ValidationError("tracked bucket caps must be > 0".into()));
		}
		if self.idle_ttl_secs <= 0 {
			return Err(Error::ValidationError("idle_ttl_secs must be > 0".into()));
		}
		Ok(())
	}
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			// Global: generous, exists to cap aggregate generator load
			global: TierLimit::new(500, 100, 60),
			// Per IP: a payer retries a handful of times per half hour
			per_ip: TierLimit::new(10, 5, 1800),
			// Per email: reuse (priority 1) makes repeat requests cheap,
			// so fresh-allocation attempts can stay scarce
			per_email: TierLimit::new(5, 2, 3600),
			max_tracked_ips: 10_000,
			max_tracked_emails: 10_000,
			idle_ttl_secs: 6 * 3600,
		}
	}
}


// vim: ts=4
