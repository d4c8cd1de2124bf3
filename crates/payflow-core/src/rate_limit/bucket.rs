//! Token bucket primitive.
//!
//! Refill is lazy (on access) and drift-free: `last_refill` only ever
//! advances by whole multiples of the refill interval, so partial intervals
//! are neither credited early nor lost.

use super::config::TierLimit;
use crate::prelude::*;

#[derive(Clone, Debug)]
pub struct TokenBucket {
	tokens: u32,
	max_tokens: u32,
	refill_rate: u32,
	refill_interval_secs: i64,
	last_refill: Timestamp,
	last_access: Timestamp,
	blocked: bool,
}

impl TokenBucket {
	/// A new bucket starts full.
	pub fn new(limit: &TierLimit, now: Timestamp) -> Self {
		Self {
			tokens: limit.max_tokens,
			max_tokens: limit.max_tokens,
			refill_rate: limit.refill_rate,
			refill_interval_secs: limit.refill_interval_secs,
			last_refill: now,
			last_access: now,
			blocked: false,
		}
	}

	/// Credits whole elapsed intervals. `last_refill` advances by exactly
	/// `intervals * interval`, never snaps to `now`.
	pub fn refill_at(&mut self, now: Timestamp) {
		let elapsed = now.seconds_since(self.last_refill);
		if elapsed < self.refill_interval_secs {
			return;
		}
		let intervals = elapsed / self.refill_interval_secs;
		let credit = (intervals as u64).saturating_mul(u64::from(self.refill_rate));
		self.tokens = u64::from(self.tokens)
			.saturating_add(credit)
			.min(u64::from(self.max_tokens)) as u32;
		self.last_refill = Timestamp(self.last_refill.0 + intervals * self.refill_interval_secs);
	}

	/// Refills, then consumes one token. Returns `false` when the bucket is
	/// blocked or empty; the access time is recorded either way.
	pub fn try_consume_at(&mut self, now: Timestamp) -> bool {
		self.last_access = now;
		if self.blocked {
			return false;
		}
		self.refill_at(now);
		if self.tokens == 0 {
			return false;
		}
		self.tokens -= 1;
		true
	}

	/// Returns one token consumed earlier in the same admission check.
	/// Capped at `max_tokens`: a refill landing between consume and refund
	/// must not overfill the bucket.
	pub fn refund(&mut self) {
		self.tokens = (self.tokens + 1).min(self.max_tokens);
	}

	/// Re-applies tier parameters, clamping the balance to the new cap.
	pub fn reconfigure(&mut self, limit: &TierLimit) {
		self.max_tokens = limit.max_tokens;
		self.refill_rate = limit.refill_rate;
		self.refill_interval_secs = limit.refill_interval_secs;
		self.tokens = self.tokens.min(self.max_tokens);
	}

	pub fn block(&mut self) {
		self.blocked = true;
	}

	pub fn unblock(&mut self) {
		self.blocked = false;
	}

	pub fn is_blocked(&self) -> bool {
		self.blocked
	}

	pub fn tokens(&self) -> u32 {
		self.tokens
	}

	pub fn max_tokens(&self) -> u32 {
		self.max_tokens
	}

	pub fn last_access(&self) -> Timestamp {
		self.last_access
	}

	pub fn idle_secs(&self, now: Timestamp) -> i64 {
		now.seconds_since(self.last_access)
	}
}


// vim: ts=4
