//! Rate limiter.
//!
//! One global bucket plus lazily created per-IP and per-email buckets, all
//! behind a single coarse lock: bucket-map mutation is rare relative to the
//! cost of an allocation, and the hierarchical check must be atomic so a
//! denied call can refund exactly what it consumed.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use super::bucket::TokenBucket;
use super::config::RateLimitConfig;
use super::error::RateLimitError;
use crate::prelude::*;
use payflow_types::types::serialize_timestamp_iso;

/// Which bucket family an administrative operation addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
	Global,
	Ip,
	Email,
}

impl std::fmt::Display for LimitScope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			LimitScope::Global => write!(f, "global"),
			LimitScope::Ip => write!(f, "ip"),
			LimitScope::Email => write!(f, "email"),
		}
	}
}

/// Observability snapshot of one live bucket.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLimit {
	pub scope: LimitScope,
	pub key: Box<str>,
	pub tokens: u32,
	pub max_tokens: u32,
	pub blocked: bool,
	#[serde(serialize_with = "serialize_timestamp_iso")]
	pub last_access: Timestamp,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
	pub tracked_ips: usize,
	pub tracked_emails: usize,
	pub global_tokens: u32,
	pub global_max_tokens: u32,
	pub total_allowed: u64,
	pub total_denied: u64,
}

struct Inner {
	config: RateLimitConfig,
	global: TokenBucket,
	per_ip: LruCache<Box<str>, TokenBucket>,
	per_email: LruCache<Box<str>, TokenBucket>,
}

pub struct RateLimiter {
	inner: Mutex<Inner>,
	total_allowed: AtomicU64,
	total_denied: AtomicU64,
}

fn cache_cap(cap: usize) -> NonZeroUsize {
	NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN)
}

impl RateLimiter {
	pub fn new(config: RateLimitConfig) -> Self {
		let now = Timestamp::now();
		let inner = Inner {
			global: TokenBucket::new(&config.global, now),
			per_ip: LruCache::new(cache_cap(config.max_tracked_ips)),
			per_email: LruCache::new(cache_cap(config.max_tracked_emails)),
			config,
		};
		Self {
			inner: Mutex::new(inner),
			total_allowed: AtomicU64::new(0),
			total_denied: AtomicU64::new(0),
		}
	}

	/// Admission check for one address-generation request.
	pub fn allow(&self, ip: &str, email: &str) -> Result<(), RateLimitError> {
		self.allow_at(ip, email, Timestamp::now())
	}

	/// Check-and-consume, strictly hierarchical: global, then IP, then
	/// email. A denial at a later tier refunds every token consumed by an
	/// earlier tier in this call, so a denied request leaves all buckets
	/// exactly as they were.
	pub fn allow_at(&self, ip: &str, email: &str, now: Timestamp) -> Result<(), RateLimitError> {
		let mut inner = self.inner.lock();

		if !inner.global.try_consume_at(now) {
			drop(inner);
			self.total_denied.fetch_add(1, Ordering::Relaxed);
			debug!(ip, email, "denied: global bucket empty");
			return Err(RateLimitError::Global);
		}

		let ip_limit = inner.config.per_ip;
		let ip_bucket =
			inner.per_ip.get_or_insert_mut(ip.into(), || TokenBucket::new(&ip_limit, now));
		if !ip_bucket.try_consume_at(now) {
			inner.global.refund();
			drop(inner);
			self.total_denied.fetch_add(1, Ordering::Relaxed);
			debug!(ip, email, "denied: IP bucket empty");
			return Err(RateLimitError::Ip);
		}

		let email_limit = inner.config.per_email;
		let email_bucket =
			inner.per_email.get_or_insert_mut(email.into(), || TokenBucket::new(&email_limit, now));
		if !email_bucket.try_consume_at(now) {
			if let Some(ip_bucket) = inner.per_ip.get_mut(ip) {
				ip_bucket.refund();
			}
			inner.global.refund();
			drop(inner);
			self.total_denied.fetch_add(1, Ordering::Relaxed);
			debug!(ip, email, "denied: email bucket empty");
			return Err(RateLimitError::Email);
		}

		drop(inner);
		self.total_allowed.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	/// Purges buckets idle longer than the configured TTL. Purging a key
	/// resets its allowance; the next request starts a fresh, full bucket.
	pub fn evict_idle(&self) -> usize {
		self.evict_idle_at(Timestamp::now())
	}

	pub fn evict_idle_at(&self, now: Timestamp) -> usize {
		let mut inner = self.inner.lock();
		let ttl = inner.config.idle_ttl_secs;

		let stale_ips: Vec<Box<str>> = inner
			.per_ip
			.iter()
			.filter(|(_, b)| b.idle_secs(now) > ttl && !b.is_blocked())
			.map(|(k, _)| k.clone())
			.collect();
		for key in &stale_ips {
			inner.per_ip.pop(key);
		}

		let stale_emails: Vec<Box<str>> = inner
			.per_email
			.iter()
			.filter(|(_, b)| b.idle_secs(now) > ttl && !b.is_blocked())
			.map(|(k, _)| k.clone())
			.collect();
		for key in &stale_emails {
			inner.per_email.pop(key);
		}

		let evicted = stale_ips.len() + stale_emails.len();
		if evicted > 0 {
			debug!(evicted, "evicted idle rate-limit buckets");
		}
		evicted
	}

	// Administrative surface
	//************************

	/// Drops the bucket for a key, restoring its full allowance.
	pub fn reset_limits(&self, scope: LimitScope, key: &str) -> PfResult<()> {
		let mut inner = self.inner.lock();
		match scope {
			LimitScope::Global => {
				let limit = inner.config.global;
				inner.global = TokenBucket::new(&limit, Timestamp::now());
			}
			LimitScope::Ip => {
				inner.per_ip.pop(key);
			}
			LimitScope::Email => {
				inner.per_email.pop(key);
			}
		}
		info!(%scope, key, "rate limit reset");
		Ok(())
	}

	/// Marks a key as blocked; a blocked bucket denies before any token
	/// math until `reset_limits` or `bulk_reset` clears it.
	pub fn block_limit(&self, scope: LimitScope, key: &str) -> PfResult<()> {
		let now = Timestamp::now();
		let mut inner = self.inner.lock();
		match scope {
			LimitScope::Global => inner.global.block(),
			LimitScope::Ip => {
				let limit = inner.config.per_ip;
				inner
					.per_ip
					.get_or_insert_mut(key.into(), || TokenBucket::new(&limit, now))
					.block();
			}
			LimitScope::Email => {
				let limit = inner.config.per_email;
				inner
					.per_email
					.get_or_insert_mut(key.into(), || TokenBucket::new(&limit, now))
					.block();
			}
		}
		warn!(%scope, key, "rate limit blocked");
		Ok(())
	}

	/// Clears every per-key bucket and restores the global allowance.
	pub fn bulk_reset(&self) {
		let now = Timestamp::now();
		let mut inner = self.inner.lock();
		let limit = inner.config.global;
		inner.global = TokenBucket::new(&limit, now);
		inner.per_ip.clear();
		inner.per_email.clear();
		info!("rate limiter bulk reset");
	}

	/// Swaps in a new configuration. The prior configuration is untouched
	/// when validation fails; live buckets are reconfigured in place with
	/// balances clamped to the new caps.
	pub fn update_global_config(&self, config: RateLimitConfig) -> PfResult<()> {
		config.validate()?;
		let mut inner = self.inner.lock();
		inner.global.reconfigure(&config.global);
		let per_ip = config.per_ip;
		for (_, bucket) in inner.per_ip.iter_mut() {
			bucket.reconfigure(&per_ip);
		}
		let per_email = config.per_email;
		for (_, bucket) in inner.per_email.iter_mut() {
			bucket.reconfigure(&per_email);
		}
		inner.config = config;
		info!("rate limiter configuration updated");
		Ok(())
	}

	// Observability
	//***************

	pub fn active_limits(&self) -> Vec<ActiveLimit> {
		let inner = self.inner.lock();
		let mut limits = Vec::with_capacity(1 + inner.per_ip.len() + inner.per_email.len());
		limits.push(ActiveLimit {
			scope: LimitScope::Global,
			key: "*".into(),
			tokens: inner.global.tokens(),
			max_tokens: inner.global.max_tokens(),
			blocked: inner.global.is_blocked(),
			last_access: inner.global.last_access(),
		});
		for (key, bucket) in inner.per_ip.iter() {
			limits.push(ActiveLimit {
				scope: LimitScope::Ip,
				key: key.clone(),
				tokens: bucket.tokens(),
				max_tokens: bucket.max_tokens(),
				blocked: bucket.is_blocked(),
				last_access: bucket.last_access(),
			});
		}
		for (key, bucket) in inner.per_email.iter() {
			limits.push(ActiveLimit {
				scope: LimitScope::Email,
				key: key.clone(),
				tokens: bucket.tokens(),
				max_tokens: bucket.max_tokens(),
				blocked: bucket.is_blocked(),
				last_access: bucket.last_access(),
			});
		}
		limits
	}

	pub fn stats(&self) -> RateLimiterStats {
		let inner = self.inner.lock();
		RateLimiterStats {
			tracked_ips: inner.per_ip.len(),
			tracked_emails: inner.per_email.len(),
			global_tokens: inner.global.tokens(),
			global_max_tokens: inner.global.max_tokens(),
			total_allowed: self.total_allowed.load(Ordering::Relaxed),
			total_denied: self.total_denied.load(Ordering::Relaxed),
		}
	}

	#[cfg(test)]
	fn tokens_of(&self, scope: LimitScope, key: &str) -> Option<u32> {
		let mut inner = self.inner.lock();
		match scope {
			LimitScope::Global => Some(inner.global.tokens()),
			LimitScope::Ip => inner.per_ip.get_mut(key).map(|b| b.tokens()),
			LimitScope::Email => inner.per_email.get_mut(key).map(|b| b.tokens()),
		}
	}
}

impl std::fmt::Debug for RateLimiter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let stats = self.stats();
		f.debug_struct("RateLimiter")
			.field("tracked_ips", &stats.tracked_ips)
			.field("tracked_emails", &stats.tracked_emails)
			.field("global_tokens", &stats.global_tokens)
			.finish()
	}
}

impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(RateLimitConfig::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rate_limit::config::TierLimit;

	fn config(global: (u32, u32), ip: (u32, u32), email: (u32, u32)) -> RateLimitConfig {
		RateLimitConfig {
			global: TierLimit::new(global.0, global.1, 60),
			per_ip: TierLimit::new(ip.0, ip.1, 60),
			per_email: TierLimit::new(email.0, email.1, 60),
			..RateLimitConfig::default()
		}
	}

	#[test]
	fn allows_within_limits() {
		let limiter = RateLimiter::new(config((10, 1), (5, 1), (5, 1)));
		let now = Timestamp(1_000);
		for _ in 0..5 {
			assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		}
	}

	#[test]
	fn email_denial_refunds_global_and_ip() {
		// Email bucket holds 1 token; the second call is denied at the
		// email tier and must restore global and IP to pre-call values.
		let limiter = RateLimiter::new(config((10, 1), (5, 1), (1, 1)));
		let now = Timestamp(1_000);

		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		let global_before = limiter.tokens_of(LimitScope::Global, "*").unwrap();
		let ip_before = limiter.tokens_of(LimitScope::Ip, "10.0.0.1").unwrap();

		let denied = limiter.allow_at("10.0.0.1", "a@example.com", now);
		assert_eq!(denied, Err(RateLimitError::Email));
		assert_eq!(limiter.tokens_of(LimitScope::Global, "*").unwrap(), global_before);
		assert_eq!(limiter.tokens_of(LimitScope::Ip, "10.0.0.1").unwrap(), ip_before);
	}

	#[test]
	fn ip_denial_refunds_global_only() {
		let limiter = RateLimiter::new(config((10, 1), (1, 1), (5, 1)));
		let now = Timestamp(1_000);

		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		let global_before = limiter.tokens_of(LimitScope::Global, "*").unwrap();

		// Same IP, different email: denied at the IP tier; the email
		// bucket is never touched.
		let denied = limiter.allow_at("10.0.0.1", "b@example.com", now);
		assert_eq!(denied, Err(RateLimitError::Ip));
		assert_eq!(limiter.tokens_of(LimitScope::Global, "*").unwrap(), global_before);
		assert!(limiter.tokens_of(LimitScope::Email, "b@example.com").is_none());
	}

	#[test]
	fn global_exhaustion_denies_first() {
		let limiter = RateLimiter::new(config((1, 1), (5, 1), (5, 1)));
		let now = Timestamp(1_000);
		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		let denied = limiter.allow_at("10.0.0.2", "b@example.com", now);
		assert_eq!(denied, Err(RateLimitError::Global));
	}

	#[test]
	fn blocked_key_denied_until_reset() {
		let limiter = RateLimiter::new(config((10, 1), (5, 1), (5, 1)));
		let now = Timestamp(1_000);
		limiter.block_limit(LimitScope::Ip, "10.0.0.9").unwrap();

		let denied = limiter.allow_at("10.0.0.9", "a@example.com", now);
		assert_eq!(denied, Err(RateLimitError::Ip));
		// The blocked bucket consumed nothing, so global is refunded
		assert_eq!(limiter.tokens_of(LimitScope::Global, "*").unwrap(), 10);

		limiter.reset_limits(LimitScope::Ip, "10.0.0.9").unwrap();
		assert!(limiter.allow_at("10.0.0.9", "a@example.com", now).is_ok());
	}

	#[test]
	fn idle_buckets_evicted_blocked_kept() {
		let limiter = RateLimiter::new(config((100, 1), (5, 1), (5, 1)));
		let now = Timestamp(1_000);
		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		limiter.block_limit(LimitScope::Ip, "10.0.0.2").unwrap();

		let later = Timestamp(1_000 + 7 * 3600);
		let evicted = limiter.evict_idle_at(later);
		// a@example.com email bucket + 10.0.0.1 ip bucket; the blocked
		// bucket must survive eviction
		assert_eq!(evicted, 2);
		assert!(limiter.tokens_of(LimitScope::Ip, "10.0.0.2").is_some());
	}

	#[test]
	fn update_config_rejects_invalid_and_keeps_prior() {
		let limiter = RateLimiter::new(config((10, 1), (5, 1), (5, 1)));
		let mut bad = RateLimitConfig::default();
		bad.per_email.max_tokens = 0;
		assert!(limiter.update_global_config(bad).is_err());

		// Prior config still live: 10-token global
		assert_eq!(limiter.stats().global_max_tokens, 10);
	}

	#[test]
	fn bulk_reset_restores_allowances() {
		let limiter = RateLimiter::new(config((2, 1), (5, 1), (5, 1)));
		let now = Timestamp(1_000);
		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_err());

		limiter.bulk_reset();
		assert!(limiter.allow_at("10.0.0.1", "a@example.com", now).is_ok());
		assert_eq!(limiter.stats().tracked_ips, 1);
	}
}

// vim: ts=4
