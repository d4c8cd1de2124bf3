//! Periodic maintenance tasks.
//!
//! Thin scheduler bindings; the actual logic lives on the registry and the
//! rate limiter so tests can drive it directly with a simulated clock.

use async_trait::async_trait;

use crate::prelude::*;
use payflow_core::scheduler::Task;

/// Hourly sweep reclaiming expired reservations; the backstop for the
/// no-immediate-check expired-reservation reuse path in allocation.
#[derive(Debug)]
pub struct RecycleTask;

#[async_trait]
impl Task<App> for RecycleTask {
	fn kind(&self) -> &'static str {
		"recycle_expired"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		let summaries = app.registry.recycle_expired_addresses().await;
		let scanned: usize = summaries.iter().map(|s| s.scanned).sum();
		let recycled: usize = summaries.iter().map(|s| s.recycled).sum();
		let marked_used: usize = summaries.iter().map(|s| s.marked_used).sum();
		let oracle_failures: usize = summaries.iter().map(|s| s.oracle_failures).sum();
		if scanned > 0 {
			info!(scanned, recycled, marked_used, oracle_failures, "recycle sweep complete");
		}
		Ok(())
	}
}

/// Purges rate-limit buckets idle past the configured TTL to bound memory.
#[derive(Debug)]
pub struct EvictBucketsTask;

#[async_trait]
impl Task<App> for EvictBucketsTask {
	fn kind(&self) -> &'static str {
		"evict_rate_limit_buckets"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		app.rate_limiter.evict_idle();
		Ok(())
	}
}

/// Logs pool and bucket occupancy so operators can watch growth trends.
#[derive(Debug)]
pub struct SampleResourcesTask;

#[async_trait]
impl Task<App> for SampleResourcesTask {
	fn kind(&self) -> &'static str {
		"sample_resources"
	}

	async fn run(&self, app: &App) -> PfResult<()> {
		let pools = app.registry.stats().await;
		let limiter = app.rate_limiter.stats();
		let addresses: usize = pools.sites.iter().map(|s| s.total_addresses).sum();
		let queued: usize = pools.sites.iter().map(|s| s.available_queued).sum();
		info!(
			sites = pools.sites.len(),
			addresses,
			queued,
			global_pool = pools.global_pool.queued,
			tracked_ips = limiter.tracked_ips,
			tracked_emails = limiter.tracked_emails,
			"resource sample"
		);
		Ok(())
	}
}

// vim: ts=4
