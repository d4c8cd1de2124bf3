//! App state type and builder.
//!
//! One explicit context object constructed at startup and passed to every
//! collaborator, instead of process-wide singletons: tests get isolated
//! instances with no state bleed between cases.

use serde::Serialize;
use std::sync::Arc;

use crate::prelude::*;
use crate::tasks;

use payflow_core::rate_limit::{
	ActiveLimit, LimitScope, RateLimitConfig, RateLimiter, RateLimiterStats,
};
use payflow_core::scheduler::Scheduler;
use payflow_pool::gap::GapConfig;
use payflow_pool::registry::PoolRegistry;
use payflow_pool::site::{PoolConfig, SiteConfig};
use payflow_pool::stats::{GapMonitorSnapshot, PoolStats};
use payflow_types::address_generator::AddressGenerator;
use payflow_types::balance_oracle::BalanceOracle;
use payflow_types::store_adapter::StoreAdapter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug)]
pub struct AppOpts {
	pub pool: PoolConfig,
	pub rate_limit: RateLimitConfig,
	/// Recycling sweep cadence (hourly in production).
	pub recycle_cron: Box<str>,
	/// Idle rate-limit bucket eviction cadence.
	pub evict_cron: Box<str>,
	/// Resource occupancy sampling cadence.
	pub sample_cron: Box<str>,
}

impl Default for AppOpts {
	fn default() -> Self {
		Self {
			pool: PoolConfig::default(),
			rate_limit: RateLimitConfig::default(),
			recycle_cron: "0 * * * *".into(),
			evict_cron: "*/10 * * * *".into(),
			sample_cron: "*/5 * * * *".into(),
		}
	}
}

/// Everything-in-one observability snapshot.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedStats {
	pub pools: PoolStats,
	pub rate_limiter: RateLimiterStats,
	pub gap_monitor: Vec<GapMonitorSnapshot>,
}

pub struct AppState {
	pub opts: AppOpts,
	pub registry: PoolRegistry,
	pub rate_limiter: Arc<RateLimiter>,
	pub scheduler: Arc<Scheduler<App>>,
}

pub type App = Arc<AppState>;

impl AppState {
	// Allocation surface
	//********************

	/// Admission gate for address generation. Denials carry the tier that
	/// refused; a denied call leaves every bucket untouched.
	pub fn allow_address_generation(&self, ip: &str, email: &str) -> PfResult<()> {
		self.rate_limiter.allow(ip, email).map_err(Error::from)
	}

	pub async fn get_or_reuse_address(
		&self,
		site: SiteId,
		email: &str,
		amount_sats: i64,
	) -> PfResult<Box<str>> {
		self.registry.site(site)?.get_or_reuse_address(email, amount_sats).await
	}

	pub async fn mark_address_used(&self, site: SiteId, address: &str) -> PfResult<()> {
		self.registry.site(site)?.mark_address_used(address).await
	}

	/// Administrative: manually free a reservation.
	pub async fn release_address(&self, site: SiteId, address: &str) -> PfResult<()> {
		self.registry.site(site)?.release_address(address).await
	}

	pub async fn gap_limit_status(&self, site: SiteId) -> PfResult<(u32, bool)> {
		Ok(self.registry.site(site)?.gap_limit_status().await)
	}

	// Observability
	//***************

	pub async fn get_stats(&self) -> PoolStats {
		self.registry.stats().await
	}

	pub fn get_active_limits(&self) -> Vec<ActiveLimit> {
		self.rate_limiter.active_limits()
	}

	pub async fn get_enhanced_stats(&self) -> EnhancedStats {
		let pools = self.registry.stats().await;
		let mut gap_monitor = Vec::with_capacity(pools.sites.len());
		for site_stats in &pools.sites {
			if let Ok(snapshot) =
				self.registry.monitor().snapshot(site_stats.site, site_stats.gap_streak)
			{
				gap_monitor.push(snapshot);
			}
		}
		EnhancedStats { pools, rate_limiter: self.rate_limiter.stats(), gap_monitor }
	}

	// Administrative mutators
	//*************************

	pub fn reset_unpaid_count(&self, site: SiteId) -> PfResult<()> {
		self.registry.monitor().reset_unpaid_count(site)
	}

	pub fn update_max_gap_limit(&self, site: SiteId, max_gap_limit: u32) -> PfResult<()> {
		self.registry.monitor().update_max_gap_limit(site, max_gap_limit)
	}

	pub fn update_thresholds(&self, site: SiteId, warning: f64, critical: f64) -> PfResult<()> {
		self.registry.monitor().update_thresholds(site, warning, critical)
	}

	pub fn clear_recent_errors(&self, site: SiteId) -> PfResult<()> {
		self.registry.monitor().clear_recent_errors(site)
	}

	pub fn reset_limits(&self, scope: LimitScope, key: &str) -> PfResult<()> {
		self.rate_limiter.reset_limits(scope, key)
	}

	pub fn block_limit(&self, scope: LimitScope, key: &str) -> PfResult<()> {
		self.rate_limiter.block_limit(scope, key)
	}

	pub fn bulk_reset(&self) {
		self.rate_limiter.bulk_reset();
	}

	pub fn update_global_config(&self, config: RateLimitConfig) -> PfResult<()> {
		self.rate_limiter.update_global_config(config)
	}
}

/// Queues the periodic maintenance tasks and starts the scheduler loops.
pub fn start(app: &App) -> PfResult<()> {
	app.scheduler
		.task(Arc::new(tasks::RecycleTask))
		.cron(&app.opts.recycle_cron)?
		.schedule()?;
	app.scheduler
		.task(Arc::new(tasks::EvictBucketsTask))
		.cron(&app.opts.evict_cron)?
		.schedule()?;
	app.scheduler
		.task(Arc::new(tasks::SampleResourcesTask))
		.cron(&app.opts.sample_cron)?
		.schedule()?;
	app.scheduler.start(app.clone());
	info!(version = VERSION, "payflow engine started");
	Ok(())
}

// AppBuilder
//************

pub struct AppBuilder {
	opts: AppOpts,
	oracle: Option<Arc<dyn BalanceOracle>>,
	generator: Option<Arc<dyn AddressGenerator>>,
	store: Option<Arc<dyn StoreAdapter>>,
	sites: Vec<(SiteConfig, GapConfig)>,
}

impl AppBuilder {
	pub fn new() -> Self {
		Self {
			opts: AppOpts::default(),
			oracle: None,
			generator: None,
			store: None,
			sites: Vec::new(),
		}
	}

	pub fn opts(mut self, opts: AppOpts) -> Self {
		self.opts = opts;
		self
	}

	pub fn balance_oracle(mut self, oracle: Arc<dyn BalanceOracle>) -> Self {
		self.oracle = Some(oracle);
		self
	}

	pub fn address_generator(mut self, generator: Arc<dyn AddressGenerator>) -> Self {
		self.generator = Some(generator);
		self
	}

	/// Optional; without a store the engine is purely in-memory and state
	/// does not survive a restart.
	pub fn store_adapter(mut self, store: Arc<dyn StoreAdapter>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn site(self, config: SiteConfig) -> Self {
		self.site_with_gap(config, GapConfig::default())
	}

	pub fn site_with_gap(mut self, config: SiteConfig, gap: GapConfig) -> Self {
		self.sites.push((config, gap));
		self
	}

	/// Validates the configuration, registers every site, and seeds the
	/// pools from the store adapter when one is configured.
	pub async fn build(self) -> PfResult<App> {
		let oracle = self
			.oracle
			.ok_or_else(|| Error::ValidationError("balance oracle is required".into()))?;
		let generator = self
			.generator
			.ok_or_else(|| Error::ValidationError("address generator is required".into()))?;
		self.opts.rate_limit.validate()?;

		let registry = PoolRegistry::new(oracle, generator, self.store, self.opts.pool.clone());
		for (config, gap) in self.sites {
			registry.register_site(config, gap)?;
		}
		registry.load_from_store().await?;

		let rate_limiter = Arc::new(RateLimiter::new(self.opts.rate_limit.clone()));
		Ok(Arc::new(AppState {
			opts: self.opts,
			registry,
			rate_limiter,
			scheduler: Scheduler::new(),
		}))
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

// vim: ts=4
