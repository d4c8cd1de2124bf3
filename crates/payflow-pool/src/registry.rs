//! Pool registry.
//!
//! The explicit context object the allocator hangs off: site pools, the
//! shared global pool, the gap monitor, and the external collaborators.
//! Constructed once at startup and passed around, so tests get isolated
//! instances instead of process-wide state.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::gap::{GapConfig, GapLimitMonitor};
use crate::global::GlobalAddressPool;
use crate::prelude::*;
use crate::site::{PoolConfig, SiteAddressPool, SiteConfig};
use crate::stats::PoolStats;
use payflow_types::address_generator::AddressGenerator;
use payflow_types::balance_oracle::BalanceOracle;
use payflow_types::store_adapter::{PooledAddress, StoreAdapter};

pub struct PoolRegistry {
	sites: RwLock<HashMap<SiteId, Arc<SiteAddressPool>>>,
	global_pool: Arc<GlobalAddressPool>,
	monitor: Arc<GapLimitMonitor>,
	oracle: Arc<dyn BalanceOracle>,
	generator: Arc<dyn AddressGenerator>,
	store: Option<Arc<dyn StoreAdapter>>,
	tuning: PoolConfig,
}

impl PoolRegistry {
	pub fn new(
		oracle: Arc<dyn BalanceOracle>,
		generator: Arc<dyn AddressGenerator>,
		store: Option<Arc<dyn StoreAdapter>>,
		tuning: PoolConfig,
	) -> Self {
		Self {
			sites: RwLock::new(HashMap::new()),
			global_pool: Arc::new(GlobalAddressPool::new()),
			monitor: Arc::new(GapLimitMonitor::new()),
			oracle,
			generator,
			store,
			tuning,
		}
	}

	pub fn global_pool(&self) -> &Arc<GlobalAddressPool> {
		&self.global_pool
	}

	pub fn monitor(&self) -> &Arc<GapLimitMonitor> {
		&self.monitor
	}

	pub fn register_site(
		&self,
		config: SiteConfig,
		gap: GapConfig,
	) -> PfResult<Arc<SiteAddressPool>> {
		config.validate()?;
		let site = config.site;
		{
			let sites = self.sites.read();
			if sites.contains_key(&site) {
				return Err(Error::ValidationError(format!("site {} already registered", site)));
			}
		}
		self.monitor.register_site(site, gap)?;
		let pool = Arc::new(SiteAddressPool::new(
			config,
			self.tuning.clone(),
			self.global_pool.clone(),
			self.monitor.clone(),
			self.oracle.clone(),
			self.generator.clone(),
			self.store.clone(),
		)?);
		self.sites.write().insert(site, pool.clone());
		info!(%site, "site registered");
		Ok(pool)
	}

	pub fn site(&self, site: SiteId) -> PfResult<Arc<SiteAddressPool>> {
		self.sites.read().get(&site).cloned().ok_or(Error::NotFound)
	}

	pub fn sites(&self) -> Vec<Arc<SiteAddressPool>> {
		let mut pools: Vec<_> = self.sites.read().values().cloned().collect();
		pools.sort_by_key(|pool| pool.site());
		pools
	}

	/// Seeds every registered site from the persistence adapter. Call once
	/// at startup, after the sites are registered and before allocations
	/// are served.
	pub async fn load_from_store(&self) -> PfResult<()> {
		let Some(store) = self.store.clone() else {
			debug!("no store adapter configured, starting with empty pools");
			return Ok(());
		};
		let mut by_site: HashMap<SiteId, Vec<PooledAddress>> = HashMap::new();
		for record in store.load_all_addresses().await? {
			by_site.entry(record.site).or_default().push(record);
		}
		for pool in self.sites() {
			let site = pool.site();
			let addresses = by_site.remove(&site).unwrap_or_default();
			let queue = store.load_queue(site).await?;
			let pool_state = store.load_pool_state(site).await?;
			pool.restore(addresses, queue, pool_state).await;
		}
		if !by_site.is_empty() {
			warn!(
				orphaned_sites = by_site.len(),
				"store contains addresses for unregistered sites"
			);
		}
		Ok(())
	}

	pub async fn stats(&self) -> PoolStats {
		let mut sites = Vec::new();
		for pool in self.sites() {
			sites.push(pool.stats().await);
		}
		PoolStats { sites, global_pool: self.global_pool.snapshot() }
	}
}

impl std::fmt::Debug for PoolRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PoolRegistry")
			.field("sites", &self.sites.read().len())
			.field("global_pool", &self.global_pool.len())
			.field("has_store", &self.store.is_some())
			.finish()
	}
}

// vim: ts=4
