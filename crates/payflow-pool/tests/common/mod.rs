//! Mock collaborators for pool tests.
//!
//! Each mock implements the public trait from payflow-types against plain
//! in-memory state, so tests can script oracle answers and generator
//! behavior without any network or database.

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use payflow_pool::{GapConfig, PoolConfig, PoolRegistry, SiteConfig};
use payflow_types::address_generator::{AddressGenerator, GeneratedAddress};
use payflow_types::balance_oracle::{AddressHistory, BalanceOracle};
use payflow_types::error::{Error, PfResult};
use payflow_types::store_adapter::{
	AddressPatch, PoolState, PooledAddress, StoreAdapter,
};
use payflow_types::types::{Patch, SiteId, Timestamp};

#[derive(Debug, Default)]
pub struct MockOracle {
	histories: Mutex<HashMap<String, AddressHistory>>,
	unavailable: AtomicBool,
	calls: AtomicU32,
}

impl MockOracle {
	pub fn set_history(&self, address: &str, balance_sats: i64, tx_count: u32) {
		self.histories
			.lock()
			.insert(address.to_owned(), AddressHistory { balance_sats, tx_count });
	}

	pub fn set_unavailable(&self, unavailable: bool) {
		self.unavailable.store(unavailable, Ordering::SeqCst);
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl BalanceOracle for MockOracle {
	async fn check_address_history(&self, address: &str) -> PfResult<AddressHistory> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(Error::OracleUnavailable);
		}
		Ok(self.histories.lock().get(address).copied().unwrap_or_default())
	}
}

#[derive(Debug, Default)]
pub struct MockGenerator {
	/// Indices the generator skips (pre-existing on-chain history).
	skip: Mutex<HashSet<u32>>,
	fail: AtomicBool,
	pub generated: AtomicU32,
}

impl MockGenerator {
	pub fn skip_index(&self, index: u32) {
		self.skip.lock().insert(index);
	}

	pub fn set_fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}
}

pub fn mock_address(site: SiteId, index: u32) -> String {
	format!("site{}-addr-{}", site, index)
}

#[async_trait]
impl AddressGenerator for MockGenerator {
	async fn generate_for_site(
		&self,
		site: SiteId,
		start_index: u32,
	) -> PfResult<GeneratedAddress> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(Error::Internal("key daemon offline".into()));
		}
		let mut index = start_index;
		{
			let skip = self.skip.lock();
			while skip.contains(&index) {
				index += 1;
			}
		}
		self.generated.fetch_add(1, Ordering::SeqCst);
		Ok(GeneratedAddress { address: mock_address(site, index).into(), index })
	}
}

#[derive(Debug, Default)]
pub struct MockStore {
	pub addresses: Mutex<HashMap<String, PooledAddress>>,
	pub queues: Mutex<HashMap<SiteId, Vec<(Box<str>, Timestamp)>>>,
	pub pool_states: Mutex<HashMap<SiteId, PoolState>>,
	fail: AtomicBool,
}

impl MockStore {
	pub fn set_fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	fn guard(&self) -> PfResult<()> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(Error::DbError);
		}
		Ok(())
	}
}

#[async_trait]
impl StoreAdapter for MockStore {
	async fn save_address(&self, addr: &PooledAddress) -> PfResult<()> {
		self.guard()?;
		self.addresses.lock().insert(addr.address.to_string(), addr.clone());
		Ok(())
	}

	async fn update_address(&self, address: &str, patch: &AddressPatch) -> PfResult<()> {
		self.guard()?;
		let mut addresses = self.addresses.lock();
		let record = addresses.get_mut(address).ok_or(Error::NotFound)?;
		match &patch.email {
			Patch::Value(email) => record.email = Some(email.clone()),
			Patch::Null => record.email = None,
			Patch::Undefined => (),
		}
		match patch.status {
			Patch::Value(status) => record.status = status,
			Patch::Null | Patch::Undefined => (),
		}
		match patch.reserved_at {
			Patch::Value(at) => record.reserved_at = Some(at),
			Patch::Null => record.reserved_at = None,
			Patch::Undefined => (),
		}
		match patch.last_checked {
			Patch::Value(at) => record.last_checked = Some(at),
			Patch::Null => record.last_checked = None,
			Patch::Undefined => (),
		}
		match patch.payment_count {
			Patch::Value(count) => record.payment_count = count,
			Patch::Null | Patch::Undefined => (),
		}
		match patch.amount_sats {
			Patch::Value(amount) => record.amount_sats = Some(amount),
			Patch::Null => record.amount_sats = None,
			Patch::Undefined => (),
		}
		Ok(())
	}

	async fn load_all_addresses(&self) -> PfResult<Vec<PooledAddress>> {
		self.guard()?;
		Ok(self.addresses.lock().values().cloned().collect())
	}

	async fn add_to_queue(
		&self,
		site: SiteId,
		address: &str,
		queued_at: Timestamp,
	) -> PfResult<()> {
		self.guard()?;
		self.queues.lock().entry(site).or_default().push((address.into(), queued_at));
		Ok(())
	}

	async fn remove_from_queue(&self, site: SiteId, address: &str) -> PfResult<()> {
		self.guard()?;
		if let Some(queue) = self.queues.lock().get_mut(&site) {
			queue.retain(|(a, _)| a.as_ref() != address);
		}
		Ok(())
	}

	async fn load_queue(&self, site: SiteId) -> PfResult<Vec<(Box<str>, Timestamp)>> {
		self.guard()?;
		Ok(self.queues.lock().get(&site).cloned().unwrap_or_default())
	}

	async fn save_pool_state(&self, state: &PoolState) -> PfResult<()> {
		self.guard()?;
		self.pool_states.lock().insert(state.site, *state);
		Ok(())
	}

	async fn load_pool_state(&self, site: SiteId) -> PfResult<Option<PoolState>> {
		self.guard()?;
		Ok(self.pool_states.lock().get(&site).copied())
	}
}

pub struct TestHarness {
	pub oracle: Arc<MockOracle>,
	pub generator: Arc<MockGenerator>,
	pub store: Arc<MockStore>,
	pub registry: PoolRegistry,
}

/// Registry with one site (id 1, indices 0..=99) and default tuning.
pub fn harness() -> TestHarness {
	harness_with(PoolConfig::default(), GapConfig::default())
}

pub fn harness_with(tuning: PoolConfig, gap: GapConfig) -> TestHarness {
	let oracle = Arc::new(MockOracle::default());
	let generator = Arc::new(MockGenerator::default());
	let store = Arc::new(MockStore::default());
	let registry = PoolRegistry::new(
		oracle.clone(),
		generator.clone(),
		Some(store.clone()),
		tuning,
	);
	registry
		.register_site(site_config(1, 0, 99), gap)
		.expect("site registration");
	TestHarness { oracle, generator, store, registry }
}

pub fn site_config(site: u32, start_index: u32, end_index: u32) -> SiteConfig {
	SiteConfig {
		site: SiteId(site),
		name: format!("site-{}", site).into(),
		start_index,
		end_index,
	}
}

pub fn reserved(site: SiteId, index: u32, email: &str, reserved_at: Timestamp) -> PooledAddress {
	PooledAddress {
		address: mock_address(site, index).into(),
		site,
		email: Some(email.into()),
		status: payflow_types::store_adapter::AddressStatus::Reserved,
		reserved_at: Some(reserved_at),
		last_checked: None,
		payment_count: 0,
		amount_sats: Some(10_000),
		derivation_index: Some(index),
	}
}
