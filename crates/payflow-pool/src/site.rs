//! Per-site address pool.
//!
//! Allocation is a strict priority chain — same-user reuse, expired-local
//! reuse, global pool, local queue, fresh derivation — executed under a
//! single write lock per call so the whole decision is atomic with respect
//! to other requests on the same site. Correctness is prioritized over
//! fine-grained concurrency here; allocation is not the dominant
//! throughput path.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::gap::GapLimitMonitor;
use crate::global::GlobalAddressPool;
use crate::prelude::*;
use crate::recycle::RecycleSummary;
use crate::stats::SitePoolStats;
use payflow_types::address_generator::AddressGenerator;
use payflow_types::balance_oracle::{AddressHistory, BalanceOracle};
use payflow_types::store_adapter::{
	AddressPatch, AddressStatus, PooledAddress, PoolState, StoreAdapter,
};

/// Safety margin below typical wallet gap limits of 20.
pub const AT_RISK_STREAK: u32 = 15;

/// Static per-site configuration.
#[derive(Clone, Debug)]
pub struct SiteConfig {
	pub site: SiteId,
	pub name: Box<str>,
	/// First derivation index owned by this site.
	pub start_index: u32,
	/// Last derivation index this site may ever use (inclusive).
	pub end_index: u32,
}

impl SiteConfig {
	pub fn validate(&self) -> PfResult<()> {
		if self.start_index > self.end_index {
			return Err(Error::ValidationError(format!(
				"site {}: start_index {} beyond end_index {}",
				self.site, self.start_index, self.end_index
			)));
		}
		Ok(())
	}
}

/// Pool-wide tuning knobs, shared by every site.
#[derive(Clone, Debug)]
pub struct PoolConfig {
	/// Reservations older than this are eligible for reuse and recycling.
	pub reserve_ttl_secs: i64,
	/// Queued addresses idle longer than this get a fresh oracle check
	/// before being handed out; younger ones are trusted from their
	/// generation-time verification.
	pub queue_recheck_secs: i64,
	/// Request-scoped bound on oracle lookups; a timeout means "oracle
	/// unavailable", never "zero balance".
	pub oracle_timeout_secs: u64,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self { reserve_ttl_secs: 72 * 3600, queue_recheck_secs: 600, oracle_timeout_secs: 8 }
	}
}

#[derive(Debug)]
struct QueueEntry {
	address: Box<str>,
	queued_at: Timestamp,
}

#[derive(Debug, Default)]
struct SiteState {
	addresses: HashMap<Box<str>, PooledAddress>,
	/// Left-inverse of the reservation relation: at most one reserved
	/// address per email.
	email_to_address: HashMap<Box<str>, Box<str>>,
	/// FIFO of recycled addresses ready for reuse.
	available: VecDeque<QueueEntry>,
	/// Locally derived indices only; adopted addresses are not here.
	by_index: BTreeMap<u32, Box<str>>,
	/// Indices the generator jumped over (pre-existing on-chain history).
	skipped_indices: BTreeSet<u32>,
	next_index: u32,
}

pub struct SiteAddressPool {
	config: SiteConfig,
	tuning: PoolConfig,
	state: RwLock<SiteState>,
	global_pool: Arc<GlobalAddressPool>,
	monitor: Arc<GapLimitMonitor>,
	oracle: Arc<dyn BalanceOracle>,
	generator: Arc<dyn AddressGenerator>,
	store: Option<Arc<dyn StoreAdapter>>,
}

impl SiteAddressPool {
	pub fn new(
		config: SiteConfig,
		tuning: PoolConfig,
		global_pool: Arc<GlobalAddressPool>,
		monitor: Arc<GapLimitMonitor>,
		oracle: Arc<dyn BalanceOracle>,
		generator: Arc<dyn AddressGenerator>,
		store: Option<Arc<dyn StoreAdapter>>,
	) -> PfResult<Self> {
		config.validate()?;
		let state = SiteState { next_index: config.start_index, ..SiteState::default() };
		Ok(Self {
			config,
			tuning,
			state: RwLock::new(state),
			global_pool,
			monitor,
			oracle,
			generator,
			store,
		})
	}

	pub fn site(&self) -> SiteId {
		self.config.site
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	// Allocation
	//************

	pub async fn get_or_reuse_address(&self, email: &str, amount_sats: i64) -> PfResult<Box<str>> {
		self.get_or_reuse_address_at(email, amount_sats, Timestamp::now()).await
	}

	/// The allocation priority chain. `now` is explicit so tests can drive
	/// time deterministically.
	pub async fn get_or_reuse_address_at(
		&self,
		email: &str,
		amount_sats: i64,
		now: Timestamp,
	) -> PfResult<Box<str>> {
		let site = self.config.site;
		let mut state = self.state.write().await;

		// 1. Same-user reuse. The primary gap-limit defense: a user who
		// re-requests must never advance the derivation index.
		let existing = state.email_to_address.get(email).and_then(|address| {
			state
				.addresses
				.get(address)
				.filter(|a| a.status == AddressStatus::Reserved)
				.map(|a| a.address.clone())
		});
		if let Some(address) = existing {
			debug!(%site, email, %address, "allocation: same-user reuse");
			return Ok(address);
		}

		// 2. Opportunistic same-site recycle of an expired reservation.
		// No immediate balance check here: the hourly sweep is the
		// backstop, which leaves a window of up to one sweep interval
		// where a late payment to the previous holder could be
		// misattributed. Observed behavior of the original system,
		// preserved as-is.
		if let Some(address) = self.oldest_expired(&state, now) {
			self.detach_holder(&mut state, &address);
			self.reserve(&mut state, &address, email, amount_sats, now);
			info!(%site, email, %address, "allocation: reassigned expired reservation");
			return Ok(address);
		}

		// 3. Cross-site global pool.
		if let Some(address) = self.global_pool.take(site) {
			if state.addresses.contains_key(&address) {
				self.reserve(&mut state, &address, email, amount_sats, now);
			} else {
				// First time this site sees the address; create the local
				// record already reserved.
				let record = PooledAddress {
					address: address.clone(),
					site,
					email: Some(email.into()),
					status: AddressStatus::Reserved,
					reserved_at: Some(now),
					last_checked: None,
					payment_count: 0,
					amount_sats: Some(amount_sats),
					derivation_index: None,
				};
				state.email_to_address.insert(email.into(), address.clone());
				self.persist_save(&record);
				state.addresses.insert(address.clone(), record);
			}
			info!(%site, email, %address, "allocation: adopted from global pool");
			return Ok(address);
		}

		// 4. Local available queue, oldest first.
		while let Some(entry) = state.available.pop_front() {
			self.persist_queue_remove(&entry.address);
			let idle = now.seconds_since(entry.queued_at);
			if idle > self.tuning.queue_recheck_secs {
				match self.check_history(&entry.address).await {
					Ok(history) if !history.is_clean() => {
						// Unexpected history on a supposedly clean address:
						// quarantine it and try the next one.
						warn!(
							%site,
							address = %entry.address,
							balance = history.balance_sats,
							tx_count = history.tx_count,
							"allocation: queued address has history, quarantined"
						);
						self.quarantine(&mut state, &entry.address, now);
						continue;
					}
					Ok(_) => {
						if let Some(record) = state.addresses.get_mut(&entry.address) {
							record.last_checked = Some(now);
						}
					}
					Err(_) => {
						// Verified clean at generation time; an unreachable
						// oracle must not stall allocation.
						warn!(
							%site,
							address = %entry.address,
							"allocation: oracle unavailable for re-check, handing out anyway"
						);
						self.monitor.record_error(site, "oracle unavailable during queue re-check");
					}
				}
			}
			self.reserve(&mut state, &entry.address, email, amount_sats, now);
			debug!(%site, email, address = %entry.address, "allocation: from local queue");
			return Ok(entry.address);
		}

		// 5. On-demand generation.
		if self.monitor.should_use_fallback(site) {
			self.monitor.record_error(site, "generation refused: gap-limit fallback active");
			warn!(%site, email, "allocation: generation refused, fallback mode");
			return Err(Error::PoolExhausted { site });
		}
		if state.next_index > self.config.end_index {
			warn!(%site, next_index = state.next_index, "allocation: derivation range exhausted");
			return Err(Error::PoolExhausted { site });
		}

		let generated =
			self.generator.generate_for_site(site, state.next_index).await.inspect_err(|e| {
				self.monitor.record_error(site, &format!("generator failed: {}", e));
			})?;
		if generated.index < state.next_index {
			return Err(Error::Internal(format!(
				"generator returned index {} below cursor {}",
				generated.index, state.next_index
			)));
		}
		if generated.index > self.config.end_index {
			return Err(Error::PoolExhausted { site });
		}

		// Indices the generator jumped over had pre-existing history;
		// they still occupy gap-limit slots.
		for index in state.next_index..generated.index {
			state.skipped_indices.insert(index);
		}
		state.next_index = generated.index + 1;

		let record = PooledAddress {
			address: generated.address.clone(),
			site,
			email: Some(email.into()),
			status: AddressStatus::Reserved,
			reserved_at: Some(now),
			last_checked: None,
			payment_count: 0,
			amount_sats: Some(amount_sats),
			derivation_index: Some(generated.index),
		};
		state.by_index.insert(generated.index, generated.address.clone());
		state.email_to_address.insert(email.into(), generated.address.clone());
		self.persist_save(&record);
		state.addresses.insert(generated.address.clone(), record);
		self.persist_pool_state(state.next_index);
		self.monitor.note_generated(site);
		info!(
			%site,
			email,
			address = %generated.address,
			index = generated.index,
			"allocation: derived new address"
		);
		Ok(generated.address)
	}

	// Payment / admin transitions
	//*****************************

	pub async fn mark_address_used(&self, address: &str) -> PfResult<()> {
		self.mark_address_used_at(address, Timestamp::now()).await
	}

	/// Records a payment: the address becomes terminal and its holder gets
	/// a fresh address on their next request.
	pub async fn mark_address_used_at(&self, address: &str, now: Timestamp) -> PfResult<()> {
		let site = self.config.site;
		let mut state = self.state.write().await;
		let email = {
			let record = state.addresses.get_mut(address).ok_or(Error::NotFound)?;
			record.status = AddressStatus::Used;
			record.payment_count += 1;
			record.last_checked = Some(now);
			record.email.clone()
		};
		// Remove the mapping; the record keeps the last holder for audit.
		if let Some(email) = email {
			state.email_to_address.remove(&email);
		}
		if Self::drop_from_queue(&mut state, address) {
			self.persist_queue_remove(address);
		}
		self.persist_update(address, AddressPatch {
			status: Patch::Value(AddressStatus::Used),
			last_checked: Patch::Value(now),
			payment_count: Patch::Value(
				state.addresses.get(address).map(|a| a.payment_count).unwrap_or(1),
			),
			..AddressPatch::default()
		});
		self.monitor.note_paid(site);
		info!(%site, address, "address marked used");
		Ok(())
	}

	/// Administrative release of a reservation, without an oracle check.
	/// The queue re-check path and the hourly sweep cover late payments.
	pub async fn release_address(&self, address: &str) -> PfResult<()> {
		self.release_address_at(address, Timestamp::now()).await
	}

	pub async fn release_address_at(&self, address: &str, now: Timestamp) -> PfResult<()> {
		let site = self.config.site;
		let mut state = self.state.write().await;
		let email = {
			let record = state.addresses.get_mut(address).ok_or(Error::NotFound)?;
			if record.status != AddressStatus::Reserved {
				return Err(Error::ValidationError(format!(
					"address {} is not reserved",
					address
				)));
			}
			record.status = AddressStatus::Available;
			record.reserved_at = None;
			record.amount_sats = None;
			record.email.clone()
		};
		if let Some(email) = email {
			state.email_to_address.remove(&email);
		}
		state.available.push_back(QueueEntry { address: address.into(), queued_at: now });
		self.persist_update(address, AddressPatch {
			status: Patch::Value(AddressStatus::Available),
			reserved_at: Patch::Null,
			amount_sats: Patch::Null,
			..AddressPatch::default()
		});
		self.persist_queue_add(address, now);
		info!(%site, address, "reservation released by administrator");
		Ok(())
	}

	// Recycling sweep
	//*****************

	/// Reclaims expired reservations. Per address: oracle failure ⇒ skip
	/// this round; any on-chain activity ⇒ `Used` (a late payer must never
	/// have their address recycled to someone else); confirmed clean ⇒
	/// back to the site queue and the global pool.
	pub async fn recycle_expired_at(&self, now: Timestamp) -> RecycleSummary {
		let site = self.config.site;
		let candidates: Vec<Box<str>> = {
			let state = self.state.read().await;
			state
				.addresses
				.values()
				.filter(|a| a.status == AddressStatus::Reserved && self.is_expired(a, now))
				.map(|a| a.address.clone())
				.collect()
		};

		let mut summary = RecycleSummary::new(site, candidates.len());
		for address in candidates {
			let history = match self.check_history(&address).await {
				Ok(history) => history,
				Err(_) => {
					// Never guess: retry next sweep.
					warn!(%site, %address, "recycle: oracle unavailable, skipping this round");
					self.monitor.record_error(site, "oracle unavailable during recycle sweep");
					summary.oracle_failures += 1;
					continue;
				}
			};

			let mut state = self.state.write().await;
			let (email, clean) = {
				let Some(record) = state.addresses.get_mut(&address) else { continue };
				// Re-validate: the address may have been reassigned while
				// the oracle call was in flight.
				if record.status != AddressStatus::Reserved || !self.is_expired(record, now) {
					continue;
				}
				record.last_checked = Some(now);
				if history.is_clean() {
					record.status = AddressStatus::Available;
					record.reserved_at = None;
					record.amount_sats = None;
				} else {
					record.status = AddressStatus::Used;
				}
				(record.email.clone(), history.is_clean())
			};
			if let Some(email) = &email {
				state.email_to_address.remove(email);
			}
			if clean {
				state.available.push_back(QueueEntry { address: address.clone(), queued_at: now });
				drop(state);
				self.global_pool.add(&address);
				self.persist_update(&address, AddressPatch {
					status: Patch::Value(AddressStatus::Available),
					reserved_at: Patch::Null,
					amount_sats: Patch::Null,
					last_checked: Patch::Value(now),
					..AddressPatch::default()
				});
				self.persist_queue_add(&address, now);
				debug!(%site, %address, "recycle: reclaimed clean address");
				summary.recycled += 1;
			} else {
				drop(state);
				self.persist_update(&address, AddressPatch {
					status: Patch::Value(AddressStatus::Used),
					last_checked: Patch::Value(now),
					..AddressPatch::default()
				});
				info!(
					%site,
					%address,
					balance = history.balance_sats,
					tx_count = history.tx_count,
					"recycle: late activity found, address retired as used"
				);
				summary.marked_used += 1;
			}
		}
		summary
	}

	// Gap accounting
	//****************

	pub async fn gap_limit_status(&self) -> (u32, bool) {
		let state = self.state.read().await;
		let streak = Self::gap_streak(&self.config, &state);
		(streak, streak >= AT_RISK_STREAK)
	}

	/// Longest run of consecutive indices in `[start_index, next_index)`
	/// that never saw a payment. `Used` and `Skipped` indices break the
	/// run; everything else (reserved, available, expired) extends it.
	fn gap_streak(config: &SiteConfig, state: &SiteState) -> u32 {
		let mut streak = 0u32;
		let mut max_streak = 0u32;
		for index in config.start_index..state.next_index {
			let paid_or_skipped = state.skipped_indices.contains(&index)
				|| state
					.by_index
					.get(&index)
					.and_then(|address| state.addresses.get(address))
					.is_some_and(|a| a.status.is_terminal());
			if paid_or_skipped {
				streak = 0;
			} else {
				streak += 1;
				max_streak = max_streak.max(streak);
			}
		}
		max_streak
	}

	// Startup restore
	//*****************

	/// Seeds the in-memory state from persistence. Called once at startup
	/// before the pool serves allocations.
	pub async fn restore(
		&self,
		addresses: Vec<PooledAddress>,
		queue: Vec<(Box<str>, Timestamp)>,
		pool_state: Option<PoolState>,
	) {
		let mut state = self.state.write().await;
		for record in addresses {
			if record.site != self.config.site {
				continue;
			}
			if let Some(index) = record.derivation_index {
				state.by_index.insert(index, record.address.clone());
				if index >= state.next_index {
					state.next_index = index + 1;
				}
			}
			if record.status == AddressStatus::Reserved {
				if let Some(email) = &record.email {
					state.email_to_address.insert(email.clone(), record.address.clone());
				}
			}
			state.addresses.insert(record.address.clone(), record);
		}
		for (address, queued_at) in queue {
			let available = state
				.addresses
				.get(&address)
				.is_some_and(|a| a.status == AddressStatus::Available);
			if available {
				state.available.push_back(QueueEntry { address, queued_at });
			}
		}
		if let Some(pool_state) = pool_state {
			state.next_index = state.next_index.max(pool_state.next_index);
		}
		// Indices below the cursor with no local record were skipped by
		// the generator; they still count against the gap limit.
		for index in self.config.start_index..state.next_index {
			if !state.by_index.contains_key(&index) {
				state.skipped_indices.insert(index);
			}
		}
		info!(
			site = %self.config.site,
			addresses = state.addresses.len(),
			queued = state.available.len(),
			next_index = state.next_index,
			"site pool restored"
		);
	}

	// Observability
	//***************

	pub async fn stats(&self) -> SitePoolStats {
		let state = self.state.read().await;
		let mut reserved = 0;
		let mut used = 0;
		let mut expired = 0;
		for record in state.addresses.values() {
			match record.status {
				AddressStatus::Reserved => reserved += 1,
				AddressStatus::Used => used += 1,
				AddressStatus::Expired => expired += 1,
				AddressStatus::Available | AddressStatus::Skipped => (),
			}
		}
		let gap_streak = Self::gap_streak(&self.config, &state);
		SitePoolStats {
			site: self.config.site,
			name: self.config.name.clone(),
			total_addresses: state.addresses.len(),
			available_queued: state.available.len(),
			reserved,
			used,
			expired,
			skipped_indices: state.skipped_indices.len(),
			start_index: self.config.start_index,
			next_index: state.next_index,
			end_index: self.config.end_index,
			remaining_indices: (self.config.end_index + 1).saturating_sub(state.next_index),
			gap_streak,
			at_risk: gap_streak >= AT_RISK_STREAK,
		}
	}

	// Internals
	//***********

	fn is_expired(&self, record: &PooledAddress, now: Timestamp) -> bool {
		record
			.reserved_at
			.is_some_and(|at| now.seconds_since(at) > self.tuning.reserve_ttl_secs)
	}

	fn oldest_expired(&self, state: &SiteState, now: Timestamp) -> Option<Box<str>> {
		state
			.addresses
			.values()
			.filter(|a| a.status == AddressStatus::Reserved && self.is_expired(a, now))
			.min_by_key(|a| a.reserved_at)
			.map(|a| a.address.clone())
	}

	/// Unlinks the previous holder of an expired reservation.
	fn detach_holder(&self, state: &mut SiteState, address: &str) {
		let email = state.addresses.get(address).and_then(|a| a.email.clone());
		if let Some(email) = email {
			if state.email_to_address.get(&email).is_some_and(|a| a.as_ref() == address) {
				state.email_to_address.remove(&email);
			}
		}
	}

	/// Binds an address to a new holder and persists the reservation.
	fn reserve(
		&self,
		state: &mut SiteState,
		address: &str,
		email: &str,
		amount_sats: i64,
		now: Timestamp,
	) {
		if let Some(record) = state.addresses.get_mut(address) {
			record.status = AddressStatus::Reserved;
			record.email = Some(email.into());
			record.reserved_at = Some(now);
			record.amount_sats = Some(amount_sats);
		}
		state.email_to_address.insert(email.into(), address.into());
		if Self::drop_from_queue(state, address) {
			self.persist_queue_remove(address);
		}
		self.persist_update(address, AddressPatch {
			email: Patch::Value(email.into()),
			status: Patch::Value(AddressStatus::Reserved),
			reserved_at: Patch::Value(now),
			amount_sats: Patch::Value(amount_sats),
			..AddressPatch::default()
		});
	}

	/// Permanently retires a queued address that turned out to have
	/// on-chain history.
	fn quarantine(&self, state: &mut SiteState, address: &str, now: Timestamp) {
		if let Some(record) = state.addresses.get_mut(address) {
			record.status = AddressStatus::Used;
			record.last_checked = Some(now);
		}
		self.monitor.record_error(
			self.config.site,
			&format!("queued address {} had unexpected history", address),
		);
		self.persist_update(address, AddressPatch {
			status: Patch::Value(AddressStatus::Used),
			last_checked: Patch::Value(now),
			..AddressPatch::default()
		});
	}

	fn drop_from_queue(state: &mut SiteState, address: &str) -> bool {
		let before = state.available.len();
		state.available.retain(|entry| entry.address.as_ref() != address);
		state.available.len() != before
	}

	/// Oracle lookup bounded by the configured timeout. A timeout or error
	/// is "oracle unavailable", never a positive balance result.
	async fn check_history(&self, address: &str) -> PfResult<AddressHistory> {
		let timeout = std::time::Duration::from_secs(self.tuning.oracle_timeout_secs);
		match tokio::time::timeout(timeout, self.oracle.check_address_history(address)).await {
			Ok(Ok(history)) => Ok(history),
			Ok(Err(e)) => {
				debug!(address, "oracle error: {}", e);
				Err(Error::OracleUnavailable)
			}
			Err(_) => {
				debug!(address, "oracle timed out");
				Err(Error::OracleUnavailable)
			}
		}
	}

	// Fire-and-forget persistence. The in-memory state is the source of
	// truth; failures are logged and recorded, never rolled back.
	//**************************************************************

	fn persist_save(&self, record: &PooledAddress) {
		let Some(store) = self.store.clone() else { return };
		let record = record.clone();
		let monitor = self.monitor.clone();
		let site = self.config.site;
		tokio::spawn(async move {
			if let Err(e) = store.save_address(&record).await {
				warn!(%site, address = %record.address, "persistence failure: {}", e);
				monitor.record_error(site, &format!("save_address failed: {}", e));
			}
		});
	}

	fn persist_update(&self, address: &str, patch: AddressPatch) {
		let Some(store) = self.store.clone() else { return };
		let address: Box<str> = address.into();
		let monitor = self.monitor.clone();
		let site = self.config.site;
		tokio::spawn(async move {
			if let Err(e) = store.update_address(&address, &patch).await {
				warn!(%site, %address, "persistence failure: {}", e);
				monitor.record_error(site, &format!("update_address failed: {}", e));
			}
		});
	}

	fn persist_queue_add(&self, address: &str, queued_at: Timestamp) {
		let Some(store) = self.store.clone() else { return };
		let address: Box<str> = address.into();
		let site = self.config.site;
		tokio::spawn(async move {
			if let Err(e) = store.add_to_queue(site, &address, queued_at).await {
				warn!(%site, %address, "persistence failure: {}", e);
			}
		});
	}

	fn persist_queue_remove(&self, address: &str) {
		let Some(store) = self.store.clone() else { return };
		let address: Box<str> = address.into();
		let site = self.config.site;
		tokio::spawn(async move {
			if let Err(e) = store.remove_from_queue(site, &address).await {
				warn!(%site, %address, "persistence failure: {}", e);
			}
		});
	}

	fn persist_pool_state(&self, next_index: u32) {
		let Some(store) = self.store.clone() else { return };
		let state = PoolState {
			site: self.config.site,
			next_index,
			start_index: self.config.start_index,
		};
		tokio::spawn(async move {
			if let Err(e) = store.save_pool_state(&state).await {
				warn!(site = %state.site, "persistence failure: {}", e);
			}
		});
	}
}

impl std::fmt::Debug for SiteAddressPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SiteAddressPool")
			.field("site", &self.config.site)
			.field("name", &self.config.name)
			.finish()
	}
}

// vim: ts=4
