//! Cross-site global address pool.
//!
//! A deduplicated, site-agnostic FIFO of reclaimed addresses shared by all
//! sites, plus an `address → site` assignment map. This component has no
//! notion of payment status; callers verify cleanliness before returning an
//! address here.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use crate::prelude::*;
use crate::stats::GlobalPoolSnapshot;

#[derive(Debug, Default)]
struct GlobalInner {
	/// Oldest reclaimed address at the front.
	queue: VecDeque<Box<str>>,
	/// Every address this pool has ever seen, with its current assignment.
	assigned: HashMap<Box<str>, Option<SiteId>>,
}

#[derive(Debug, Default)]
pub struct GlobalAddressPool {
	inner: RwLock<GlobalInner>,
}

impl GlobalAddressPool {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a verified-clean address to the tail. Idempotent: the linear
	/// dedup scan is fine at the expected pool sizes (tens of entries).
	/// Returns `false` if the address was already pooled or is currently
	/// assigned to a site.
	pub fn add(&self, address: &str) -> bool {
		let mut inner = self.inner.write();
		if inner.queue.iter().any(|a| a.as_ref() == address) {
			debug!(address, "global pool: duplicate add ignored");
			return false;
		}
		if let Some(Some(site)) = inner.assigned.get(address) {
			debug!(address, %site, "global pool: address in circulation, add ignored");
			return false;
		}
		inner.queue.push_back(address.into());
		inner.assigned.insert(address.into(), None);
		true
	}

	/// Pops the oldest address and records it as assigned to `site`.
	pub fn take(&self, site: SiteId) -> Option<Box<str>> {
		let mut inner = self.inner.write();
		let address = inner.queue.pop_front()?;
		inner.assigned.insert(address.clone(), Some(site));
		debug!(%address, %site, "global pool: address taken");
		Some(address)
	}

	/// Clears any assignment and re-appends to the tail.
	pub fn return_to_pool(&self, address: &str) {
		let mut inner = self.inner.write();
		inner.assigned.insert(address.into(), None);
		if !inner.queue.iter().any(|a| a.as_ref() == address) {
			inner.queue.push_back(address.into());
		}
	}

	pub fn assigned_site(&self, address: &str) -> Option<SiteId> {
		self.inner.read().assigned.get(address).copied().flatten()
	}

	pub fn len(&self) -> usize {
		self.inner.read().queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().queue.is_empty()
	}

	pub fn snapshot(&self) -> GlobalPoolSnapshot {
		let inner = self.inner.read();
		GlobalPoolSnapshot {
			queued: inner.queue.len(),
			assigned: inner.assigned.values().filter(|site| site.is_some()).count(),
		}
	}
}


// vim: ts=4
