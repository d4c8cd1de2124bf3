//! Adapter that persists pool state between restarts.
//!
//! The in-memory pool is the source of truth for every allocation decision;
//! the store is a write-behind. When no adapter is configured the engine
//! runs purely in memory and state does not survive a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;

/// Lifecycle status of a pooled address.
///
/// `Used` and `Skipped` are terminal: such addresses are retained for audit
/// and gap-limit accounting, never deleted and never re-circulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum AddressStatus {
	Available,
	Reserved,
	Used,
	Expired,
	/// The derivation index had pre-existing on-chain history at generation
	/// time; permanently excluded from circulation but still occupying a
	/// gap-limit slot.
	Skipped,
}

impl AddressStatus {
	pub fn as_char(self) -> char {
		match self {
			AddressStatus::Available => 'A',
			AddressStatus::Reserved => 'R',
			AddressStatus::Used => 'U',
			AddressStatus::Expired => 'E',
			AddressStatus::Skipped => 'S',
		}
	}

	pub fn from_char(c: char) -> PfResult<Self> {
		match c {
			'A' => Ok(AddressStatus::Available),
			'R' => Ok(AddressStatus::Reserved),
			'U' => Ok(AddressStatus::Used),
			'E' => Ok(AddressStatus::Expired),
			'S' => Ok(AddressStatus::Skipped),
			_ => Err(Error::Parse),
		}
	}

	/// Terminal statuses never transition again.
	pub fn is_terminal(self) -> bool {
		matches!(self, AddressStatus::Used | AddressStatus::Skipped)
	}
}

/// A receiving address tracked by a site pool.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledAddress {
	pub address: Box<str>,
	pub site: SiteId,
	/// Current (or last) holder of the reservation.
	pub email: Option<Box<str>>,
	pub status: AddressStatus,
	pub reserved_at: Option<Timestamp>,
	pub last_checked: Option<Timestamp>,
	pub payment_count: u32,
	/// Amount (satoshis) the current holder was quoted.
	pub amount_sats: Option<i64>,
	/// `None` for addresses adopted from another site via the global pool.
	/// Recycling changes `status`/`email`, never this.
	pub derivation_index: Option<u32>,
}

/// Reservation fields touched when an address changes hands or status.
#[derive(Debug, Default)]
pub struct AddressPatch {
	pub email: Patch<Box<str>>,
	pub status: Patch<AddressStatus>,
	pub reserved_at: Patch<Timestamp>,
	pub last_checked: Patch<Timestamp>,
	pub payment_count: Patch<u32>,
	pub amount_sats: Patch<i64>,
}

/// Per-site persisted cursor state.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
	pub site: SiteId,
	pub next_index: u32,
	pub start_index: u32,
}

/// A Payflow persistence adapter.
///
/// All operations are idempotent upserts: the pool writes fire-and-forget
/// and a failed write is logged, never retried synchronously and never
/// rolled back into the in-memory state.
#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	/// Inserts or replaces the full record for an address.
	async fn save_address(&self, addr: &PooledAddress) -> PfResult<()>;

	/// Applies a partial update to an address record.
	async fn update_address(&self, address: &str, patch: &AddressPatch) -> PfResult<()>;

	/// Loads every known address across all sites (startup).
	async fn load_all_addresses(&self) -> PfResult<Vec<PooledAddress>>;

	// Site queue of recycled, available addresses
	async fn add_to_queue(&self, site: SiteId, address: &str, queued_at: Timestamp)
		-> PfResult<()>;
	async fn remove_from_queue(&self, site: SiteId, address: &str) -> PfResult<()>;
	async fn load_queue(&self, site: SiteId) -> PfResult<Vec<(Box<str>, Timestamp)>>;

	// Derivation cursor
	async fn save_pool_state(&self, state: &PoolState) -> PfResult<()>;
	async fn load_pool_state(&self, site: SiteId) -> PfResult<Option<PoolState>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_char_roundtrip() {
		for status in [
			AddressStatus::Available,
			AddressStatus::Reserved,
			AddressStatus::Used,
			AddressStatus::Expired,
			AddressStatus::Skipped,
		] {
			assert_eq!(AddressStatus::from_char(status.as_char()).unwrap(), status);
		}
		assert!(AddressStatus::from_char('X').is_err());
	}

	#[test]
	fn terminal_statuses() {
		assert!(AddressStatus::Used.is_terminal());
		assert!(AddressStatus::Skipped.is_terminal());
		assert!(!AddressStatus::Reserved.is_terminal());
		assert!(!AddressStatus::Available.is_terminal());
	}
}

// vim: ts=4
