//! Collaborator that answers on-chain history questions for an address.
//!
//! The engine never looks at the blockchain itself; every recycle and
//! re-check decision goes through this trait. Implementations are expected
//! to be idempotent and safe to call repeatedly for the same address.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::prelude::*;

/// On-chain activity summary for a single address.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressHistory {
	/// Confirmed balance in satoshis.
	pub balance_sats: i64,
	/// Number of transactions ever seen for the address.
	pub tx_count: u32,
}

impl AddressHistory {
	/// An address may only re-enter circulation when this holds.
	pub fn is_clean(&self) -> bool {
		self.balance_sats == 0 && self.tx_count == 0
	}
}

#[async_trait]
pub trait BalanceOracle: Debug + Send + Sync {
	/// Reads the on-chain history of `address`.
	///
	/// An `Err` means "unknown", not "clean" — callers abstain from
	/// recycling on error.
	async fn check_address_history(&self, address: &str) -> PfResult<AddressHistory>;
}

// vim: ts=4
