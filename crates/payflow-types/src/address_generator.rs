//! Collaborator that derives new receiving addresses.
//!
//! Key material and the derivation scheme live behind this trait; the pool
//! only decides *when* to derive and tracks the index cursor.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

/// A freshly derived address and the derivation index actually used.
#[derive(Clone, Debug)]
pub struct GeneratedAddress {
	pub address: Box<str>,
	/// The index the address was derived at. May be greater than the
	/// requested start index when the generator skipped indices with
	/// pre-existing on-chain history.
	pub index: u32,
}

#[async_trait]
pub trait AddressGenerator: Debug + Send + Sync {
	/// Derives the next usable address for `site` at or after `start_index`.
	///
	/// Implementations skip indices that already have on-chain history;
	/// the returned index is always `>= start_index`.
	async fn generate_for_site(
		&self,
		site: SiteId,
		start_index: u32,
	) -> PfResult<GeneratedAddress>;
}

// vim: ts=4
