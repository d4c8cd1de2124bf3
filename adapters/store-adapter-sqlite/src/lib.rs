//! SQLite-backed persistence adapter for Payflow.
//!
//! Stores pooled addresses, the per-site queues of recycled addresses, and
//! each site's derivation cursor. All writes are idempotent upserts, so the
//! engine's fire-and-forget persistence can retry or reorder harmlessly.

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool, SqliteRow};
use std::path::Path;

use payflow::{
	prelude::*,
	store_adapter::{self, AddressPatch, PoolState, PooledAddress},
	types::Timestamp,
};

mod address;
mod queue;
mod schema;
mod state;

pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> PfResult<T>
where
	F: FnOnce(SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(row).inspect_err(inspect).map_err(|_| Error::DbError),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => {
			inspect(&err);
			Err(Error::DbError)
		}
	}
}

pub(crate) fn collect_res<T>(
	iter: impl Iterator<Item = Result<T, sqlx::Error>>,
) -> PfResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

#[derive(Debug)]
pub struct StoreAdapterSqlite {
	db: SqlitePool,
}

impl StoreAdapterSqlite {
	pub async fn new(path: impl AsRef<Path>) -> PfResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		schema::init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;

		Ok(Self { db })
	}
}

#[async_trait]
impl store_adapter::StoreAdapter for StoreAdapterSqlite {
	// Addresses
	//***********
	async fn save_address(&self, addr: &PooledAddress) -> PfResult<()> {
		address::save(&self.db, addr).await
	}

	async fn update_address(&self, addr: &str, patch: &AddressPatch) -> PfResult<()> {
		address::update(&self.db, addr, patch).await
	}

	async fn load_all_addresses(&self) -> PfResult<Vec<PooledAddress>> {
		address::load_all(&self.db).await
	}

	// Site queues
	//*************
	async fn add_to_queue(
		&self,
		site: SiteId,
		addr: &str,
		queued_at: Timestamp,
	) -> PfResult<()> {
		queue::add(&self.db, site, addr, queued_at).await
	}

	async fn remove_from_queue(&self, site: SiteId, addr: &str) -> PfResult<()> {
		queue::remove(&self.db, site, addr).await
	}

	async fn load_queue(&self, site: SiteId) -> PfResult<Vec<(Box<str>, Timestamp)>> {
		queue::load(&self.db, site).await
	}

	// Derivation cursor
	//*******************
	async fn save_pool_state(&self, pool_state: &PoolState) -> PfResult<()> {
		state::save(&self.db, pool_state).await
	}

	async fn load_pool_state(&self, site: SiteId) -> PfResult<Option<PoolState>> {
		state::load(&self.db, site).await
	}
}

// vim: ts=4
