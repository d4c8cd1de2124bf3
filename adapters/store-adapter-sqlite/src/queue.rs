//! Per-site queues of recycled addresses.

use sqlx::{Row, SqlitePool};

use payflow::prelude::*;

use crate::{collect_res, inspect};

pub(crate) async fn add(
	db: &SqlitePool,
	site: SiteId,
	address: &str,
	queued_at: Timestamp,
) -> PfResult<()> {
	sqlx::query(
		"INSERT INTO site_queues (site, address, queued_at) VALUES (?1, ?2, ?3)
		ON CONFLICT(site, address) DO UPDATE SET queued_at=excluded.queued_at",
	)
	.bind(i64::from(site.0))
	.bind(address)
	.bind(queued_at.0)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn remove(db: &SqlitePool, site: SiteId, address: &str) -> PfResult<()> {
	sqlx::query("DELETE FROM site_queues WHERE site = ?1 AND address = ?2")
		.bind(i64::from(site.0))
		.bind(address)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(())
}

/// Oldest first, matching the in-memory FIFO order.
pub(crate) async fn load(db: &SqlitePool, site: SiteId) -> PfResult<Vec<(Box<str>, Timestamp)>> {
	let res = sqlx::query(
		"SELECT address, queued_at FROM site_queues WHERE site = ?1 ORDER BY queued_at, address",
	)
	.bind(i64::from(site.0))
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(|row| {
		Ok((row.try_get::<Box<str>, _>("address")?, Timestamp(row.try_get("queued_at")?)))
	}))
}

// vim: ts=4
