//! Per-site derivation cursor persistence.

use sqlx::{Row, SqlitePool};

use payflow::prelude::*;
use payflow::store_adapter::PoolState;

use crate::{inspect, map_res};

pub(crate) async fn save(db: &SqlitePool, state: &PoolState) -> PfResult<()> {
	sqlx::query(
		"INSERT INTO pool_state (site, next_index, start_index) VALUES (?1, ?2, ?3)
		ON CONFLICT(site) DO UPDATE SET
			next_index=excluded.next_index, start_index=excluded.start_index",
	)
	.bind(i64::from(state.site.0))
	.bind(i64::from(state.next_index))
	.bind(i64::from(state.start_index))
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn load(db: &SqlitePool, site: SiteId) -> PfResult<Option<PoolState>> {
	let res = sqlx::query(
		"SELECT next_index, start_index FROM pool_state WHERE site = ?1",
	)
	.bind(i64::from(site.0))
	.fetch_one(db)
	.await;

	if matches!(res, Err(sqlx::Error::RowNotFound)) {
		return Ok(None);
	}
	map_res(res, |row| {
		Ok(Some(PoolState {
			site,
			next_index: row.try_get::<i64, _>("next_index")? as u32,
			start_index: row.try_get::<i64, _>("start_index")? as u32,
		}))
	})
}

// vim: ts=4
