//! Pooled address persistence.

use sqlx::{Row, SqlitePool};

use payflow::prelude::*;
use payflow::store_adapter::{AddressPatch, AddressStatus, PooledAddress};

use crate::{collect_res, inspect};

pub(crate) async fn save(db: &SqlitePool, addr: &PooledAddress) -> PfResult<()> {
	sqlx::query(
		"INSERT INTO addresses
			(address, site, email, status, reserved_at, last_checked,
			payment_count, amount_sats, derivation_index)
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
		ON CONFLICT(address) DO UPDATE SET
			site=excluded.site, email=excluded.email, status=excluded.status,
			reserved_at=excluded.reserved_at, last_checked=excluded.last_checked,
			payment_count=excluded.payment_count, amount_sats=excluded.amount_sats,
			derivation_index=excluded.derivation_index",
	)
	.bind(addr.address.as_ref())
	.bind(i64::from(addr.site.0))
	.bind(addr.email.as_deref())
	.bind(addr.status.as_char().to_string())
	.bind(addr.reserved_at.map(|ts| ts.0))
	.bind(addr.last_checked.map(|ts| ts.0))
	.bind(i64::from(addr.payment_count))
	.bind(addr.amount_sats)
	.bind(addr.derivation_index.map(i64::from))
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn update(db: &SqlitePool, address: &str, patch: &AddressPatch) -> PfResult<()> {
	let mut query = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE addresses SET ");
	let mut sep = query.separated(", ");
	let mut changed = false;

	match &patch.email {
		Patch::Value(email) => {
			sep.push("email = ").push_bind_unseparated(email.to_string());
			changed = true;
		}
		Patch::Null => {
			sep.push("email = NULL");
			changed = true;
		}
		Patch::Undefined => (),
	}
	match patch.status {
		Patch::Value(status) => {
			sep.push("status = ").push_bind_unseparated(status.as_char().to_string());
			changed = true;
		}
		Patch::Null | Patch::Undefined => (),
	}
	match patch.reserved_at {
		Patch::Value(ts) => {
			sep.push("reserved_at = ").push_bind_unseparated(ts.0);
			changed = true;
		}
		Patch::Null => {
			sep.push("reserved_at = NULL");
			changed = true;
		}
		Patch::Undefined => (),
	}
	match patch.last_checked {
		Patch::Value(ts) => {
			sep.push("last_checked = ").push_bind_unseparated(ts.0);
			changed = true;
		}
		Patch::Null => {
			sep.push("last_checked = NULL");
			changed = true;
		}
		Patch::Undefined => (),
	}
	match patch.payment_count {
		Patch::Value(count) => {
			sep.push("payment_count = ").push_bind_unseparated(i64::from(count));
			changed = true;
		}
		Patch::Null | Patch::Undefined => (),
	}
	match patch.amount_sats {
		Patch::Value(amount) => {
			sep.push("amount_sats = ").push_bind_unseparated(amount);
			changed = true;
		}
		Patch::Null => {
			sep.push("amount_sats = NULL");
			changed = true;
		}
		Patch::Undefined => (),
	}

	if !changed {
		return Ok(());
	}
	query.push(" WHERE address = ").push_bind(address);
	query.build().execute(db).await.inspect_err(inspect).map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn load_all(db: &SqlitePool) -> PfResult<Vec<PooledAddress>> {
	let res = sqlx::query(
		"SELECT address, site, email, status, reserved_at, last_checked,
			payment_count, amount_sats, derivation_index
		FROM addresses",
	)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(|row| {
		let status: &str = row.try_get("status")?;
		let status_char = status.chars().next().unwrap_or('?');
		let status = AddressStatus::from_char(status_char).map_err(|_| {
			sqlx::Error::Decode(format!("invalid address status {:?}", status_char).into())
		})?;
		Ok(PooledAddress {
			address: row.try_get::<Box<str>, _>("address")?,
			site: SiteId(row.try_get::<i64, _>("site")? as u32),
			email: row.try_get("email")?,
			status,
			reserved_at: row.try_get::<Option<i64>, _>("reserved_at")?.map(Timestamp),
			last_checked: row.try_get::<Option<i64>, _>("last_checked")?.map(Timestamp),
			payment_count: row.try_get::<i64, _>("payment_count")? as u32,
			amount_sats: row.try_get("amount_sats")?,
			derivation_index: row
				.try_get::<Option<i64>, _>("derivation_index")?
				.map(|index| index as u32),
		})
	}))
}

// vim: ts=4
