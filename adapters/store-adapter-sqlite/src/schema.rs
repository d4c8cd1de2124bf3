//! Database schema initialization.
//!
//! Creates tables and indexes on first connect; every statement is
//! idempotent so reconnecting against an existing database is a no-op.

use sqlx::SqlitePool;

pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Addresses
	//***********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS addresses (
		address text NOT NULL,
		site integer NOT NULL,
		email text,
		status char(1) NOT NULL,
		reserved_at integer,
		last_checked integer,
		payment_count integer NOT NULL DEFAULT 0,
		amount_sats integer,
		derivation_index integer,
		PRIMARY KEY(address)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_addresses_site_status ON addresses (site, status)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_addresses_site_index ON addresses (site, derivation_index)",
	)
	.execute(&mut *tx)
	.await?;

	// Site queues of recycled addresses
	//***********************************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS site_queues (
		site integer NOT NULL,
		address text NOT NULL,
		queued_at integer NOT NULL,
		PRIMARY KEY(site, address)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Per-site derivation cursor
	//****************************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS pool_state (
		site integer NOT NULL,
		next_index integer NOT NULL,
		start_index integer NOT NULL,
		PRIMARY KEY(site)
	)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
