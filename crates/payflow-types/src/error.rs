//! Error types shared across the Payflow crates.

use crate::types::SiteId;

pub type PfResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	NotFound,
	DbError,

	/// Admission denied by the rate limiter; carries the tier that denied.
	RateLimited { tier: &'static str },
	/// A site's derivation range is fully consumed (or generation is
	/// suspended by the gap-limit fallback).
	PoolExhausted { site: SiteId },
	/// The balance oracle errored or timed out. Callers must treat this
	/// conservatively, never as a confirmed zero balance.
	OracleUnavailable,
	/// Rejected configuration update; prior configuration is untouched.
	ValidationError(String),
	Internal(String),
	Parse,

	// externals
	Io(std::io::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::DbError => write!(f, "database error"),
			Error::RateLimited { tier } => write!(f, "{} rate limit exceeded", tier),
			Error::PoolExhausted { site } => write!(f, "address pool exhausted for site {}", site),
			Error::OracleUnavailable => write!(f, "balance oracle unavailable"),
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Parse => write!(f, "parse error"),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

// vim: ts=4
