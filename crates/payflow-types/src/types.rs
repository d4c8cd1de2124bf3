//! Common types used throughout the Payflow engine.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

// SiteId //
//********//
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(pub u32);

impl std::fmt::Display for SiteId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for SiteId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_u32(self.0)
	}
}

impl<'de> Deserialize<'de> for SiteId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(SiteId(u32::deserialize(deserializer)?))
	}
}

// Timestamp //
//***********//
/// Unix timestamp in whole seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Self {
		now()
	}

	pub fn from_now(seconds: i64) -> Self {
		Timestamp(now().0 + seconds)
	}

	/// Seconds elapsed since `earlier`. Negative if `earlier` is in the future.
	pub fn seconds_since(self, earlier: Timestamp) -> i64 {
		self.0 - earlier.0
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

pub fn now() -> Timestamp {
	let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
	Timestamp(res.as_secs() as i64)
}

/// Serialize a timestamp as an ISO-8601 string (observability snapshots).
pub fn serialize_timestamp_iso<S>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	match chrono::DateTime::from_timestamp(ts.0, 0) {
		Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
		None => serializer.serialize_i64(ts.0),
	}
}

pub fn serialize_timestamp_iso_opt<S>(
	ts: &Option<Timestamp>,
	serializer: S,
) -> Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	match ts {
		Some(ts) => serialize_timestamp_iso(ts, serializer),
		None => serializer.serialize_none(),
	}
}

// Patch //
//*******//
/// Three-state update field: leave untouched, clear, or set.
#[derive(Clone, Debug)]
pub enum Patch<T> {
	Undefined,
	Null,
	Value(T),
}

// Manual impl: `Undefined` is the default for any T
impl<T> Default for Patch<T> {
	fn default() -> Self {
		Patch::Undefined
	}
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timestamp_ordering_and_arithmetic() {
		let a = Timestamp(100);
		let b = Timestamp(172);
		assert!(a < b);
		assert_eq!(b.seconds_since(a), 72);
		assert_eq!(a.seconds_since(b), -72);
	}

	#[test]
	fn site_id_serde_roundtrip() {
		let site = SiteId(7);
		let json = serde_json::to_string(&site).unwrap();
		assert_eq!(json, "7");
		let back: SiteId = serde_json::from_str(&json).unwrap();
		assert_eq!(back, site);
	}
}

// vim: ts=4
