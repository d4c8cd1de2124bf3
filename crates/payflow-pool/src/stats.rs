//! Read-only observability snapshots.
//!
//! Everything here is a point-in-time copy; nothing holds a lock after the
//! snapshot call returns.

use serde::Serialize;

use crate::gap::GapSeverity;
use crate::prelude::*;
use payflow_types::types::serialize_timestamp_iso;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
	#[serde(serialize_with = "serialize_timestamp_iso")]
	pub at: Timestamp,
	pub message: Box<str>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalPoolSnapshot {
	/// Addresses waiting in the FIFO.
	pub queued: usize,
	/// Addresses currently assigned out to a site.
	pub assigned: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapMonitorSnapshot {
	pub site: SiteId,
	pub consecutive_failures: u32,
	pub paid_count: u64,
	pub max_gap_limit: u32,
	pub warning_threshold: f64,
	pub critical_threshold: f64,
	pub gap_ratio: f64,
	pub should_use_fallback: bool,
	pub severity: GapSeverity,
	pub recent_errors: Vec<RecentError>,
}

/// Per-site pool counters.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePoolStats {
	pub site: SiteId,
	pub name: Box<str>,
	pub total_addresses: usize,
	pub available_queued: usize,
	pub reserved: usize,
	pub used: usize,
	pub expired: usize,
	pub skipped_indices: usize,
	pub start_index: u32,
	pub next_index: u32,
	pub end_index: u32,
	pub remaining_indices: u32,
	pub gap_streak: u32,
	pub at_risk: bool,
}

/// Aggregate snapshot across every registered site.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
	pub sites: Vec<SitePoolStats>,
	pub global_pool: GlobalPoolSnapshot,
}

// vim: ts=4
