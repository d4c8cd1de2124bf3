//! Gap-limit monitor.
//!
//! Standard HD wallets stop scanning after a run of consecutive unused
//! derived addresses ("gap limit", typically 20). This monitor tracks how
//! close each site's derivation cursor is to outrunning that, and exposes a
//! fallback signal that makes allocation prefer already-derived addresses
//! over advancing the cursor further.
//!
//! The failure counter has no direct setter: it moves only through
//! `note_generated` / `note_paid`, driven by allocation and payment events.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use crate::prelude::*;
use crate::stats::{GapMonitorSnapshot, RecentError};

/// Per-site monitor configuration.
#[derive(Clone, Debug)]
pub struct GapConfig {
	/// Ceiling of consecutive unpaid derivations the wallet can recover.
	pub max_gap_limit: u32,
	/// Fraction of `max_gap_limit` at which the site is flagged warning.
	pub warning_threshold: f64,
	/// Fraction of `max_gap_limit` at which the site is flagged critical.
	pub critical_threshold: f64,
	/// Consecutive unpaid generations before `should_use_fallback` trips.
	pub fallback_after_failures: u32,
	/// Bounded error-history ring size.
	pub recent_errors_cap: usize,
}

impl Default for GapConfig {
	fn default() -> Self {
		Self {
			max_gap_limit: 20,
			warning_threshold: 0.5,
			critical_threshold: 0.8,
			fallback_after_failures: 15,
			recent_errors_cap: 32,
		}
	}
}

impl GapConfig {
	pub fn validate(&self) -> PfResult<()> {
		if self.max_gap_limit == 0 {
			return Err(Error::ValidationError("max_gap_limit must be > 0".into()));
		}
		validate_thresholds(self.warning_threshold, self.critical_threshold)?;
		if self.fallback_after_failures == 0 {
			return Err(Error::ValidationError("fallback_after_failures must be > 0".into()));
		}
		Ok(())
	}
}

fn validate_thresholds(warning: f64, critical: f64) -> PfResult<()> {
	if !(0.0..=1.0).contains(&warning) || !(0.0..=1.0).contains(&critical) {
		return Err(Error::ValidationError("thresholds must be within [0, 1]".into()));
	}
	if warning >= critical {
		return Err(Error::ValidationError(format!(
			"warning threshold {} must be below critical threshold {}",
			warning, critical
		)));
	}
	Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
	Ok,
	Warning,
	Critical,
}

#[derive(Debug)]
struct SiteGapState {
	config: GapConfig,
	consecutive_failures: u32,
	paid_count: u64,
	recent_errors: VecDeque<RecentError>,
}

impl SiteGapState {
	fn new(config: GapConfig) -> Self {
		Self { config, consecutive_failures: 0, paid_count: 0, recent_errors: VecDeque::new() }
	}
}

#[derive(Debug, Default)]
pub struct GapLimitMonitor {
	sites: RwLock<HashMap<SiteId, SiteGapState>>,
}

impl GapLimitMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_site(&self, site: SiteId, config: GapConfig) -> PfResult<()> {
		config.validate()?;
		self.sites.write().entry(site).or_insert_with(|| SiteGapState::new(config));
		Ok(())
	}

	/// A fresh derivation advanced the cursor without a payment yet.
	pub fn note_generated(&self, site: SiteId) {
		let mut sites = self.sites.write();
		if let Some(state) = sites.get_mut(&site) {
			state.consecutive_failures += 1;
			if state.consecutive_failures >= state.config.fallback_after_failures {
				warn!(
					%site,
					failures = state.consecutive_failures,
					"gap monitor: fallback mode active"
				);
			}
		}
	}

	/// A payment landed; the unpaid run is broken.
	pub fn note_paid(&self, site: SiteId) {
		let mut sites = self.sites.write();
		if let Some(state) = sites.get_mut(&site) {
			state.consecutive_failures = 0;
			state.paid_count += 1;
		}
	}

	/// Appends to the bounded error ring (oracle failures, persistence
	/// failures, refused generations).
	pub fn record_error(&self, site: SiteId, message: &str) {
		let mut sites = self.sites.write();
		if let Some(state) = sites.get_mut(&site) {
			if state.recent_errors.len() >= state.config.recent_errors_cap {
				state.recent_errors.pop_front();
			}
			state
				.recent_errors
				.push_back(RecentError { at: Timestamp::now(), message: message.into() });
		}
	}

	/// `unpaid / max_gap_limit`, the fraction of the recoverable window in use.
	pub fn gap_ratio(&self, site: SiteId, unpaid: u32) -> f64 {
		let sites = self.sites.read();
		match sites.get(&site) {
			Some(state) => f64::from(unpaid) / f64::from(state.config.max_gap_limit),
			None => 0.0,
		}
	}

	/// True once the unpaid-generation run crosses the configured
	/// threshold; allocation then prefers pooled addresses and refuses to
	/// advance the derivation cursor.
	pub fn should_use_fallback(&self, site: SiteId) -> bool {
		let sites = self.sites.read();
		sites
			.get(&site)
			.is_some_and(|s| s.consecutive_failures >= s.config.fallback_after_failures)
	}

	pub fn severity(&self, site: SiteId, unpaid: u32) -> GapSeverity {
		let sites = self.sites.read();
		let Some(state) = sites.get(&site) else { return GapSeverity::Ok };
		let ratio = f64::from(unpaid) / f64::from(state.config.max_gap_limit);
		if ratio >= state.config.critical_threshold {
			GapSeverity::Critical
		} else if ratio >= state.config.warning_threshold {
			GapSeverity::Warning
		} else {
			GapSeverity::Ok
		}
	}

	// Administrative surface. These exist so thresholds can be tuned
	// without restarting the service.
	//****************************************************************

	pub fn reset_unpaid_count(&self, site: SiteId) -> PfResult<()> {
		let mut sites = self.sites.write();
		let state = sites.get_mut(&site).ok_or(Error::NotFound)?;
		state.consecutive_failures = 0;
		info!(%site, "gap monitor: unpaid count reset");
		Ok(())
	}

	pub fn update_max_gap_limit(&self, site: SiteId, max_gap_limit: u32) -> PfResult<()> {
		if max_gap_limit == 0 {
			return Err(Error::ValidationError("max_gap_limit must be > 0".into()));
		}
		let mut sites = self.sites.write();
		let state = sites.get_mut(&site).ok_or(Error::NotFound)?;
		state.config.max_gap_limit = max_gap_limit;
		info!(%site, max_gap_limit, "gap monitor: max gap limit updated");
		Ok(())
	}

	/// Rejects `warning >= critical`; the prior configuration is left
	/// untouched on error.
	pub fn update_thresholds(&self, site: SiteId, warning: f64, critical: f64) -> PfResult<()> {
		validate_thresholds(warning, critical)?;
		let mut sites = self.sites.write();
		let state = sites.get_mut(&site).ok_or(Error::NotFound)?;
		state.config.warning_threshold = warning;
		state.config.critical_threshold = critical;
		info!(%site, warning, critical, "gap monitor: thresholds updated");
		Ok(())
	}

	pub fn clear_recent_errors(&self, site: SiteId) -> PfResult<()> {
		let mut sites = self.sites.write();
		let state = sites.get_mut(&site).ok_or(Error::NotFound)?;
		state.recent_errors.clear();
		Ok(())
	}

	pub fn snapshot(&self, site: SiteId, unpaid: u32) -> PfResult<GapMonitorSnapshot> {
		let severity = self.severity(site, unpaid);
		let sites = self.sites.read();
		let state = sites.get(&site).ok_or(Error::NotFound)?;
		Ok(GapMonitorSnapshot {
			site,
			consecutive_failures: state.consecutive_failures,
			paid_count: state.paid_count,
			max_gap_limit: state.config.max_gap_limit,
			warning_threshold: state.config.warning_threshold,
			critical_threshold: state.config.critical_threshold,
			gap_ratio: f64::from(unpaid) / f64::from(state.config.max_gap_limit),
			should_use_fallback: state.consecutive_failures
				>= state.config.fallback_after_failures,
			severity,
			recent_errors: state.recent_errors.iter().cloned().collect(),
		})
	}
}


// vim: ts=4
