//! The Payflow allocator domain.
//!
//! Per-site address pools with a strict allocation priority chain, the
//! cross-site global pool of reclaimed addresses, the gap-limit monitor
//! guarding the derivation cursor, and the recycling sweep that reclaims
//! abandoned reservations.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod gap;
pub mod global;
pub mod prelude;
pub mod recycle;
pub mod registry;
pub mod site;
pub mod stats;

pub use gap::{GapConfig, GapLimitMonitor, GapSeverity};
pub use global::GlobalAddressPool;
pub use recycle::RecycleSummary;
pub use registry::PoolRegistry;
pub use site::{PoolConfig, SiteAddressPool, SiteConfig, AT_RISK_STREAK};

// vim: ts=4
