//! Payflow is a library for issuing cryptocurrency receiving addresses.
//!
//! # Guarantees
//!
//! - Each address is held by at most one payer at a time
//! - Abandoned reservations are reclaimed only after an on-chain history
//!   check confirms they never received funds
//! - The HD-wallet derivation cursor never races past what wallet software
//!   can rediscover (gap-limit protection with a fallback mode)
//! - Allocation requests pass a three-tier token-bucket admission gate
//!   (global / per-IP / per-email)
//!
//! The crate is the allocation core only: HTTP surfaces, dashboards and
//! notification delivery live in the embedding service. Address derivation
//! and blockchain balance lookups are delegated to collaborator traits, and
//! persistence is an optional adapter — without one the engine runs purely
//! in memory.

// Re-export shared types and collaborator traits from payflow-types
pub use payflow_types::address_generator;
pub use payflow_types::balance_oracle;
pub use payflow_types::error;
pub use payflow_types::store_adapter;
pub use payflow_types::types;

// Re-export the lock! macro so `$crate::error::Error` resolves correctly
// for code in this crate that uses `lock!` via payflow_types
pub use payflow_types::lock;

// Infrastructure re-exports
pub use payflow_core::rate_limit;
pub use payflow_core::scheduler;

// Allocator domain re-exports
pub use payflow_pool::gap;
pub use payflow_pool::global;
pub use payflow_pool::recycle;
pub use payflow_pool::registry;
pub use payflow_pool::site;
pub use payflow_pool::stats;

// Local modules
pub mod app;
pub mod prelude;
pub mod tasks;

pub use crate::app::{start, App, AppBuilder, AppOpts, AppState, EnhancedStats};

// vim: ts=4
