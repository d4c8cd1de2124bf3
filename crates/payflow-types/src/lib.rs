//! Shared types, collaborator traits, and core utilities for Payflow.
//!
//! This crate contains the foundational types shared between the allocator
//! crates and all adapter implementations. Extracting these into a separate
//! crate allows adapter crates to compile in parallel with the pool engine.

pub mod address_generator;
pub mod balance_oracle;
pub mod error;
pub mod prelude;
pub mod store_adapter;
pub mod types;

/// Lock a `std::sync::Mutex`, recovering the guard if the mutex is poisoned.
///
/// A poisoned lock here means a task panicked mid-update; the pool state is
/// still the authoritative copy, so we log and keep going.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().or_else(|poisoned| {
			tracing::error!("mutex poisoned (recovering)");
			Ok::<_, $crate::error::Error>(poisoned.into_inner())
		})
	};
	($mutex:expr, $name:expr) => {
		$mutex.lock().or_else(|poisoned| {
			tracing::error!("mutex poisoned: {} (recovering)", $name);
			Ok::<_, $crate::error::Error>(poisoned.into_inner())
		})
	};
}

// vim: ts=4
