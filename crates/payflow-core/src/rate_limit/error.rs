//! Rate limiting error types.

use payflow_types::error::Error;

/// Typed denial reasons, one per tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitError {
	Global,
	Ip,
	Email,
}

impl RateLimitError {
	pub fn tier(self) -> &'static str {
		match self {
			RateLimitError::Global => "global",
			RateLimitError::Ip => "IP",
			RateLimitError::Email => "email",
		}
	}
}

impl std::fmt::Display for RateLimitError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} rate limit exceeded", self.tier())
	}
}

impl std::error::Error for RateLimitError {}

impl From<RateLimitError> for Error {
	fn from(err: RateLimitError) -> Self {
		Error::RateLimited { tier: err.tier() }
	}
}

// vim: ts=4
