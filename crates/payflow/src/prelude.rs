pub use crate::app::App;
pub use payflow_types::error::{Error, PfResult};
pub use payflow_types::types::{Patch, SiteId, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
