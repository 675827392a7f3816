//! Shared constants: URL parameter names, store keys, and identity TTL.

use std::time::Duration;

/// Query parameter carrying one or more anonymous device identifiers
/// between cooperating sites. Comma/whitespace separated, first element
/// authoritative.
pub const URL_PARAM_DEVICE_ID: &str = "d_id";

/// Query parameter carrying the integer session identifier.
pub const URL_PARAM_SESSION_ID: &str = "s_id";

/// Query parameter requesting opt-out from behaviour tracking.
/// Only the literal value `true` counts as a request.
pub const URL_PARAM_OPT_OUT: &str = "optOutAnalytics";

/// Durable store key holding the comma-joined canonical device-id set.
pub const DEVICE_IDS_STORE_KEY: &str = "__analytics_dids";

/// Durable store key prefix for persisted experiment assignments.
/// Full key shape: `__analytics_experiments_<experiment>_<device_id>`.
pub const EXPERIMENTS_STORE_PREFIX: &str = "__analytics_experiments_";

/// How long identity and experiment entries stay valid in the store.
pub const IDENTITY_TTL_DAYS: u64 = 300;

/// [`IDENTITY_TTL_DAYS`] as a [`Duration`].
#[must_use]
pub fn identity_ttl() -> Duration {
    Duration::from_secs(IDENTITY_TTL_DAYS * 24 * 60 * 60)
}
