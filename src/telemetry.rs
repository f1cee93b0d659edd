//! Telemetry metric name constants.
//!
//! Centralised metric names for callsheet operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `callsheet_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `method` — HTTP verb ("GET", "POST", "PUT", "DELETE")
//! - `outcome` — "ok" or "error"
//! - `function` — name given to a cached lookup when it was wrapped

/// Total requests dispatched (counted once per logical call, after any
/// authentication retries settle).
///
/// Labels: `method`, `outcome` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "callsheet_requests_total";

/// Total access-token refresh attempts triggered by 401/422 responses.
///
/// Labels: `outcome` ("ok" | "error").
pub const TOKEN_REFRESHES_TOTAL: &str = "callsheet_token_refreshes_total";

/// Total cache hits across wrapped lookup functions.
///
/// Labels: `function`.
pub const CACHE_HITS_TOTAL: &str = "callsheet_cache_hits_total";

/// Total cache misses across wrapped lookup functions.
///
/// Labels: `function`.
pub const CACHE_MISSES_TOTAL: &str = "callsheet_cache_misses_total";

/// Total expired hits: a cached entry was present but older than the TTL,
/// so the lookup was recomputed. Counted separately from plain misses.
///
/// Labels: `function`.
pub const CACHE_EXPIRED_HITS_TOTAL: &str = "callsheet_cache_expired_hits_total";
