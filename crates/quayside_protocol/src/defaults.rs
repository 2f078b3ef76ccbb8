//! Canonical default values shared across the desk.

/// Hard deadline for one scanner command (scan, diff_hashes, fetch).
pub const SCANNER_COMMAND_TIMEOUT_SECS: u64 = 120;
/// Hard deadline for a solver `solve` invocation.
pub const SOLVER_SOLVE_TIMEOUT_SECS: u64 = 5;
/// Hard deadline for a solver `monte_carlo` invocation.
pub const SOLVER_MONTE_CARLO_TIMEOUT_SECS: u64 = 30;
/// Hard deadline for one LLM second-pass call.
pub const LLM_TIMEOUT_SECS: u64 = 120;
/// Hard deadline for one bearer-token fetch.
pub const TOKEN_FETCH_TIMEOUT_SECS: u64 = 10;
/// Tokens are refreshed this long before their reported expiry.
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Bounded in-flight file count during a scan.
pub const MAX_INFLIGHT_FILES: usize = 4;
/// Bounded concurrency toward the LLM endpoint.
pub const MAX_INFLIGHT_LLM_CALLS: usize = 3;

/// Backoff bounds for restarting a crashed subprocess.
pub const RESPAWN_BACKOFF_INITIAL_MS: u64 = 500;
pub const RESPAWN_BACKOFF_MAX_MS: u64 = 5_000;

/// Default remote folder holding contract documents.
pub const DEFAULT_CONTRACTS_FOLDER: &str = "Contracts";
/// Default staleness threshold for upstream variable sources.
pub const DEFAULT_VARIABLE_STALENESS_SECS: i64 = 3_600;

/// Capacity of the store -> persist adapter channel. Producers block when
/// full: a mutation must be durable before it is observable.
pub const PERSIST_CHANNEL_CAPACITY: usize = 256;
/// Capacity of the loosely-ordered change-event broadcast.
pub const CHANGE_FEED_CAPACITY: usize = 1_024;
