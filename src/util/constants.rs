// ftail - util/constants.rs
//
// Single source of truth for named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "ftail";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Segment / recorder defaults (spec.md §3, §4.E, §4.F)
// =============================================================================

/// Extension of an open, currently-written segment DB.
pub const REC_EXT: &str = ".rec";

/// Extension of a closed, finalised segment DB ready for downstream pickup.
pub const FIXED_EXT: &str = ".fixed";

/// Default grace window added to `period` before a closed bucket is fixed.
pub const DEFAULT_DELAY_SECS: u64 = 10;

/// Default segment bucket duration when not configured.
pub const DEFAULT_PERIOD_SECS: u64 = 60;

/// Name of the records tree inside a segment DB.
pub const RECORDS_TREE: &str = "records";

/// Name of the position tree inside a segment DB (holds exactly one entry).
pub const POSITION_TREE: &str = "position";

/// Key used for the single entry in the position tree.
pub const POSITION_KEY: &[u8] = b"position";

// =============================================================================
// Tail / watch defaults (spec.md §4.B, §4.C, §4.D)
// =============================================================================

/// Default polling-watcher stat interval.
pub const DEFAULT_NOTIFY_INTERVAL_MS: u64 = 1_000;

/// Bytes fingerprinted at the head of a file for identity reconciliation.
/// 0 disables head-hashing.
pub const DEFAULT_MAX_HEAD_HASH_SIZE: u64 = 1024;

/// Hard upper bound on `max_head_hash_size` (prevents reading unbounded
/// prefixes into memory on misconfiguration).
pub const ABSOLUTE_MAX_HEAD_HASH_SIZE: u64 = 16 * 1024 * 1024;

/// Default rotation period assumed for `pathFmt` sources when unspecified.
pub const DEFAULT_ROTATE_PERIOD_SECS: u64 = 3_600;

// =============================================================================
// Logging
// =============================================================================

/// Default log level when neither RUST_LOG, --debug, nor config set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Configuration
// =============================================================================

/// Default configuration file name looked up next to the binary / in cwd.
pub const CONFIG_FILE_NAME: &str = "ftail.toml";
