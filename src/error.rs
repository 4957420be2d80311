// ftail - error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Errors are categorised by the subsystem that produced them; each variant
// carries enough context to log a useful diagnostic without re-deriving it
// from a bare string.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all ftail operations.
#[derive(Debug)]
pub enum FtailError {
    /// The change notifier or a watch backend failed.
    Watch(WatchError),

    /// The line reader (Tail) or path-rotating tail (TailEx) failed.
    Tail(TailError),

    /// A segment DB operation failed.
    Segment(SegmentError),

    /// The recorder (set of segment DBs) failed.
    Recorder(RecorderError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for FtailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watch(e) => write!(f, "watch error: {e}"),
            Self::Tail(e) => write!(f, "tail error: {e}"),
            Self::Segment(e) => write!(f, "segment error: {e}"),
            Self::Recorder(e) => write!(f, "recorder error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for FtailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Watch(e) => Some(e),
            Self::Tail(e) => Some(e),
            Self::Segment(e) => Some(e),
            Self::Recorder(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Watch errors
// ---------------------------------------------------------------------------

/// Errors related to the change notifier / file watcher backends (4.A, 4.B).
#[derive(Debug)]
pub enum WatchError {
    /// The native OS watch backend failed to initialise or was closed
    /// unexpectedly by the underlying platform API.
    BackendFailure { path: PathBuf, reason: String },

    /// Repeated reopen attempts on the watch backend all failed.
    ReopenExhausted { path: PathBuf, attempts: u32 },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendFailure { path, reason } => {
                write!(f, "watch backend failed on '{}': {reason}", path.display())
            }
            Self::ReopenExhausted { path, attempts } => write!(
                f,
                "watch backend on '{}' failed to reopen after {attempts} attempts",
                path.display()
            ),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<WatchError> for FtailError {
    fn from(e: WatchError) -> Self {
        Self::Watch(e)
    }
}

// ---------------------------------------------------------------------------
// Tail errors
// ---------------------------------------------------------------------------

/// Errors related to `Tail` and `TailEx` (4.C, 4.D).
#[derive(Debug)]
pub enum TailError {
    /// The watched file could not be opened (transient — absorbed by the
    /// caller when `reOpen` is set, surfaced otherwise).
    Open { path: PathBuf, source: io::Error },

    /// A read from the watched file failed.
    Read { path: PathBuf, source: io::Error },

    /// `pathFmt` has no current match on disk. Not fatal: callers treat this
    /// as a transient condition and retry on the next `GlobLoop` tick.
    NoSuchFile { pattern: String },
}

impl fmt::Display for TailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "cannot open '{}': {source}", path.display())
            }
            Self::Read { path, source } => {
                write!(f, "read error on '{}': {source}", path.display())
            }
            Self::NoSuchFile { pattern } => {
                write!(f, "no file currently matches pattern '{pattern}'")
            }
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Read { source, .. } => Some(source),
            Self::NoSuchFile { .. } => None,
        }
    }
}

impl From<TailError> for FtailError {
    fn from(e: TailError) -> Self {
        Self::Tail(e)
    }
}

// ---------------------------------------------------------------------------
// Segment errors
// ---------------------------------------------------------------------------

/// Errors related to a single segment DB (4.E). Most of these are fatal per
/// spec.md §7 ("Store corruption"): the orchestrator must abort the source
/// rather than silently drop records. `FixRename` is the one exception —
/// it's logged and swallowed, since the segment is already safely closed.
#[derive(Debug)]
pub enum SegmentError {
    /// Couldn't create the `YYYYMMDD` bucket directory.
    CreateDir { path: PathBuf, source: io::Error },

    /// The underlying embedded store could not be opened or created.
    StoreOpen { path: PathBuf, source: sled::Error },

    /// An operation was attempted on a segment that has already been closed.
    Closed,

    /// The atomic (record, position) transaction failed.
    TransactionFailed { path: PathBuf, reason: String },

    /// The position value failed to serialize to JSON.
    PositionEncode { source: serde_json::Error },

    /// The position bucket's stored bytes failed to deserialize.
    PositionDecode { source: serde_json::Error },

    /// Renaming a closed `.rec` file to `.fixed` failed. Logged, not fatal:
    /// the segment is left as `.rec` and will be adopted on next restart.
    FixRename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Walking the buffer directory for existing segments failed.
    Scan { path: PathBuf, source: walkdir::Error },

    /// A stored record's zlib stream failed to decompress.
    RecordDecompress { source: io::Error },
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDir { path, source } => {
                write!(f, "cannot create segment directory '{}': {source}", path.display())
            }
            Self::StoreOpen { path, source } => {
                write!(f, "cannot open segment store '{}': {source}", path.display())
            }
            Self::Closed => write!(f, "segment is already closed"),
            Self::TransactionFailed { path, reason } => write!(
                f,
                "put transaction failed on '{}': {reason}",
                path.display()
            ),
            Self::PositionEncode { source } => write!(f, "position encode failed: {source}"),
            Self::PositionDecode { source } => write!(f, "position decode failed: {source}"),
            Self::FixRename { from, to, source } => write!(
                f,
                "failed to rename '{}' to '{}': {source}",
                from.display(),
                to.display()
            ),
            Self::Scan { path, source } => {
                write!(f, "failed to scan '{}' for segments: {source}", path.display())
            }
            Self::RecordDecompress { source } => write!(f, "record decompression failed: {source}"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::StoreOpen { source, .. } => Some(source),
            Self::FixRename { source, .. } => Some(source),
            Self::PositionEncode { source } => Some(source),
            Self::PositionDecode { source } => Some(source),
            Self::Scan { source, .. } => Some(source),
            Self::RecordDecompress { source } => Some(source),
            Self::Closed | Self::TransactionFailed { .. } => None,
        }
    }
}

impl From<SegmentError> for FtailError {
    fn from(e: SegmentError) -> Self {
        Self::Segment(e)
    }
}

// ---------------------------------------------------------------------------
// Recorder errors
// ---------------------------------------------------------------------------

/// Errors related to the recorder (4.F), the set of segment DBs for one source.
#[derive(Debug)]
pub enum RecorderError {
    /// More than one `.rec` segment was found at startup. spec.md §9 treats
    /// this as a fatal startup error rather than guessing which to adopt.
    MultipleOpenSegments { buf_dir: PathBuf, found: Vec<PathBuf> },

    /// Propagated failure from the segment DB it was about to open/create.
    Segment(SegmentError),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleOpenSegments { buf_dir, found } => write!(
                f,
                "found {} '.rec' segments under '{}', expected at most one: {:?}",
                found.len(),
                buf_dir.display(),
                found
            ),
            Self::Segment(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Segment(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RecorderError> for FtailError {
    fn from(e: RecorderError) -> Self {
        Self::Recorder(e)
    }
}

impl From<SegmentError> for RecorderError {
    fn from(e: SegmentError) -> Self {
        Self::Segment(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading (ambient stack, §B of SPEC_FULL.md).
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse { path: PathBuf, source: toml::de::Error },

    /// A required field is missing.
    MissingField { field: &'static str },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Neither `path` nor `path_fmt` was set, or both were.
    AmbiguousSource,

    /// I/O error reading the config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "config parse error '{}': {source}", path.display())
            }
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::AmbiguousSource => write!(
                f,
                "exactly one of 'path' or 'path_fmt' must be set"
            ),
            Self::Io { path, source } => {
                write!(f, "config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for FtailError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience alias for ftail results.
pub type Result<T> = std::result::Result<T, FtailError>;
