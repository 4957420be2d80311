// ftail - tailex.rs
//
// 4.D Path-Rotating Tail (TailEx): wraps `tail::spawn` for paths that
// contain strftime-style time directives, re-pointing the inner Tail at a
// new concrete path whenever the time bucket rolls over.
//
// Grounded in `examples/original_source/in/ftail/ftail.go`'s use of
// `tailex.Truncate` / `tailex.Time2Path` / `tailex.GlobSearch` (the
// `tailex` package itself wasn't retrieved, so its three primitives are
// reconstructed here from that call site plus spec.md §4.D) and restructured
// as a background thread matching this crate's `tail::spawn` shape.

use crate::tail::{LineEvent, TailConfig};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a path-rotating tail. `path_fmt` is a strftime-style
/// template (`%Y%m%d%H` etc, via `chrono::format::strftime`); `rotate_period`
/// is how often the source file itself is expected to roll over.
#[derive(Debug, Clone)]
pub struct TailExConfig {
    pub path_fmt: String,
    pub rotate_period: Duration,
    pub inner: TailConfig,
}

/// Truncate `t` down to a multiple of `period` since the Unix epoch. Mirrors
/// the Go original's `tailex.Truncate`.
pub fn truncate(t: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    if period.is_zero() {
        return t;
    }
    let period_secs = period.as_secs() as i64;
    let epoch_secs = t.timestamp();
    let truncated = (epoch_secs.div_euclid(period_secs)) * period_secs;
    DateTime::from_timestamp(truncated, 0).unwrap_or(t)
}

/// Expand a strftime-style template against `bucket_time`.
pub fn time_to_path(path_fmt: &str, bucket_time: DateTime<Utc>) -> String {
    bucket_time.format(path_fmt).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobError {
    NoSuchFile,
    Io(String),
}

impl std::fmt::Display for GlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuchFile => write!(f, "no file matches glob pattern"),
            Self::Io(msg) => write!(f, "glob search failed: {msg}"),
        }
    }
}

impl std::error::Error for GlobError {}

/// Search for a single existing path matching `pattern` (a glob, since the
/// expanded strftime template may still contain `*`/`?` if the caller's
/// format string has literal glob metacharacters around the time fields).
/// Returns the most recently modified match if several exist.
pub fn glob_search(pattern: &str) -> Result<PathBuf, GlobError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    let iter = glob::glob(pattern).map_err(|e| GlobError::Io(e.to_string()))?;
    for entry in iter {
        match entry {
            Ok(p) => candidates.push(p),
            Err(e) => return Err(GlobError::Io(e.to_string())),
        }
    }
    if candidates.is_empty() {
        // A pattern with no metacharacters that simply doesn't exist on disk
        // also lands here via an empty iterator, matching the Go original's
        // ErrNoSuchFile for both cases.
        return Err(GlobError::NoSuchFile);
    }
    candidates.sort_by_key(|p| {
        std::fs::metadata(p)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });
    Ok(candidates.pop().unwrap())
}

/// Events a path-rotating tail can emit. A superset of `LineEvent` with the
/// extra `GlobLoop` ticker variant spec.md §4.D names for periodic flush
/// logic when the source file hasn't appeared yet.
#[derive(Debug, Clone)]
pub enum TailExEvent {
    Line(LineEvent),
    GlobLoop { time: DateTime<Utc> },
}

const GLOB_LOOP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn a TailEx task. Returns immediately; events arrive on the returned
/// receiver until cancellation is observed.
pub fn spawn(config: TailExConfig, cancel: Arc<AtomicBool>) -> Receiver<TailExEvent> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || run(config, tx, cancel));
    rx
}

fn run(config: TailExConfig, tx: Sender<TailExEvent>, cancel: Arc<AtomicBool>) {
    let mut current_path: Option<PathBuf> = None;
    let mut inner_cancel: Option<Arc<AtomicBool>> = None;
    let mut inner_rx: Option<Receiver<LineEvent>> = None;
    // `config.inner.location` only makes sense for the very first file this
    // task resolves (the orchestrator's head-hash reconciliation result).
    // Every subsequent bucket rollover is by definition a brand-new file, so
    // it always starts at offset 0.
    let mut first_spawn = true;

    loop {
        if cancel.load(Ordering::Acquire) {
            break;
        }

        let now = Utc::now();
        let bucket = truncate(now, config.rotate_period);
        let expected_pattern = time_to_path(&config.path_fmt, bucket);

        match glob_search(&expected_pattern) {
            Ok(resolved) => {
                if current_path.as_deref() != Some(resolved.as_path()) {
                    // Bucket rolled over (or first resolution): stop the old
                    // inner tail, if any, and start a fresh one.
                    if let Some(c) = inner_cancel.take() {
                        c.store(true, Ordering::Release);
                    }
                    tracing::debug!(path = %resolved.display(), "tailex: switching to new bucket path");
                    let mut inner_config = config.inner.clone();
                    if !first_spawn {
                        inner_config.location = None;
                    }
                    first_spawn = false;
                    let child_cancel = Arc::new(AtomicBool::new(false));
                    inner_rx = Some(crate::tail::spawn(
                        resolved.clone(),
                        inner_config,
                        Arc::clone(&child_cancel),
                    ));
                    inner_cancel = Some(child_cancel);
                    current_path = Some(resolved);
                }
            }
            Err(GlobError::NoSuchFile) => {
                tracing::trace!(pattern = %expected_pattern, "tailex: no matching file yet");
            }
            Err(e) => {
                tracing::warn!(pattern = %expected_pattern, error = %e, "tailex: glob search failed");
            }
        }

        if let Some(rx) = &inner_rx {
            match rx.recv_timeout(GLOB_LOOP_INTERVAL) {
                Ok(event) => {
                    if tx.send(TailExEvent::Line(event)).is_err() {
                        break;
                    }
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    inner_rx = None;
                }
            }
        } else {
            std::thread::sleep(GLOB_LOOP_INTERVAL);
        }

        if tx.send(TailExEvent::GlobLoop { time: Utc::now() }).is_err() {
            break;
        }
    }

    if let Some(c) = inner_cancel.take() {
        c.store(true, Ordering::Release);
    }
}

/// Resolve the concrete path an orchestrator should probe *right now* for
/// position-reconciliation purposes (spec.md §4.G step 2), without spawning
/// anything. Used once at startup before the TailEx task exists.
pub fn resolve_current_path(path_fmt: &str, rotate_period: Duration) -> Result<PathBuf, GlobError> {
    let bucket = truncate(Utc::now(), rotate_period);
    let pattern = time_to_path(path_fmt, bucket);
    glob_search(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    #[test]
    fn truncate_rounds_down_to_period() {
        let t = Utc.with_ymd_and_hms(2026, 7, 28, 14, 37, 22).unwrap();
        let truncated = truncate(t, Duration::from_secs(3600));
        assert_eq!(truncated, Utc.with_ymd_and_hms(2026, 7, 28, 14, 0, 0).unwrap());
    }

    #[test]
    fn time_to_path_expands_template() {
        let t = Utc.with_ymd_and_hms(2026, 7, 28, 14, 0, 0).unwrap();
        let path = time_to_path("/tmp/a-%Y%m%d%H.log", t);
        assert_eq!(path, "/tmp/a-2026072814.log");
    }

    #[test]
    fn glob_search_finds_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a-2026072814.log");
        fs::write(&target, b"hello\n").unwrap();
        let pattern = dir.path().join("a-2026072814.log");
        let found = glob_search(pattern.to_str().unwrap()).unwrap();
        assert_eq!(found, target);
    }

    #[test]
    fn glob_search_missing_file_is_no_such_file() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("does-not-exist-*.log");
        let err = glob_search(pattern.to_str().unwrap()).unwrap_err();
        assert_eq!(err, GlobError::NoSuchFile);
    }
}
