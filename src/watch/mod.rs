// ftail - watch/mod.rs
//
// 4.B File Watcher: produces `Modified`/`Rotated` events on a `ChangeNotifier`
// for one watched path. Two interchangeable backends — polling (`poll.rs`)
// and native OS events (`events.rs`) — share the same file-identity
// classification logic defined here, so both backends observe exactly the
// same Modified/Rotated contract regardless of how they noticed the change.
//
// The backend choice (`poll: bool`, spec.md §4.B / §6) is resolved by the
// caller (`Tail`); this module just exposes `spawn_watcher` as the single
// entry point.

mod events;
mod poll;

use crate::error::WatchError;
use crate::notify_chan::{ChangeKind, NotifierHandle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// Tuning shared by both watcher backends.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Use the polling backend instead of native OS filesystem events.
    pub poll: bool,
    /// Stat interval for the polling backend.
    pub notify_interval: Duration,
}

/// A running watcher task. Dropping this does not stop the thread — call
/// `stop()` (or let the shared `cancel` flag be set by the owning `Tail`)
/// and then `join()`.
pub struct WatcherHandle {
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    errors: Receiver<WatchError>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn join(mut self) {
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Non-blocking check for a fatal backend failure (spec.md §7
    /// "Watch-backend failure ... if reopen fails repeatedly, surface as
    /// fatal"). Returns `None` once the backend thread exits, whether
    /// cleanly or not.
    pub fn try_recv_error(&self) -> Option<WatchError> {
        self.errors.try_recv().ok()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start watching `path` for `Modified`/`Rotated` changes, publishing via
/// `handle`. `offset` is the byte offset `Tail` has consumed so far — the
/// watcher needs it to detect truncation ("size decreases below current
/// offset", spec.md §4.B).
///
/// Closes `handle`'s notifier's channels are *not* touched here; only
/// cancellation stops the thread, matching spec.md §5 ("the watcher
/// terminates on external cancellation; on termination it closes the
/// notifier" — closing is the caller's responsibility once every watcher
/// feeding that notifier has stopped).
pub fn spawn_watcher(
    path: PathBuf,
    offset: Arc<AtomicU64>,
    handle: NotifierHandle,
    config: WatchConfig,
) -> WatcherHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let thread_cancel = Arc::clone(&cancel);
    let (err_tx, err_rx) = mpsc::channel();

    let join = std::thread::spawn(move || {
        if config.poll {
            poll::run(path, offset, handle, config.notify_interval, thread_cancel);
        } else {
            events::run(path, offset, handle, thread_cancel, err_tx);
        }
    });

    WatcherHandle {
        cancel,
        join: Some(join),
        errors: err_rx,
    }
}

/// A snapshot of the bits of file identity the watcher cares about: enough
/// to distinguish "grew in place" (Modified) from "became a different file"
/// or "shrank below what we've already read" (Rotated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct FileIdentity {
    pub ino: Option<u64>,
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

pub(super) fn snapshot(path: &Path) -> io::Result<FileIdentity> {
    let meta = std::fs::metadata(path)?;
    Ok(FileIdentity {
        ino: unix_ino(&meta),
        size: meta.len(),
        mtime: meta.modified().ok(),
    })
}

#[cfg(unix)]
fn unix_ino(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn unix_ino(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Classify the transition from `prev` to the current stat result against
/// `offset`, the byte count already consumed. `None` means "nothing worth
/// notifying about". `prev == None` (first observation) never fires — a
/// watcher only reports *changes*, not the initial state.
pub(super) fn classify(
    prev: Option<FileIdentity>,
    current: io::Result<FileIdentity>,
    offset: u64,
) -> (Option<ChangeKind>, Option<FileIdentity>) {
    let prev = match prev {
        Some(p) => p,
        None => {
            return (
                None,
                current.ok(),
            )
        }
    };

    let cur = match current {
        Ok(cur) => cur,
        // The file vanished (deletion, or rename mid-rotation). Folded into
        // Rotated per spec.md §9's open question.
        Err(_) => return (Some(ChangeKind::Rotated), None),
    };

    if let (Some(prev_ino), Some(cur_ino)) = (prev.ino, cur.ino) {
        if prev_ino != cur_ino {
            return (Some(ChangeKind::Rotated), Some(cur));
        }
    }

    if cur.size < offset {
        return (Some(ChangeKind::Rotated), Some(cur));
    }

    if cur.size > prev.size || cur.mtime > prev.mtime {
        return (Some(ChangeKind::Modified), Some(cur));
    }

    (None, Some(cur))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ino: Option<u64>, size: u64) -> FileIdentity {
        FileIdentity {
            ino,
            size,
            mtime: None,
        }
    }

    #[test]
    fn first_observation_never_fires() {
        let (kind, _) = classify(None, Ok(id(Some(1), 0)), 0);
        assert_eq!(kind, None);
    }

    #[test]
    fn growth_is_modified() {
        let (kind, _) = classify(Some(id(Some(1), 10)), Ok(id(Some(1), 20)), 10);
        assert_eq!(kind, Some(ChangeKind::Modified));
    }

    #[test]
    fn inode_change_is_rotated() {
        let (kind, _) = classify(Some(id(Some(1), 10)), Ok(id(Some(2), 10)), 10);
        assert_eq!(kind, Some(ChangeKind::Rotated));
    }

    #[test]
    fn shrink_below_offset_is_rotated() {
        let (kind, _) = classify(Some(id(Some(1), 100)), Ok(id(Some(1), 5)), 50);
        assert_eq!(kind, Some(ChangeKind::Rotated));
    }

    #[test]
    fn disappearance_is_rotated() {
        let (kind, next) = classify(
            Some(id(Some(1), 10)),
            Err(io::Error::from(io::ErrorKind::NotFound)),
            10,
        );
        assert_eq!(kind, Some(ChangeKind::Rotated));
        assert_eq!(next, None);
    }

    #[test]
    fn unchanged_fires_nothing() {
        let prev = id(Some(1), 10);
        let (kind, _) = classify(Some(prev), Ok(prev), 10);
        assert_eq!(kind, None);
    }
}
