// ftail - watch/events.rs
//
// Native OS-event watcher backend, grounded in
// `examples/Lowband21-ferrex/ferrex-core/src/scanner/file_watcher.rs`'s use
// of `notify` + `notify_debouncer_full`: a debounced `RecommendedWatcher`
// whose callback forwards raw events into an mpsc channel that the watcher
// thread drains.
//
// We watch the *parent directory* (non-recursively) rather than the file
// itself: cronolog-style rotation replaces the file at the same path with a
// new inode, and some platforms stop delivering events for a path once the
// original inode is unlinked. Watching the directory also catches create
// events for a path that did not exist yet (spec.md §4.D "missing path").
//
// Every batch of directory events just wakes us up to re-stat the watched
// path and run it through the same `classify` used by the polling backend —
// OS events are a wakeup hint, not a source of truth about file identity.

use super::{classify, snapshot, FileIdentity};
use crate::error::WatchError;
use crate::notify_chan::NotifierHandle;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// How many times to retry standing up the native backend before surfacing a
/// fatal `WatchError` (spec.md §7: "if reopen fails repeatedly, surface as
/// fatal").
const INIT_ATTEMPTS: u32 = 3;
const INIT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub(super) fn run(
    path: PathBuf,
    offset: Arc<AtomicU64>,
    handle: NotifierHandle,
    cancel: Arc<AtomicBool>,
    err_tx: Sender<WatchError>,
) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (raw_tx, raw_rx) = mpsc::channel::<()>();

    let mut debouncer = None;
    let mut last_reason = String::new();
    for attempt in 1..=INIT_ATTEMPTS {
        if cancel.load(Ordering::Acquire) {
            return;
        }
        let tx = raw_tx.clone();
        let built = new_debouncer(DEBOUNCE_WINDOW, None, move |result: DebounceEventResult| {
            if result.is_ok() {
                let _ = tx.send(());
            }
        })
        .and_then(|mut d| d.watch(&parent, RecursiveMode::NonRecursive).map(|_| d));

        match built {
            Ok(d) => {
                debouncer = Some(d);
                break;
            }
            Err(e) => {
                last_reason = e.to_string();
                tracing::warn!(path = %parent.display(), attempt, error = %e, "event watcher: backend init failed, retrying");
                if attempt < INIT_ATTEMPTS {
                    std::thread::sleep(INIT_RETRY_DELAY);
                }
            }
        }
    }

    let debouncer = match debouncer {
        Some(d) => d,
        None => {
            let _ = err_tx.send(WatchError::ReopenExhausted {
                path: parent.clone(),
                attempts: INIT_ATTEMPTS,
            });
            tracing::error!(path = %parent.display(), reason = %last_reason, "event watcher: backend init exhausted retries, giving up");
            return;
        }
    };

    tracing::debug!(path = %path.display(), watching_dir = %parent.display(), "event watcher started");

    let mut prev: Option<FileIdentity> = snapshot(&path).ok();

    loop {
        if cancel.load(Ordering::Acquire) {
            tracing::debug!(path = %path.display(), "event watcher cancelled");
            return;
        }

        match raw_rx.recv_timeout(CANCEL_CHECK_INTERVAL) {
            Ok(()) => {
                // Drain any further already-queued wakeups from this batch;
                // we only need to know "something happened", not how many.
                while raw_rx.try_recv().is_ok() {}

                let current = snapshot(&path);
                let off = offset.load(Ordering::Acquire);
                let (kind, next) = classify(prev, current, off);
                prev = next;

                match kind {
                    Some(crate::notify_chan::ChangeKind::Modified) => {
                        tracing::trace!(path = %path.display(), "event watcher: modified");
                        handle.notify_modified();
                    }
                    Some(crate::notify_chan::ChangeKind::Rotated) => {
                        tracing::debug!(path = %path.display(), "event watcher: rotated");
                        handle.notify_rotated();
                    }
                    None => {}
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = err_tx.send(WatchError::BackendFailure {
                    path: path.clone(),
                    reason: "debouncer event channel closed unexpectedly".into(),
                });
                tracing::error!(path = %path.display(), "event watcher: debouncer channel closed unexpectedly");
                return;
            }
        }
    }
}
