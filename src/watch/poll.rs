// ftail - watch/poll.rs
//
// Polling watcher backend: stat the path every `notify_interval` and
// classify the result. Grounded in `logsleuth::app::dir_watcher::run_dir_watcher`
// — same "sleep in small cancel-check sub-intervals, then do the expensive
// work" shape, just statting one file instead of walking a tree.

use super::{classify, snapshot, FileIdentity};
use crate::notify_chan::NotifierHandle;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often the cancel flag is checked within one poll interval.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub(super) fn run(
    path: PathBuf,
    offset: Arc<AtomicU64>,
    handle: NotifierHandle,
    poll_interval: Duration,
    cancel: Arc<AtomicBool>,
) {
    tracing::debug!(path = %path.display(), interval_ms = poll_interval.as_millis(), "poll watcher started");

    let mut prev: Option<FileIdentity> = snapshot(&path).ok();
    let sub_iters = (poll_interval.as_millis() / CANCEL_CHECK_INTERVAL.as_millis()).max(1);

    loop {
        for _ in 0..sub_iters {
            if cancel.load(Ordering::Acquire) {
                tracing::debug!(path = %path.display(), "poll watcher cancelled");
                return;
            }
            std::thread::sleep(CANCEL_CHECK_INTERVAL);
        }
        if cancel.load(Ordering::Acquire) {
            return;
        }

        let current = snapshot(&path);
        let off = offset.load(Ordering::Acquire);
        let (kind, next) = classify(prev, current, off);
        prev = next;

        match kind {
            Some(crate::notify_chan::ChangeKind::Modified) => {
                tracing::trace!(path = %path.display(), "poll watcher: modified");
                handle.notify_modified();
            }
            Some(crate::notify_chan::ChangeKind::Rotated) => {
                tracing::debug!(path = %path.display(), "poll watcher: rotated");
                handle.notify_rotated();
            }
            None => {}
        }
    }
}
