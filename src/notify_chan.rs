// ftail - notify_chan.rs
//
// 4.A Change Notifier: coalesced, single-slot notification channels.
//
// Grounded in `examples/original_source/watch/filechanges.go`: a send is a
// non-blocking "notify if nobody already knows" — bursts collapse into "there
// is something new", never a backlog. `std::sync::mpsc::sync_channel(1)`
// gives us exactly that discipline: `try_send` on a full channel returns
// `Full`, which we treat as "already notified, nothing to do".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Which single-slot channel fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Rotated,
}

/// A cloneable handle a watcher task uses to publish notifications.
/// Cheap to clone (wraps two `SyncSender`s); many producers may share one
/// notifier.
#[derive(Clone)]
pub struct NotifierHandle {
    modified_tx: SyncSender<()>,
    rotated_tx: SyncSender<()>,
    closed: Arc<AtomicBool>,
}

impl NotifierHandle {
    /// Non-blocking notify: dropped if the channel already carries an
    /// unread value, or if the notifier has been closed.
    pub fn notify_modified(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.modified_tx.try_send(());
    }

    pub fn notify_rotated(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.rotated_tx.try_send(());
    }
}

/// The consumer side: one `Tail` instance subscribes here. Not cloneable —
/// the single-slot discipline only makes sense with one reader per channel.
pub struct ChangeNotifier {
    modified_rx: Receiver<()>,
    rotated_rx: Receiver<()>,
    handle: NotifierHandle,
    closed: Arc<AtomicBool>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (modified_tx, modified_rx) = mpsc::sync_channel(1);
        let (rotated_tx, rotated_rx) = mpsc::sync_channel(1);
        let closed = Arc::new(AtomicBool::new(false));
        let handle = NotifierHandle {
            modified_tx,
            rotated_tx,
            closed: Arc::clone(&closed),
        };
        Self {
            modified_rx,
            rotated_rx,
            handle,
            closed,
        }
    }

    /// A cloneable publisher handle for watcher tasks.
    pub fn handle(&self) -> NotifierHandle {
        self.handle.clone()
    }

    /// Block up to `timeout` for either channel to fire. Returns `None` on
    /// timeout or once the notifier is closed. If both channels have a
    /// pending value, `Rotated` takes priority since it implies a more
    /// disruptive file-identity change than a plain append.
    pub fn wait(&self, timeout: Duration) -> Option<ChangeKind> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        match self.rotated_rx.try_recv() {
            Ok(()) => return Some(ChangeKind::Rotated),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }
        match self.modified_rx.try_recv() {
            Ok(()) => return Some(ChangeKind::Modified),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        // Neither channel had a value ready; block on modified_rx for the
        // timeout, then re-check rotated_rx once more (covers the case where
        // a rotation landed exactly while we were sleeping on `modified`).
        match self.modified_rx.recv_timeout(timeout) {
            Ok(()) => Some(ChangeKind::Modified),
            Err(_) => match self.rotated_rx.try_recv() {
                Ok(()) => Some(ChangeKind::Rotated),
                Err(_) => None,
            },
        }
    }

    /// Close the notifier: every channel stops accepting new notifications
    /// and pending/future `wait()` calls return `None` immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_bursts_into_one_pending_value() {
        let notifier = ChangeNotifier::new();
        let handle = notifier.handle();
        handle.notify_modified();
        handle.notify_modified();
        handle.notify_modified();

        assert_eq!(
            notifier.wait(Duration::from_millis(10)),
            Some(ChangeKind::Modified)
        );
        // The burst collapsed to a single notification; nothing left pending.
        assert_eq!(notifier.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn rotated_takes_priority_over_modified() {
        let notifier = ChangeNotifier::new();
        let handle = notifier.handle();
        handle.notify_modified();
        handle.notify_rotated();

        assert_eq!(
            notifier.wait(Duration::from_millis(10)),
            Some(ChangeKind::Rotated)
        );
        assert_eq!(
            notifier.wait(Duration::from_millis(10)),
            Some(ChangeKind::Modified)
        );
    }

    #[test]
    fn close_makes_wait_and_notify_no_ops() {
        let notifier = ChangeNotifier::new();
        let handle = notifier.handle();
        notifier.close();
        handle.notify_modified();
        assert_eq!(notifier.wait(Duration::from_millis(10)), None);
        assert!(notifier.is_closed());
    }
}
