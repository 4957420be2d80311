// ftail - tail.rs
//
// 4.C Line Reader (Tail): wraps one file and emits a lazy sequence of line
// events over a channel, driven by the state machine in spec.md §4.C.
//
// Runs as its own background thread (the "task" spec.md §5 describes) that
// owns a `ChangeNotifier` + watcher pair and pushes `LineEvent`s to the
// caller. Grounded in `logsleuth::app::tail::run_tail_watcher`'s offset
// bookkeeping (truncation detection, partial-line carry-forward) but
// restructured as the explicit Opening/Reading/WaitingForData/Reopening/
// Closed state machine spec.md names, since `TailEx` (4.D) needs to observe
// and react to state transitions the logsleuth poll loop does not expose.

use crate::notify_chan::{ChangeKind, ChangeNotifier};
use crate::watch::{spawn_watcher, WatchConfig};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

const READ_CHUNK: usize = 64 * 1024;

/// Recognised Tail configuration options (spec.md §4.C).
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Keep reading past EOF, waiting for new data.
    pub follow: bool,
    /// After deletion/rotation, wait and reopen rather than closing.
    pub reopen: bool,
    /// Choose the polling watcher backend instead of native OS events.
    pub poll: bool,
    /// Ticker / poll-watcher period.
    pub notify_interval: Duration,
    /// Wait before a reopen attempt.
    pub reopen_delay: Duration,
    /// Optional starting byte offset for the very first open.
    pub location: Option<u64>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            follow: true,
            reopen: true,
            poll: false,
            notify_interval: Duration::from_secs(1),
            reopen_delay: Duration::from_secs(5),
            location: None,
        }
    }
}

/// One emitted event. Mirrors spec.md §4.C's NotifyType table.
#[derive(Debug, Clone)]
pub enum LineEvent {
    NewLine {
        text: Vec<u8>,
        time: DateTime<Utc>,
        filename: PathBuf,
        open_time: DateTime<Utc>,
        /// Byte offset of the next line to read (i.e. after this line).
        offset: u64,
    },
    NewFile {
        filename: PathBuf,
        open_time: DateTime<Utc>,
        offset: u64,
    },
    Ticker {
        time: DateTime<Utc>,
    },
}

impl LineEvent {
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Self::NewLine { time, .. } => *time,
            Self::NewFile { open_time, .. } => *open_time,
            Self::Ticker { time } => *time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opening,
    Reading,
    WaitingForData,
    Reopening,
    Closed,
}

/// Spawn a Tail task over `path`. Returns immediately; events arrive on the
/// returned receiver until the channel is dropped (closed) or `cancel` is
/// set and observed.
pub fn spawn(
    path: PathBuf,
    config: TailConfig,
    cancel: Arc<AtomicBool>,
) -> std::sync::mpsc::Receiver<LineEvent> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || run(path, config, tx, cancel));
    rx
}

fn run(path: PathBuf, config: TailConfig, tx: Sender<LineEvent>, cancel: Arc<AtomicBool>) {
    let notifier = ChangeNotifier::new();
    let read_pos = Arc::new(AtomicU64::new(0));
    let watcher = spawn_watcher(
        path.clone(),
        Arc::clone(&read_pos),
        notifier.handle(),
        WatchConfig {
            poll: config.poll,
            notify_interval: config.notify_interval,
        },
    );

    let mut state = State::Opening;
    let mut file: Option<File> = None;
    let mut committed_offset: u64 = config.location.unwrap_or(0);
    let mut open_time: DateTime<Utc> = Utc::now();
    let mut partial: Vec<u8> = Vec::new();
    let mut first_open = true;

    loop {
        if cancel.load(Ordering::Acquire) {
            state = State::Closed;
        }

        if let Some(e) = watcher.try_recv_error() {
            tracing::error!(path = %path.display(), error = %e, "tail: watch backend reported a fatal failure, closing");
            state = State::Closed;
        }

        match state {
            State::Opening => {
                let seek_to = if first_open {
                    first_open = false;
                    committed_offset
                } else {
                    0
                };
                match open_at(&path, seek_to) {
                    Ok((f, mtime)) => {
                        file = Some(f);
                        open_time = mtime;
                        committed_offset = seek_to;
                        read_pos.store(seek_to, Ordering::Release);
                        partial.clear();
                        if tx
                            .send(LineEvent::NewFile {
                                filename: path.clone(),
                                open_time,
                                offset: seek_to,
                            })
                            .is_err()
                        {
                            state = State::Closed;
                            continue;
                        }
                        state = State::Reading;
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "tail: open failed");
                        if config.reopen {
                            if sleep_cancelable(config.reopen_delay, &cancel) {
                                state = State::Closed;
                            }
                            // stay Opening, retry
                        } else {
                            state = State::Closed;
                        }
                    }
                }
            }

            State::Reading => {
                let f = file.as_mut().expect("Reading state always has an open file");
                let mut buf = vec![0u8; READ_CHUNK];
                match f.read(&mut buf) {
                    Ok(0) => {
                        state = if config.follow {
                            State::WaitingForData
                        } else {
                            State::Closed
                        };
                    }
                    Ok(n) => {
                        partial.extend_from_slice(&buf[..n]);
                        let (new_offset, disconnected) =
                            emit_complete_lines(&mut partial, committed_offset, &path, open_time, &tx);
                        committed_offset = new_offset;
                        read_pos.store(committed_offset + partial.len() as u64, Ordering::Release);
                        if disconnected {
                            state = State::Closed;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "tail: read error");
                        state = State::Reopening;
                    }
                }
            }

            State::WaitingForData => match notifier.wait(config.notify_interval) {
                Some(ChangeKind::Modified) => state = State::Reading,
                Some(ChangeKind::Rotated) => state = State::Reopening,
                None => {
                    if notifier.is_closed() {
                        state = State::Closed;
                    } else if tx.send(LineEvent::Ticker { time: Utc::now() }).is_err() {
                        state = State::Closed;
                    }
                }
            },

            State::Reopening => {
                // Partial trailing line is discarded on reopen (spec.md §4.C
                // tie-break rule).
                partial.clear();
                file = None;
                if sleep_cancelable(config.reopen_delay, &cancel) {
                    state = State::Closed;
                } else if config.reopen {
                    state = State::Opening;
                } else {
                    state = State::Closed;
                }
            }

            State::Closed => break,
        }
    }

    notifier.close();
    watcher.stop();
    watcher.join();
    tracing::debug!(path = %path.display(), "tail: closed");
}

fn open_at(path: &Path, offset: u64) -> std::io::Result<(File, DateTime<Utc>)> {
    let mut f = File::open(path)?;
    let meta = f.metadata()?;
    let mtime: DateTime<Utc> = meta.modified()?.into();
    f.seek(SeekFrom::Start(offset))?;
    Ok((f, mtime))
}

/// Split `buf` at each newline, emitting a `NewLine` event for each complete
/// line found and leaving the remainder (a possibly-empty in-progress line)
/// in `buf`. Returns the updated committed offset and whether the receiver
/// has disconnected.
fn emit_complete_lines(
    buf: &mut Vec<u8>,
    mut committed_offset: u64,
    path: &Path,
    open_time: DateTime<Utc>,
    tx: &Sender<LineEvent>,
) -> (u64, bool) {
    let mut start = 0usize;
    let mut line_start = 0usize;
    let mut disconnected = false;
    while let Some(rel_nl) = buf[start..].iter().position(|&b| b == b'\n') {
        let nl = start + rel_nl;
        let line = buf[line_start..=nl].to_vec();
        committed_offset += line.len() as u64;
        if tx
            .send(LineEvent::NewLine {
                text: line,
                time: Utc::now(),
                filename: path.to_path_buf(),
                open_time,
                offset: committed_offset,
            })
            .is_err()
        {
            disconnected = true;
        }
        start = nl + 1;
        line_start = start;
    }
    buf.drain(0..line_start);
    (committed_offset, disconnected)
}

fn sleep_cancelable(duration: Duration, cancel: &Arc<AtomicBool>) -> bool {
    const SLICE: Duration = Duration::from_millis(100);
    let iters = (duration.as_millis() / SLICE.as_millis()).max(1);
    for _ in 0..iters {
        if cancel.load(Ordering::Acquire) {
            return true;
        }
        std::thread::sleep(SLICE);
    }
    cancel.load(Ordering::Acquire)
}
