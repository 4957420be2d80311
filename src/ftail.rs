// ftail - ftail.rs
//
// 4.G Ftail Orchestrator: the top of the core. Owns the recorder, the
// in-flight compression buffer, and the head-hash fingerprint; consumes line
// events from Tail/TailEx and turns them into durable segment writes.
//
// Grounded in `examples/original_source/in/ftail/ftail.go`'s `Ftail` struct
// and `Start`/`lineNotifyAction`/`Write`/`Flush`/`getHeadHash` methods, kept
// nearly line-for-line in control flow but restructured around this crate's
// `Result`/`tracing` idiom instead of `log.Fatalln` + bare `error`.

use crate::config::{Config, PathSource};
use crate::error::{FtailError, Result, TailError};
use crate::fnv::Fnv1a64;
use crate::recorder::Recorder;
use crate::segment::{Position, Record};
use crate::tail::{self, LineEvent, TailConfig};
use crate::tailex::{self, truncate, TailExConfig, TailExEvent};
use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

/// How often the event loop wakes up on its own to re-check the cancellation
/// flag when no event has arrived.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(500);

pub struct Ftail {
    config: Config,
    recorder: Recorder,
    position: Position,
    /// Seek offset the inner tail should start at, resolved once by
    /// head-hash reconciliation at construction time.
    initial_location: Option<u64>,
    last_slice: Option<DateTime<Utc>>,
    last_time: DateTime<Utc>,
    encoder: ZlibEncoder<Vec<u8>>,
    dirty: bool,
    head_hash: Fnv1a64,
}

impl Ftail {
    /// Build the orchestrator: construct the recorder, resolve the starting
    /// position (recorder → probe → synthesize), and run head-hash
    /// reconciliation (spec.md §4.G steps 1-4).
    pub fn new(config: Config) -> Result<Self> {
        let mut recorder = Recorder::new(config.buf_dir.clone(), config.name.clone(), config.period)?;
        recorder.set_delay(config.delay);

        let mut position = match recorder.position() {
            Some(p) => p,
            None => probe_position(&config)?,
        };

        let initial_location = reconcile_head_hash(&config, &mut position)?;
        // A restart that adopted an existing `.rec` segment already has a
        // current bucket open; seed `last_slice` from it so the first tick
        // doesn't try to re-create (and thus re-open) that same segment.
        let last_slice = recorder.current_bucket();

        Ok(Self {
            config,
            recorder,
            position,
            initial_location,
            last_slice,
            last_time: Utc::now(),
            encoder: ZlibEncoder::new(Vec::new(), Compression::best()),
            dirty: false,
            head_hash: Fnv1a64::new(),
        })
    }

    /// Run the event loop until `cancel` is observed. On exit, flushes the
    /// in-flight buffer and closes every open segment (the active one
    /// without the fix-rename), guaranteeing the `.rec` tail is intact for
    /// the next restart (spec.md §4.G "Cancellation").
    pub fn run(mut self, cancel: Arc<AtomicBool>) -> Result<()> {
        let result = match self.config.source.clone() {
            PathSource::Fixed(path) => self.run_fixed(path, cancel),
            PathSource::Templated { path_fmt, rotate_period } => {
                self.run_templated(path_fmt, rotate_period, cancel)
            }
        };

        let flush_result = self.flush();
        let close_result = self.recorder.all_close();
        result.and(flush_result).and(close_result)
    }

    /// The current resume position — the file being followed, the last
    /// committed byte offset, and the head-hash fingerprint used to
    /// recognise it across restarts. Exposed for status reporting and
    /// integration tests; not otherwise consumed outside this module.
    pub fn position(&self) -> &Position {
        &self.position
    }

    fn tail_config(&self) -> TailConfig {
        TailConfig {
            follow: true,
            reopen: true,
            poll: self.config.poll,
            notify_interval: self.config.notify_interval,
            reopen_delay: self.config.reopen_delay,
            location: self.initial_location,
        }
    }

    fn run_fixed(&mut self, path: std::path::PathBuf, cancel: Arc<AtomicBool>) -> Result<()> {
        let child_cancel = Arc::new(AtomicBool::new(false));
        let rx = tail::spawn(path, self.tail_config(), Arc::clone(&child_cancel));

        loop {
            if cancel.load(Ordering::Acquire) {
                child_cancel.store(true, Ordering::Release);
                return Ok(());
            }
            match rx.recv_timeout(CANCEL_CHECK_INTERVAL) {
                Ok(event) => self.handle_line_event(event)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn run_templated(
        &mut self,
        path_fmt: String,
        rotate_period: Duration,
        cancel: Arc<AtomicBool>,
    ) -> Result<()> {
        let child_cancel = Arc::new(AtomicBool::new(false));
        let rx = tailex::spawn(
            TailExConfig {
                path_fmt,
                rotate_period,
                inner: self.tail_config(),
            },
            Arc::clone(&child_cancel),
        );

        loop {
            if cancel.load(Ordering::Acquire) {
                child_cancel.store(true, Ordering::Release);
                return Ok(());
            }
            match rx.recv_timeout(CANCEL_CHECK_INTERVAL) {
                Ok(TailExEvent::Line(event)) => self.handle_line_event(event)?,
                Ok(TailExEvent::GlobLoop { time }) => self.on_tick(time)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn handle_line_event(&mut self, event: LineEvent) -> Result<()> {
        match event {
            LineEvent::NewLine { text, time, offset, .. } => self.on_new_line(text, time, offset),
            LineEvent::NewFile { filename, open_time, offset } => {
                self.on_new_file(&filename, open_time, offset)
            }
            LineEvent::Ticker { time } => self.on_tick(time),
        }
    }

    fn on_new_line(&mut self, text: Vec<u8>, time: DateTime<Utc>, offset: u64) -> Result<()> {
        self.last_time = time;
        self.position.offset = offset;
        if self.position.hash_length < self.config.max_head_hash_size {
            // `offset` is this line's absolute end position in the real
            // file; bytes up to `position.hash_length` were already folded
            // into the head by `on_new_file`'s full-head read (or a prior
            // call here), so only the part of this line past that boundary
            // is new. Without this, a file opened with pre-existing content
            // re-hashes its own head as those lines are replayed.
            let line_start = offset.saturating_sub(text.len() as u64);
            let overlap = self
                .position
                .hash_length
                .saturating_sub(line_start)
                .min(text.len() as u64);
            let fresh = &text[overlap as usize..];
            if !fresh.is_empty() {
                self.add_hash(fresh);
            }
        }
        self.encoder
            .write_all(&text)
            .map_err(|source| FtailError::Io {
                path: std::path::PathBuf::from(&self.position.name),
                operation: "compress line",
                source,
            })?;
        self.dirty = true;
        Ok(())
    }

    fn on_new_file(&mut self, filename: &Path, open_time: DateTime<Utc>, offset: u64) -> Result<()> {
        self.last_time = open_time;
        self.position.name = filename.to_string_lossy().into_owned();
        self.position.create_at = open_time;
        self.position.offset = offset;
        let (hash, length, head) = compute_head_hash(filename, self.config.max_head_hash_size)?;
        // Seed the running hasher with the same head bytes `compute_head_hash`
        // just fingerprinted, so a later `add_hash` continues this state
        // instead of starting from an empty one (mirrors `getHeadHash`'s
        // `TeeReader` into the long-lived hasher in the grounded original).
        self.head_hash = Fnv1a64::new();
        self.head_hash.write(&head);
        self.position.head_hash = hash;
        self.position.hash_length = length;
        self.position.head = head;
        tracing::info!(name = %self.position.name, offset, "ftail: new file opened");
        Ok(())
    }

    fn on_tick(&mut self, time: DateTime<Utc>) -> Result<()> {
        // The current bucket's segment must exist before `flush` can route a
        // `put` to it — this matters on the very first tick, when no segment
        // has been created yet.
        let bucket = truncate(time, self.config.period);
        if self.last_slice.map_or(true, |last| last < bucket) {
            self.recorder.create_db(bucket, &self.position)?;
            self.last_slice = Some(bucket);
        }
        self.flush()?;
        self.recorder.close_old_dbs(time)?;
        Ok(())
    }

    fn add_hash(&mut self, line: &[u8]) {
        let rest = self.config.max_head_hash_size - self.position.hash_length;
        let slice = if (line.len() as u64) >= rest {
            &line[0..rest as usize]
        } else {
            line
        };
        self.head_hash.write(slice);
        self.position.head.extend_from_slice(slice);
        self.position.head_hash = self.head_hash.finish_hex();
        self.position.hash_length += slice.len() as u64;
    }

    /// Close the active zlib stream, persist it with the current position,
    /// then reset for the next batch. A no-op on an empty buffer.
    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let finished = std::mem::replace(&mut self.encoder, ZlibEncoder::new(Vec::new(), Compression::best()));
        let compressed = finished.finish().map_err(|source| FtailError::Io {
            path: std::path::PathBuf::from(&self.position.name),
            operation: "finish zlib stream",
            source,
        })?;
        self.recorder.put(
            Record {
                time: self.last_time,
                data: compressed,
            },
            &self.position,
        )?;
        self.dirty = false;
        Ok(())
    }
}

/// Recorder has no position; probe the real file directly and synthesize an
/// initial `Position` with offset 0 (spec.md §4.G step 2).
fn probe_position(config: &Config) -> Result<Position> {
    match &config.source {
        PathSource::Fixed(path) => {
            let meta = std::fs::metadata(path).map_err(|source| FtailError::Io {
                path: path.clone(),
                operation: "stat initial path",
                source,
            })?;
            let create_at: DateTime<Utc> = meta.modified().map_err(|source| FtailError::Io {
                path: path.clone(),
                operation: "read mtime",
                source,
            })?.into();
            Ok(Position {
                name: path.to_string_lossy().into_owned(),
                create_at,
                offset: 0,
                head: Vec::new(),
                head_hash: String::new(),
                hash_length: 0,
            })
        }
        PathSource::Templated { path_fmt, rotate_period } => {
            match tailex::resolve_current_path(path_fmt, *rotate_period) {
                Ok(resolved) => {
                    let meta = std::fs::metadata(&resolved).map_err(|source| FtailError::Io {
                        path: resolved.clone(),
                        operation: "stat resolved path",
                        source,
                    })?;
                    let create_at: DateTime<Utc> = meta.modified().map_err(|source| FtailError::Io {
                        path: resolved.clone(),
                        operation: "read mtime",
                        source,
                    })?.into();
                    Ok(Position {
                        name: resolved.to_string_lossy().into_owned(),
                        create_at,
                        offset: 0,
                        head: Vec::new(),
                        head_hash: String::new(),
                        hash_length: 0,
                    })
                }
                Err(_) => {
                    tracing::info!(pattern = %path_fmt, "ftail: no file matches pattern yet at startup");
                    Ok(Position::default())
                }
            }
        }
    }
}

/// Recompute the head-hash over up to `max_len` bytes of `path` in one shot.
/// Reads only the head window, not the whole file — this runs on every
/// `NewFile`/reconciliation and the files being tailed can be arbitrarily
/// large (mirrors `getHeadHash`'s `io.LimitReader(readFile, getLength)`).
fn compute_head_hash(path: &Path, max_len: u64) -> Result<(String, u64, Vec<u8>)> {
    if max_len == 0 {
        return Ok((String::new(), 0, Vec::new()));
    }
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((String::new(), 0, Vec::new())),
        Err(source) => {
            return Err(FtailError::Tail(TailError::Read {
                path: path.to_path_buf(),
                source,
            }))
        }
    };
    let mut head = Vec::new();
    file.by_ref().take(max_len).read_to_end(&mut head).map_err(|source| {
        FtailError::Tail(TailError::Read {
            path: path.to_path_buf(),
            source,
        })
    })?;
    let hash = crate::fnv::hash_hex(&head);
    let length = head.len() as u64;
    Ok((hash, length, head))
}

/// Head-hash reconciliation (spec.md §4.G steps 3-4). Returns the seek
/// offset the inner tail should start at, if any, mutating `position` in
/// place when a mismatch forces a fresh fingerprint.
fn reconcile_head_hash(config: &Config, position: &mut Position) -> Result<Option<u64>> {
    if config.max_head_hash_size > 0 && !position.name.is_empty() {
        // Capped at the previously stored `hash_length`, not `max_head_hash_size`:
        // this checks whether the file's previously-fingerprinted prefix is
        // still intact, regardless of how much the file has grown since (the
        // next `NewFile` recomputes the head up to the full configured cap).
        let (hash, length, head) = compute_head_hash(Path::new(&position.name), position.hash_length)?;
        if hash == position.head_hash && length == position.hash_length {
            tracing::info!(name = %position.name, "ftail: head-hash matches, resuming at stored offset");
            Ok(Some(position.offset))
        } else {
            tracing::info!(name = %position.name, "ftail: head-hash mismatch, treating as a different file");
            position.head_hash = hash;
            position.hash_length = length;
            position.head = head;
            position.offset = 0;
            Ok(None)
        }
    } else if config.max_head_hash_size == 0 {
        let rotate_period = match &config.source {
            PathSource::Templated { rotate_period, .. } => *rotate_period,
            PathSource::Fixed(_) => config.period,
        };
        let pos_bucket = truncate(position.create_at, rotate_period);
        let now_bucket = truncate(Utc::now(), rotate_period);
        if pos_bucket == now_bucket {
            Ok(Some(position.offset))
        } else {
            Ok(None)
        }
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathSource;
    use std::time::Duration as StdDuration;

    fn base_config(buf_dir: std::path::PathBuf, source: PathSource) -> Config {
        Config {
            name: "test".into(),
            buf_dir,
            period: StdDuration::from_secs(60),
            max_head_hash_size: 64,
            source,
            delay: StdDuration::from_secs(1),
            poll: true,
            notify_interval: StdDuration::from_millis(50),
            reopen_delay: StdDuration::from_millis(50),
            log_level: None,
        }
    }

    #[test]
    fn reconcile_head_hash_matches_and_keeps_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"hello world\n").unwrap();

        let (hash, length, head) = compute_head_hash(&path, 64).unwrap();
        let mut position = Position {
            name: path.to_string_lossy().into_owned(),
            create_at: Utc::now(),
            offset: 5,
            head,
            head_hash: hash,
            hash_length: length,
        };
        let config = base_config(dir.path().to_path_buf(), PathSource::Fixed(path));
        let location = reconcile_head_hash(&config, &mut position).unwrap();
        assert_eq!(location, Some(5));
    }

    #[test]
    fn reconcile_head_hash_mismatch_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"hello world\n").unwrap();

        let mut position = Position {
            name: path.to_string_lossy().into_owned(),
            create_at: Utc::now(),
            offset: 999,
            head: vec![0, 1, 2],
            head_hash: "deadbeef".into(),
            hash_length: 3,
        };
        let config = base_config(dir.path().to_path_buf(), PathSource::Fixed(path));
        let location = reconcile_head_hash(&config, &mut position).unwrap();
        assert_eq!(location, None);
        assert_eq!(position.offset, 0);
        assert_ne!(position.head_hash, "deadbeef");
    }

    #[test]
    fn replayed_pre_existing_lines_do_not_inflate_the_head_hash() {
        let bufdir = tempfile::tempdir().unwrap();
        let logdir = tempfile::tempdir().unwrap();
        let path = logdir.path().join("a.log");
        std::fs::write(&path, b"x\ny\nz\n").unwrap();

        let config = base_config(bufdir.path().to_path_buf(), PathSource::Fixed(path.clone()));
        let mut f = Ftail::new(config).unwrap();

        // A fresh source starts at offset 0, so `NewFile` fingerprints the
        // whole pre-existing head, then every already-present line arrives
        // as a `NewLine` (the tail replays from the start).
        f.on_new_file(&path, Utc::now(), 0).unwrap();
        assert_eq!(f.position.hash_length, 6);

        f.on_new_line(b"x\n".to_vec(), Utc::now(), 2).unwrap();
        f.on_new_line(b"y\n".to_vec(), Utc::now(), 4).unwrap();
        f.on_new_line(b"z\n".to_vec(), Utc::now(), 6).unwrap();

        assert_eq!(
            f.position.hash_length, 6,
            "replaying lines already covered by the NewFile snapshot must not grow hash_length"
        );
        let (hash, length, _) = compute_head_hash(&path, 64).unwrap();
        assert_eq!(length, 6);
        assert_eq!(f.position.head_hash, hash);

        // A genuinely new line past the snapshot does extend the head.
        std::fs::write(&path, b"x\ny\nz\nw\n").unwrap();
        f.on_new_line(b"w\n".to_vec(), Utc::now(), 8).unwrap();
        assert_eq!(f.position.hash_length, 8);
    }

    #[test]
    fn ftail_new_probes_fresh_file_when_recorder_has_no_position() {
        let dir = tempfile::tempdir().unwrap();
        let logdir = tempfile::tempdir().unwrap();
        let path = logdir.path().join("a.log");
        std::fs::write(&path, b"line one\n").unwrap();

        let config = base_config(dir.path().to_path_buf(), PathSource::Fixed(path));
        let f = Ftail::new(config).unwrap();
        assert_eq!(f.position.offset, 0);
    }
}
