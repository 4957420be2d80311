// ftail - recorder.rs
//
// 4.F Recorder: the set of segment DBs for one logical source, keyed by
// bucket start time. Grounded in the bucket bookkeeping implicit in
// `examples/original_source/in/ftail/ftail.go`'s `f.rec.CreateDB` /
// `f.rec.CloseOldDbs` call sites, which this module turns into an explicit
// in-memory map rather than the single-`*DB`-per-Recorder shape the Go
// original's `core` package hints at — spec.md §4.F is explicit that a
// recorder owns a *set*.

use crate::error::{FtailError, RecorderError, Result};
use crate::segment::{self, Position, Record, SegmentDb};
use crate::util::constants::{FIXED_EXT, REC_EXT};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub struct Recorder {
    buf_dir: PathBuf,
    name: String,
    period: Duration,
    /// Grace window added to `period` in `close_old_dbs`. Not part of
    /// spec.md's `new(bufDir, name, period)` constructor signature — set
    /// separately via `set_delay` once the orchestrator has resolved
    /// `Config.delay` (see DESIGN.md).
    delay: Duration,
    segments: BTreeMap<DateTime<Utc>, SegmentDb>,
    position: Option<Position>,
}

impl Recorder {
    /// Scan `<bufDir>/<name>` for an existing `.rec` segment and adopt it.
    /// More than one is a startup error — spec.md §9 picks "fail loudly"
    /// over guessing which segment is authoritative.
    pub fn new(buf_dir: PathBuf, name: String, period: Duration) -> Result<Self> {
        let found = segment::list_segments(&buf_dir, &name, REC_EXT)?;
        if found.len() > 1 {
            return Err(FtailError::Recorder(RecorderError::MultipleOpenSegments {
                buf_dir,
                found: found.into_iter().map(|(_, p)| p).collect(),
            }));
        }

        let mut segments = BTreeMap::new();
        let mut position = None;
        if let Some((bucket_start, _path)) = found.into_iter().next() {
            let db = SegmentDb::open(&buf_dir, &name, bucket_start, REC_EXT)?;
            position = db.get_position()?;
            tracing::info!(bucket_start = %bucket_start, "recorder: adopted existing .rec segment");
            segments.insert(bucket_start, db);
        }

        Ok(Self {
            buf_dir,
            name,
            period,
            delay: Duration::ZERO,
            segments,
            position,
        })
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// The position adopted at construction time, if any.
    pub fn position(&self) -> Option<Position> {
        self.position.clone()
    }

    /// The bucket start of the currently open (adopted or created) segment,
    /// if any. Lets the orchestrator avoid re-issuing `create_db` for a
    /// bucket a restart already adopted.
    pub fn current_bucket(&self) -> Option<DateTime<Utc>> {
        self.segments.keys().next_back().copied()
    }

    /// Create a new `.rec` segment for `bucket_start`, seeded with `position`,
    /// and mark it current (i.e. the only one `put` will route to until the
    /// next `create_db`).
    pub fn create_db(&mut self, bucket_start: DateTime<Utc>, position: &Position) -> Result<()> {
        let db = SegmentDb::create(&self.buf_dir, &self.name, bucket_start, REC_EXT)?;
        db.seed_position(position)?;
        self.segments.insert(bucket_start, db);
        self.position = Some(position.clone());
        tracing::info!(bucket_start = %bucket_start, "recorder: created new segment");
        Ok(())
    }

    /// Route a record + position write to the current (latest) segment.
    /// A no-op when no segment is open yet — this happens when cancellation
    /// lands before the first `Ticker`/`GlobLoop` ever created one, and is
    /// not an error (spec.md §6/§7: cancellation is not an error).
    pub fn put(&mut self, record: Record, position: &Position) -> Result<()> {
        let Some((_, db)) = self.segments.iter().next_back() else {
            tracing::debug!("recorder: put with no open segment, dropping buffered record");
            return Ok(());
        };
        db.put(record, position)?;
        self.position = Some(position.clone());
        Ok(())
    }

    /// Close every segment whose grace window (`bucket_start + period + delay`)
    /// has elapsed as of `now`, renaming each to `.fixed`. Idempotent: segments
    /// already closed are simply absent from the map on the next call.
    pub fn close_old_dbs(&mut self, now: DateTime<Utc>) -> Result<()> {
        let grace = chrono::Duration::from_std(self.period + self.delay).unwrap_or_default();
        let cutoff_keys: Vec<DateTime<Utc>> = self
            .segments
            .keys()
            .copied()
            .filter(|bucket_start| *bucket_start + grace <= now)
            .collect();

        for bucket_start in cutoff_keys {
            if let Some(mut db) = self.segments.remove(&bucket_start) {
                db.close(true)?;
            }
        }
        Ok(())
    }

    /// Close every open segment. The most recent one is closed without the
    /// fix-rename, leaving a `.rec` file the next run can adopt.
    pub fn all_close(&mut self) -> Result<()> {
        let latest = self.segments.keys().copied().next_back();
        let keys: Vec<DateTime<Utc>> = self.segments.keys().copied().collect();
        for bucket_start in keys {
            if let Some(mut db) = self.segments.remove(&bucket_start) {
                let fix = Some(bucket_start) != latest;
                db.close(fix)?;
            }
        }
        Ok(())
    }

    pub fn buf_dir(&self) -> &std::path::Path {
        &self.buf_dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// List every finished (`.fixed`) segment for a source — used by downstream
/// shippers or tests inspecting what a recorder has produced so far.
pub fn list_fixed_segments(buf_dir: &std::path::Path, name: &str) -> Result<Vec<PathBuf>> {
    Ok(segment::list_segments(buf_dir, name, FIXED_EXT)?
        .into_iter()
        .map(|(_, path)| path)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, h, m, s).unwrap()
    }

    #[test]
    fn fresh_bufdir_has_no_adopted_position() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::new(dir.path().to_path_buf(), "src".into(), Duration::from_secs(60)).unwrap();
        assert!(rec.position().is_none());
    }

    #[test]
    fn create_put_and_close_old_dbs_fixes_expired_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::new(dir.path().to_path_buf(), "src".into(), Duration::from_secs(60)).unwrap();

        let bucket_start = t(10, 0, 0);
        let pos = Position {
            name: "a.log".into(),
            create_at: bucket_start,
            offset: 10,
            head: vec![],
            head_hash: String::new(),
            hash_length: 0,
        };
        rec.set_delay(Duration::from_secs(10));
        rec.create_db(bucket_start, &pos).unwrap();
        rec.put(
            Record {
                time: bucket_start,
                data: b"data".to_vec(),
            },
            &pos,
        )
        .unwrap();

        // Well past bucket_start + period(60s) + delay(10s).
        rec.close_old_dbs(t(10, 5, 0)).unwrap();

        let fixed = list_fixed_segments(dir.path(), "src").unwrap();
        assert_eq!(fixed.len(), 1);
    }

    #[test]
    fn all_close_leaves_latest_segment_as_rec() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::new(dir.path().to_path_buf(), "src".into(), Duration::from_secs(60)).unwrap();
        let bucket_start = t(10, 0, 0);
        let pos = Position::default();
        rec.create_db(bucket_start, &pos).unwrap();
        rec.all_close().unwrap();

        let rec_files = segment::list_segments(dir.path(), "src", REC_EXT).unwrap();
        assert_eq!(rec_files.len(), 1);
        let fixed_files = segment::list_segments(dir.path(), "src", FIXED_EXT).unwrap();
        assert!(fixed_files.is_empty());
    }

    #[test]
    fn put_with_no_open_segment_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::new(dir.path().to_path_buf(), "src".into(), Duration::from_secs(60)).unwrap();

        // Cancellation before the first segment is ever created must not
        // turn a clean shutdown's flush into an error.
        rec.put(
            Record {
                time: t(10, 0, 0),
                data: b"data".to_vec(),
            },
            &Position::default(),
        )
        .unwrap();
    }

    #[test]
    fn multiple_existing_rec_segments_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        SegmentDb::create(dir.path(), "src", t(9, 0, 0), REC_EXT).unwrap();
        SegmentDb::create(dir.path(), "src", t(10, 0, 0), REC_EXT).unwrap();

        let result = Recorder::new(dir.path().to_path_buf(), "src".into(), Duration::from_secs(60));
        assert!(matches!(
            result,
            Err(FtailError::Recorder(RecorderError::MultipleOpenSegments { .. }))
        ));
    }
}
