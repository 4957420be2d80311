// ftail - segment.rs
//
// 4.E Segment DB: one embedded key/value store per time bucket, holding two
// trees — `records` (ordered log chunks) and `position` (single-entry resume
// point). Grounded in `examples/original_source/core/db.go`'s bolt-backed
// `DB` (two buckets, `.rec` → `.fixed` rename on close, idempotent double
// close) mapped onto `sled`, the nearest embedded ordered KV store in the
// example pack (pulled in via `clockworklabs-SpacetimeDB`'s Cargo.toml).
//
// `put` uses a cross-tree `sled` transaction so a crash mid-write can never
// leave the record and position trees disagreeing (spec.md §4.E invariant).

use crate::error::{FtailError, Result, SegmentError};
use crate::util::constants::{FIXED_EXT, POSITION_KEY, POSITION_TREE, RECORDS_TREE, REC_EXT};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::path::{Path, PathBuf};

/// A compressed chunk written to the active segment. `data` is already
/// zlib-compressed by the orchestrator; the segment DB stores and retrieves
/// opaque bytes.
#[derive(Debug, Clone)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub data: Vec<u8>,
}

/// The durable resume point: which file, where in it, and its head-hash
/// fingerprint. Serialized as JSON into the `position` tree's single entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub name: String,
    pub create_at: DateTime<Utc>,
    pub offset: u64,
    pub head: Vec<u8>,
    pub head_hash: String,
    pub hash_length: u64,
}

/// One open segment database for bucket `bucket_start`.
pub struct SegmentDb {
    buf_dir: PathBuf,
    name: String,
    bucket_start: DateTime<Utc>,
    db: Option<sled::Db>,
    fix: bool,
}

fn dir_for(buf_dir: &Path, name: &str, bucket_start: DateTime<Utc>) -> PathBuf {
    buf_dir.join(name).join(bucket_start.format("%Y%m%d").to_string())
}

fn file_stem(bucket_start: DateTime<Utc>) -> String {
    bucket_start.format("%H%M%S").to_string()
}

fn file_path(buf_dir: &Path, name: &str, bucket_start: DateTime<Utc>) -> PathBuf {
    dir_for(buf_dir, name, bucket_start).join(file_stem(bucket_start))
}

impl SegmentDb {
    /// Create a brand-new segment file at
    /// `<bufDir>/<name>/YYYYMMDD/HHMMSS<ext>`, with the `records` and
    /// `position` trees ready to use.
    pub fn create(buf_dir: &Path, name: &str, bucket_start: DateTime<Utc>, ext: &str) -> Result<Self> {
        let dir = dir_for(buf_dir, name, bucket_start);
        std::fs::create_dir_all(&dir).map_err(|source| SegmentError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let path = file_path(buf_dir, name, bucket_start).with_extension_str(ext);
        let db = sled::open(&path).map_err(|source| SegmentError::StoreOpen {
            path: path.clone(),
            source,
        })?;
        // Touch both trees so an empty segment still has a well-formed
        // on-disk shape.
        db.open_tree(RECORDS_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: path.clone(), source })?;
        db.open_tree(POSITION_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: path.clone(), source })?;
        tracing::info!(path = %path.display(), "segment created");
        Ok(Self {
            buf_dir: buf_dir.to_path_buf(),
            name: name.to_string(),
            bucket_start,
            db: Some(db),
            fix: false,
        })
    }

    /// Open an existing segment file of the given extension.
    pub fn open(buf_dir: &Path, name: &str, bucket_start: DateTime<Utc>, ext: &str) -> Result<Self> {
        let path = file_path(buf_dir, name, bucket_start).with_extension_str(ext);
        let db = sled::open(&path).map_err(|source| SegmentError::StoreOpen {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "segment opened");
        Ok(Self {
            buf_dir: buf_dir.to_path_buf(),
            name: name.to_string(),
            bucket_start,
            db: Some(db),
            fix: false,
        })
    }

    fn db(&self) -> Result<&sled::Db> {
        self.db.as_ref().ok_or(SegmentError::Closed.into())
    }

    /// Atomically write `record` into `records` and overwrite `position`.
    pub fn put(&self, record: Record, position: &Position) -> Result<()> {
        let db = self.db()?;
        let records = db
            .open_tree(RECORDS_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;
        let positions = db
            .open_tree(POSITION_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;

        let key = record_key(record.time);
        let pos_bytes = serde_json::to_vec(position)
            .map_err(|source| SegmentError::PositionEncode { source })?;

        (&records, &positions)
            .transaction(|(records, positions)| {
                records.insert(key.as_slice(), record.data.as_slice())?;
                positions.insert(POSITION_KEY, pos_bytes.as_slice())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(_) => SegmentError::TransactionFailed {
                    path: self.active_path(),
                    reason: "aborted".into(),
                },
                TransactionError::Storage(source) => SegmentError::StoreOpen {
                    path: self.active_path(),
                    source,
                },
            })?;
        Ok(())
    }

    /// Write just the position entry, without touching `records`. Used when
    /// a segment is first created and seeded, before any line has arrived.
    pub fn seed_position(&self, position: &Position) -> Result<()> {
        let db = self.db()?;
        let positions = db
            .open_tree(POSITION_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;
        let pos_bytes = serde_json::to_vec(position)
            .map_err(|source| SegmentError::PositionEncode { source })?;
        positions
            .insert(POSITION_KEY, pos_bytes)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;
        Ok(())
    }

    /// Read the single stored position, if any.
    pub fn get_position(&self) -> Result<Option<Position>> {
        let db = self.db()?;
        let positions = db
            .open_tree(POSITION_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;
        match positions
            .get(POSITION_KEY)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?
        {
            Some(bytes) => {
                let pos = serde_json::from_slice(&bytes)
                    .map_err(|source| SegmentError::PositionDecode { source })?;
                Ok(Some(pos))
            }
            None => Ok(None),
        }
    }

    /// Ordered iteration over every stored record's raw (compressed) bytes.
    pub fn cursor(&self) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let records = db
            .open_tree(RECORDS_TREE)
            .map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;
        let mut out = Vec::new();
        for entry in records.iter() {
            let (_k, v) =
                entry.map_err(|source| SegmentError::StoreOpen { path: self.active_path(), source })?;
            out.push(v.to_vec());
        }
        Ok(out)
    }

    /// Close the underlying store. If `fix`, rename `.rec` to `.fixed`
    /// afterwards. Idempotent: a second call is a no-op.
    pub fn close(&mut self, fix: bool) -> Result<()> {
        if self.db.is_none() {
            return Ok(());
        }
        if fix {
            self.fix = true;
        }
        let db = self.db.take().unwrap();
        db.flush().map_err(|source| SegmentError::StoreOpen {
            path: self.active_path(),
            source,
        })?;
        drop(db);

        if self.fix {
            let from = self.active_path();
            let to = file_path(&self.buf_dir, &self.name, self.bucket_start).with_extension_str(FIXED_EXT);
            if let Err(source) = std::fs::rename(&from, &to) {
                // Non-fatal: the segment is closed either way, but downstream
                // fixed-segment readers won't find it until this is retried.
                tracing::error!(from = %from.display(), to = %to.display(), error = %source, "segment: fix rename failed");
                return Err(SegmentError::FixRename { from, to, source }.into());
            }
            tracing::info!(from = %from.display(), to = %to.display(), "segment closed and fixed");
        } else {
            tracing::info!(path = %self.active_path().display(), "segment closed without fixing");
        }
        Ok(())
    }

    fn active_path(&self) -> PathBuf {
        let ext = if self.fix { FIXED_EXT } else { REC_EXT };
        file_path(&self.buf_dir, &self.name, self.bucket_start).with_extension_str(ext)
    }

    pub fn bucket_start(&self) -> DateTime<Utc> {
        self.bucket_start
    }
}

impl Drop for SegmentDb {
    fn drop(&mut self) {
        if self.db.is_some() {
            let _ = self.close(false);
        }
    }
}

fn record_key(time: DateTime<Utc>) -> [u8; 16] {
    // Big-endian (timestamp_nanos, monotonic counter) so iteration order
    // matches arrival order even when two records share a timestamp.
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut key = [0u8; 16];
    key[0..8].copy_from_slice(&(time.timestamp_nanos_opt().unwrap_or(0) as u64).to_be_bytes());
    key[8..16].copy_from_slice(&COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes());
    key
}

/// Scan `<bufDir>/<name>/*/*<ext>` for segments, returning each one's bucket
/// start time parsed back out of its `YYYYMMDD/HHMMSS` path shape.
pub fn list_segments(buf_dir: &Path, name: &str, ext: &str) -> Result<Vec<(DateTime<Utc>, PathBuf)>> {
    let root = buf_dir.join(name);
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(&root).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|source| SegmentError::Scan {
            path: root.clone(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext.trim_start_matches('.')) {
            continue;
        }
        let day = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if let Some(bucket_start) = parse_bucket(day, stem) {
            out.push((bucket_start, path.to_path_buf()));
        }
    }
    out.sort_by_key(|(t, _)| *t);
    Ok(out)
}

fn parse_bucket(day: &str, stem: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(day, "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(stem, "%H%M%S").ok()?;
    let naive = NaiveDateTime::new(date, time);
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Decompress every record in a closed `.fixed` segment and return the
/// concatenated original bytes, in arrival order. A read-only library
/// counterpart to the reference `catdb` tool from the original
/// implementation: useful for tests and ad-hoc inspection, not a shipped
/// binary (nothing in spec.md names a CLI surface for it).
pub fn read_fixed_segment(path: &Path) -> Result<Vec<u8>> {
    use std::io::Read;
    let db = sled::open(path).map_err(|source| SegmentError::StoreOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let records = db
        .open_tree(RECORDS_TREE)
        .map_err(|source| SegmentError::StoreOpen { path: path.to_path_buf(), source })?;
    let mut out = Vec::new();
    for entry in records.iter() {
        let (_k, v) = entry.map_err(|source| SegmentError::StoreOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let mut decoder = flate2::read::ZlibDecoder::new(&v[..]);
        decoder
            .read_to_end(&mut out)
            .map_err(|source| SegmentError::RecordDecompress { source })?;
    }
    Ok(out)
}

trait WithExtensionStr {
    fn with_extension_str(&self, ext: &str) -> PathBuf;
}

impl WithExtensionStr for PathBuf {
    /// `Path::with_extension` strips everything after the last `.` in the
    /// file stem, which breaks on stems like `143022` that contain no dot
    /// but where we still want a literal suffix (`.rec`, `.fixed`) appended.
    fn with_extension_str(&self, ext: &str) -> PathBuf {
        let mut s = self.clone().into_os_string();
        s.push(ext);
        PathBuf::from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, 14, 30, 0).unwrap()
    }

    #[test]
    fn create_put_reopen_roundtrips_position_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let bucket_start = bucket();
        let mut seg = SegmentDb::create(dir.path(), "test.log", bucket_start, REC_EXT).unwrap();

        let pos = Position {
            name: "a.log".into(),
            create_at: bucket_start,
            offset: 42,
            head: vec![1, 2, 3],
            head_hash: "abc123".into(),
            hash_length: 3,
        };
        seg.put(
            Record {
                time: bucket_start,
                data: b"compressed-bytes".to_vec(),
            },
            &pos,
        )
        .unwrap();

        let got = seg.get_position().unwrap().unwrap();
        assert_eq!(got, pos);

        let records = seg.cursor().unwrap();
        assert_eq!(records, vec![b"compressed-bytes".to_vec()]);

        seg.close(false).unwrap();

        let reopened = SegmentDb::open(dir.path(), "test.log", bucket_start, REC_EXT).unwrap();
        assert_eq!(reopened.get_position().unwrap().unwrap(), got);
    }

    #[test]
    fn close_with_fix_renames_rec_to_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let bucket_start = bucket();
        let mut seg = SegmentDb::create(dir.path(), "test.log", bucket_start, REC_EXT).unwrap();
        seg.close(true).unwrap();

        let rec_path = file_path(dir.path(), "test.log", bucket_start).with_extension_str(REC_EXT);
        let fixed_path = file_path(dir.path(), "test.log", bucket_start).with_extension_str(FIXED_EXT);
        assert!(!rec_path.exists());
        assert!(fixed_path.exists());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = SegmentDb::create(dir.path(), "test.log", bucket(), REC_EXT).unwrap();
        seg.close(true).unwrap();
        assert!(seg.close(true).is_ok());
        assert!(seg.close(false).is_ok());
    }

    #[test]
    fn list_segments_parses_bucket_times_from_path_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = SegmentDb::create(dir.path(), "test.log", bucket(), REC_EXT).unwrap();
        seg.close(true).unwrap();

        let found = list_segments(dir.path(), "test.log", FIXED_EXT).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, bucket());
    }

    #[test]
    fn read_fixed_segment_decompresses_records_in_order() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let bucket_start = bucket();
        let mut seg = SegmentDb::create(dir.path(), "test.log", bucket_start, REC_EXT).unwrap();

        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
        encoder.write_all(b"hello world\n").unwrap();
        let compressed = encoder.finish().unwrap();

        seg.put(
            Record {
                time: bucket_start,
                data: compressed,
            },
            &Position::default(),
        )
        .unwrap();
        seg.close(true).unwrap();

        let fixed_path = file_path(dir.path(), "test.log", bucket_start).with_extension_str(FIXED_EXT);
        let out = read_fixed_segment(&fixed_path).unwrap();
        assert_eq!(out, b"hello world\n");
    }
}
