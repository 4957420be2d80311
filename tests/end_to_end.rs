// End-to-end scenarios against a real temp directory, covering spec.md §8's
// concrete scenarios against the full Config -> Ftail::new -> Ftail::run
// path. Short periods/delays stand in for the spec's illustrative 1m/1h
// examples so each test completes in well under a second of wall clock.

use ftail::config::{Config, PathSource};
use ftail::ftail::Ftail;
use ftail::segment;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fixed_config(buf_dir: &Path, path: &Path, period: Duration, delay: Duration) -> Config {
    Config {
        name: "src".into(),
        buf_dir: buf_dir.to_path_buf(),
        period,
        max_head_hash_size: 64,
        source: PathSource::Fixed(path.to_path_buf()),
        delay,
        poll: true,
        notify_interval: Duration::from_millis(30),
        reopen_delay: Duration::from_millis(30),
        log_level: None,
    }
}

/// Decompress and concatenate every record across every segment for `name`
/// under `buf_dir`, in bucket order — both `.fixed` segments and the one
/// `.rec` segment `Ftail::run` always leaves behind on exit (spec.md §4.G
/// "Cancellation"). Lets a test assert on the full record stream without
/// caring which individual bucket a line landed in.
fn all_decompressed_records(buf_dir: &Path, name: &str) -> Vec<u8> {
    let mut segments = segment::list_segments(buf_dir, name, ".fixed").unwrap();
    segments.extend(segment::list_segments(buf_dir, name, ".rec").unwrap());
    segments.sort_by_key(|(bucket, _)| *bucket);

    let mut out = Vec::new();
    for (_, path) in segments {
        out.extend(segment::read_fixed_segment(&path).unwrap());
    }
    out
}

/// Run `f` in the background, wait for `ready`, then cancel and join.
fn run_until(f: Ftail, run_for: Duration) {
    let cancel = Arc::new(AtomicBool::new(false));
    let thread_cancel = Arc::clone(&cancel);
    let join = std::thread::spawn(move || f.run(thread_cancel));
    std::thread::sleep(run_for);
    cancel.store(true, Ordering::Release);
    join.join().unwrap().unwrap();
}

#[test]
fn simple_follow_produces_a_fixed_segment_with_expected_records() {
    let src_dir = tempfile::tempdir().unwrap();
    let buf_dir = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("a.log");
    fs::write(&path, b"x\ny\nz\n").unwrap();

    let config = fixed_config(
        buf_dir.path(),
        &path,
        Duration::from_millis(150),
        Duration::from_millis(50),
    );
    let f = Ftail::new(config).unwrap();
    run_until(f, Duration::from_millis(600));

    // With a 150ms period, several empty buckets roll over over a 600ms
    // run; only the very first one carries the three lines (read in one
    // shot right at startup), the rest decompress to nothing.
    assert_eq!(all_decompressed_records(buf_dir.path(), "src"), b"x\ny\nz\n");
}

#[test]
fn restart_same_file_resumes_at_stored_offset() {
    let src_dir = tempfile::tempdir().unwrap();
    let buf_dir = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("a.log");
    fs::write(&path, b"x\ny\nz\n").unwrap();

    // First run: a period long enough that the bucket is never closed,
    // leaving a ".rec" segment behind when cancelled (spec.md §4.G
    // "Cancellation": the active segment is closed without the fix-rename).
    let config = fixed_config(
        buf_dir.path(),
        &path,
        Duration::from_secs(3600),
        Duration::from_secs(10),
    );
    let f = Ftail::new(config).unwrap();
    run_until(f, Duration::from_millis(300));

    let rec_files = segment::list_segments(buf_dir.path(), "src", ".rec").unwrap();
    assert_eq!(rec_files.len(), 1, "expected an adopted .rec segment, got {rec_files:?}");

    // Append before restart, as scenario 2 describes.
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    use std::io::Write;
    writeln!(file, "w").unwrap();
    drop(file);

    let config2 = fixed_config(
        buf_dir.path(),
        &path,
        Duration::from_secs(3600),
        Duration::from_secs(10),
    );
    let f2 = Ftail::new(config2).unwrap();
    // Head-hash reconciliation must match and resume at offset 6, not re-read
    // "x\ny\nz\n" from the top.
    assert_eq!(f2.position().offset, 6);
    run_until(f2, Duration::from_millis(300));

    let rec_files = segment::list_segments(buf_dir.path(), "src", ".rec").unwrap();
    assert_eq!(rec_files.len(), 1);
    // read_fixed_segment opens read-only via sled::open, which works equally
    // on a still-".rec" store since sled itself doesn't distinguish the
    // extension; only the decompressed content matters here. The adopted
    // segment accumulates across both runs, so only the post-restart line
    // is freshly written as a new record, but the record set now holds it.
    let decompressed = segment::read_fixed_segment(&rec_files[0].1).unwrap();
    assert!(
        decompressed.ends_with(b"w\n"),
        "expected the post-restart line to have been appended, got {decompressed:?}"
    );
}

#[test]
fn truncation_resets_to_offset_zero_on_reopen() {
    let src_dir = tempfile::tempdir().unwrap();
    let buf_dir = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("a.log");
    fs::write(&path, b"aaaaaaaaaaaaaaaaaaaa\n").unwrap();

    let config = fixed_config(
        buf_dir.path(),
        &path,
        Duration::from_millis(150),
        Duration::from_millis(50),
    );
    let f = Ftail::new(config).unwrap();

    let cancel = Arc::new(AtomicBool::new(false));
    let thread_cancel = Arc::clone(&cancel);
    let join = std::thread::spawn(move || f.run(thread_cancel));

    std::thread::sleep(Duration::from_millis(80));
    fs::write(&path, b"z\n").unwrap();
    std::thread::sleep(Duration::from_millis(600));
    cancel.store(true, Ordering::Release);
    join.join().unwrap().unwrap();

    let decompressed = all_decompressed_records(buf_dir.path(), "src");
    assert!(
        decompressed.ends_with(b"z\n"),
        "expected the post-truncation line to survive, got {decompressed:?}"
    );
}

#[test]
fn missing_path_probes_without_erroring_then_tails_once_created() {
    let src_dir = tempfile::tempdir().unwrap();
    let buf_dir = tempfile::tempdir().unwrap();

    let config = Config {
        name: "src".into(),
        buf_dir: buf_dir.path().to_path_buf(),
        period: Duration::from_millis(150),
        max_head_hash_size: 64,
        source: PathSource::Templated {
            path_fmt: src_dir.path().join("a-%Y%m%d%H.log").to_string_lossy().into_owned(),
            rotate_period: Duration::from_secs(3600),
        },
        delay: Duration::from_millis(50),
        poll: true,
        notify_interval: Duration::from_millis(30),
        reopen_delay: Duration::from_millis(30),
        log_level: None,
    };

    // No file exists yet: construction must not fail (spec.md §8 scenario 5).
    let f = Ftail::new(config).unwrap();
    assert_eq!(f.position().offset, 0);

    let cancel = Arc::new(AtomicBool::new(false));
    let thread_cancel = Arc::clone(&cancel);
    let join = std::thread::spawn(move || f.run(thread_cancel));

    std::thread::sleep(Duration::from_millis(100));
    let now = chrono::Utc::now();
    let path = src_dir.path().join(format!("a-{}.log", now.format("%Y%m%d%H")));
    fs::write(&path, b"hello\n").unwrap();

    // The glob-probe loop only re-checks for a matching path once per
    // second (tailex::GLOB_LOOP_INTERVAL); give it enough wall-clock room to
    // notice the file, tail it, and let at least one bucket close.
    std::thread::sleep(Duration::from_millis(2500));
    cancel.store(true, Ordering::Release);
    join.join().unwrap().unwrap();

    assert_eq!(all_decompressed_records(buf_dir.path(), "src"), b"hello\n");
}
