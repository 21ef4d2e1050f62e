//! End-to-end journal scenarios: concurrent writes, rotation, replay, and
//! commit suppression against a real directory.

use redolog_core::{Config, DataRecord, Journal, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn record(id: i64) -> DataRecord {
    DataRecord::new(
        id,
        vec![("val".into(), Value::text(format!("payload {id}")))],
    )
}

fn drain(journal: &Journal) -> Vec<i64> {
    let mut ids = Vec::new();
    while let Some(record) = journal.load_legacy_buf().unwrap() {
        ids.push(record.id);
    }
    ids
}

fn segment_counts(dir: &Path) -> (usize, usize) {
    let mut buf = 0;
    let mut ids = 0;
    for entry in fs::read_dir(dir).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        let base = name.strip_suffix(".gz").unwrap_or(&name);
        if base.ends_with(".buf") {
            buf += 1;
        } else if base.ends_with(".ids") {
            ids += 1;
        }
    }
    (buf, ids)
}

/// 1000 records, ids 50..999 committed, rotate twice, drain: exactly the 50
/// uncommitted records come back. Runs plain and gzip.
#[test]
fn replay_yields_only_uncommitted_records() {
    for compress in [false, true] {
        let temp = tempdir().unwrap();
        let journal = Arc::new(
            Journal::new(
                Config::new()
                    .buf_dir_path(temp.path())
                    .buf_size_bytes(100)
                    .committed_id_ttl(Duration::from_secs(1))
                    .compress(compress)
                    .name("e2e"),
            )
            .unwrap(),
        );
        journal.start().unwrap();

        let threshold = 50i64;
        for id in 0..1000 {
            journal.write_data(&record(id)).unwrap();
            if id >= threshold {
                journal.write_id(id).unwrap();
            }
        }

        // the newest segment is never replayed, so rotate twice to push
        // everything written above behind the replay horizon
        journal.rotate().unwrap();
        journal.rotate().unwrap();

        assert!(journal.lock_legacy());
        thread::sleep(Duration::from_millis(1500));

        let mut got = drain(&journal);
        got.sort_unstable();
        assert_eq!(
            got,
            (0..threshold).collect::<Vec<_>>(),
            "compress: {compress}"
        );

        if compress {
            let names: Vec<String> = fs::read_dir(temp.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert!(
                names.iter().all(|n| n.ends_with(".gz")),
                "expected only .gz segments, got {names:?}"
            );
        }

        // drain released the lock; a new consumer can start over
        assert!(journal.lock_legacy());
        assert!(journal.unlock_legacy());

        journal.close();
    }
}

#[test]
fn empty_journal_replay_is_immediate_eof() {
    let temp = tempdir().unwrap();
    let journal = Arc::new(
        Journal::new(Config::new().buf_dir_path(temp.path()).name("e2e-empty")).unwrap(),
    );
    journal.start().unwrap();

    assert!(journal.lock_legacy());
    assert!(journal.load_legacy_buf().unwrap().is_none());

    journal.close();
}

/// Rotation while a consumer holds the legacy lock takes the
/// successor-only path: a new current segment appears, the consumer stays
/// locked, and its replay view is unchanged.
#[test]
fn rotate_under_consumer_creates_successor_only() {
    let temp = tempdir().unwrap();
    let journal = Arc::new(
        Journal::new(
            Config::new()
                .buf_dir_path(temp.path())
                .buf_size_bytes(10 * 1024 * 1024)
                .name("e2e-under"),
        )
        .unwrap(),
    );
    journal.start().unwrap();

    journal.write_data(&record(1)).unwrap();
    journal.rotate().unwrap();
    journal.rotate().unwrap();

    assert!(journal.lock_legacy());
    let (buf_before, ids_before) = segment_counts(temp.path());

    journal.rotate().unwrap();

    let (buf_after, ids_after) = segment_counts(temp.path());
    assert_eq!(buf_after, buf_before + 1);
    assert_eq!(ids_after, ids_before + 1);
    assert!(journal.is_legacy_running(), "consumer lock must survive rotation");

    assert_eq!(drain(&journal), vec![1]);
    journal.close();
}

/// Consecutive rotations with no writes leave a valid, non-empty layout
/// and an empty replay.
#[test]
fn idle_rotations_keep_at_least_one_segment_pair() {
    let temp = tempdir().unwrap();
    let journal = Arc::new(
        Journal::new(Config::new().buf_dir_path(temp.path()).name("e2e-idle")).unwrap(),
    );
    journal.start().unwrap();

    journal.rotate().unwrap();
    journal.rotate().unwrap();

    assert!(journal.lock_legacy());
    assert!(drain(&journal).is_empty());

    let (buf, ids) = segment_counts(temp.path());
    assert!(buf >= 1, "need at least one data segment, have {buf}");
    assert!(ids >= 1, "need at least one id segment, have {ids}");

    journal.close();
}

/// The consuming duplicate filter: one suppression per commit, and replay
/// consumes the committed entry for the first on-disk copy.
#[test]
fn commit_suppresses_at_most_one_write() {
    let temp = tempdir().unwrap();
    let journal = Arc::new(
        Journal::new(
            Config::new()
                .buf_dir_path(temp.path())
                .buf_size_bytes(10 * 1024 * 1024)
                .name("e2e-dup"),
        )
        .unwrap(),
    );
    journal.start().unwrap();

    journal.write_data(&record(9)).unwrap();
    journal.write_id(9).unwrap();
    assert_eq!(journal.metrics()["idsSetLen"], 1);

    // first re-issue is suppressed and consumes the set entry
    journal.write_data(&record(9)).unwrap();
    assert_eq!(journal.metrics()["idsSetLen"], 0);

    // second re-issue lands in the segment
    journal.write_data(&record(9)).unwrap();

    journal.rotate().unwrap();
    journal.rotate().unwrap();

    // on disk: two copies of record 9 and one committed id; replay
    // suppresses exactly one copy
    assert!(journal.lock_legacy());
    assert_eq!(drain(&journal), vec![9]);

    journal.close();
}

#[test]
fn committed_ids_expire_after_ttl() {
    let temp = tempdir().unwrap();
    let journal = Arc::new(
        Journal::new(
            Config::new()
                .buf_dir_path(temp.path())
                .committed_id_ttl(Duration::from_millis(200))
                .name("e2e-ttl"),
        )
        .unwrap(),
    );
    journal.start().unwrap();

    journal.write_id(7).unwrap();
    assert_eq!(journal.metrics()["idsSetLen"], 1);

    thread::sleep(Duration::from_millis(600));
    assert_eq!(
        journal.metrics()["idsSetLen"],
        0,
        "sweeper should have evicted the expired id"
    );

    // an expired commit no longer suppresses the write
    journal.write_data(&record(7)).unwrap();
    journal.flush().unwrap();

    journal.close();
}

/// Concurrent producers with a rotation in the middle: every uncommitted
/// record is replayed exactly once.
#[test]
fn concurrent_writers_survive_rotation() {
    let temp = tempdir().unwrap();
    let journal = Arc::new(
        Journal::new(
            Config::new()
                .buf_dir_path(temp.path())
                .buf_size_bytes(4 * 1024)
                .name("e2e-conc"),
        )
        .unwrap(),
    );
    journal.start().unwrap();

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let journal = Arc::clone(&journal);
        handles.push(thread::spawn(move || {
            for i in 0..250 {
                let id = worker * 250 + i;
                journal.write_data(&record(id)).unwrap();
                if id % 2 == 0 {
                    journal.write_id(id).unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    journal.rotate().unwrap();
    journal.rotate().unwrap();

    assert!(journal.lock_legacy());
    let mut got = drain(&journal);
    got.sort_unstable();
    let expected: Vec<i64> = (0..1000).filter(|id| id % 2 != 0).collect();
    assert_eq!(got, expected);

    journal.close();
}
