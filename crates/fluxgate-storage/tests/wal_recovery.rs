// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! WAL crash-recovery integration tests.
//!
//! Every test reconstructs the storage purely from the data directory and
//! the persisted cursor file, the way a gateway restart does.

use fluxgate_storage::{EventStorage, FileEventStorage, FileStorageConfig};
use std::path::Path;

fn config(dir: &Path) -> FileStorageConfig {
    FileStorageConfig::new(dir)
        .max_file_count(3)
        .max_records_per_file(10)
        .max_records_between_fsync(1)
        .max_read_records_count(5)
}

fn write_events(storage: &FileEventStorage, range: std::ops::Range<usize>) {
    for i in range {
        assert!(storage.put(format!("event-{i}")), "put event-{i}");
    }
}

fn drain_all(storage: &FileEventStorage) -> Vec<String> {
    let mut all = Vec::new();
    loop {
        let pack = storage.get_event_pack();
        if pack.is_empty() {
            return all;
        }
        all.extend(pack);
        storage.event_pack_processing_done();
    }
}

#[test]
fn test_resume_after_acknowledged_pack() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let storage = FileEventStorage::new(config(dir.path())).expect("open");
        write_events(&storage, 0..10);

        let pack = storage.get_event_pack();
        assert_eq!(pack.len(), 5);
        storage.event_pack_processing_done();
    }

    // Restart: reading resumes at record 5, nothing re-delivered, nothing
    // skipped.
    let storage = FileEventStorage::new(config(dir.path())).expect("reopen");
    assert_eq!(storage.len(), 5);
    let rest = drain_all(&storage);
    let expected: Vec<String> = (5..10).map(|i| format!("event-{i}")).collect();
    assert_eq!(rest, expected);
}

#[test]
fn test_unacknowledged_pack_redelivered_verbatim() {
    let dir = tempfile::tempdir().expect("tempdir");

    let first_pack;
    {
        let storage = FileEventStorage::new(config(dir.path())).expect("open");
        write_events(&storage, 0..5);
        first_pack = storage.get_event_pack();
        assert_eq!(first_pack.len(), 5);
        // Crash before event_pack_processing_done.
    }

    let storage = FileEventStorage::new(config(dir.path())).expect("reopen");
    assert_eq!(storage.get_event_pack(), first_pack);
}

#[test]
fn test_resume_mid_segment_and_across_segments() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let storage = FileEventStorage::new(config(dir.path())).expect("open");
        // 23 records span three segments of 10.
        write_events(&storage, 0..23);

        // Consume 7: cursor ends mid-first-segment.
        let pack = storage.get_event_pack();
        assert_eq!(pack.len(), 5);
        storage.event_pack_processing_done();
        let pack = storage.get_event_pack();
        assert_eq!(pack.len(), 5);
        // Only the first pull was acknowledged; this one was not.
    }

    let storage = FileEventStorage::new(config(dir.path())).expect("reopen");
    assert_eq!(storage.len(), 18);
    let rest = drain_all(&storage);
    let expected: Vec<String> = (5..23).map(|i| format!("event-{i}")).collect();
    assert_eq!(rest, expected);
}

#[test]
fn test_disk_bounded_by_file_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = FileEventStorage::new(config(dir.path())).expect("open");

    // 3 files x 10 records fit; going to 45 evicts the oldest segments.
    write_events(&storage, 0..45);

    let data_files: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("data_"))
        .collect();
    assert_eq!(data_files.len(), 3);

    // Oldest surviving record is the first of the oldest surviving segment.
    let all = drain_all(&storage);
    assert_eq!(all.first().map(String::as_str), Some("event-20"));
    assert_eq!(all.last().map(String::as_str), Some("event-44"));
}

#[test]
fn test_eviction_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let storage = FileEventStorage::new(config(dir.path())).expect("open");
        write_events(&storage, 0..45);
    }

    let storage = FileEventStorage::new(config(dir.path())).expect("reopen");
    let all = drain_all(&storage);
    assert_eq!(all.len(), 25);
    assert_eq!(all.first().map(String::as_str), Some("event-20"));
}

#[test]
fn test_write_read_ack_interleaved_across_restarts() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let storage = FileEventStorage::new(config(dir.path())).expect("open");
        write_events(&storage, 0..3);
        let pack = storage.get_event_pack();
        assert_eq!(pack.len(), 3);
        storage.event_pack_processing_done();
        write_events(&storage, 3..6);
    }
    {
        let storage = FileEventStorage::new(config(dir.path())).expect("reopen");
        assert_eq!(
            storage.get_event_pack(),
            vec![
                "event-3".to_string(),
                "event-4".to_string(),
                "event-5".to_string()
            ]
        );
        storage.event_pack_processing_done();
        write_events(&storage, 6..7);
    }

    let storage = FileEventStorage::new(config(dir.path())).expect("reopen again");
    assert_eq!(storage.get_event_pack(), vec!["event-6".to_string()]);
}
