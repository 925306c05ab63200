// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write-ahead-log event storage.
//!
//! Events are base64-encoded (newline-safe framing for arbitrary content)
//! and appended one line per record to the current segment file
//! `data_<createdAtMs>.txt`. Segments rotate by record count; disk usage is
//! bounded by deleting the oldest segment past `max_file_count`. The read
//! cursor `{segment, offset}` of the next unread record is persisted to a
//! state file, so a restart resumes exactly where reading left off: already
//! acknowledged records are never re-delivered, unacknowledged ones are
//! never skipped.

use crate::config::FileStorageConfig;
use crate::storage::{EventStorage, StorageError};
use crate::throttle::LogThrottle;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Name of the persisted read cursor inside the data directory.
const STATE_FILE_NAME: &str = "state_reader.json";

/// Minimum interval between repeated I/O error logs per failure path.
const IO_LOG_INTERVAL: Duration = Duration::from_secs(10);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One segment file and its record count.
#[derive(Debug, Clone)]
struct Segment {
    created_ms: u64,
    file_name: String,
    path: PathBuf,
    records: usize,
}

impl Segment {
    fn file_name_for(created_ms: u64) -> String {
        format!("data_{created_ms}.txt")
    }
}

/// Position of the next unread record: segment file name plus the record
/// index within it. Serialized verbatim into the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReadCursor {
    segment: String,
    offset: usize,
}

struct Inner {
    segments: Vec<Segment>,
    writer: Option<BufWriter<File>>,
    records_since_fsync: usize,
    cursor: ReadCursor,
    pending: Vec<String>,
    pending_next: ReadCursor,
    pending_consumed: usize,
    unread: usize,
    write_throttle: LogThrottle,
    read_throttle: LogThrottle,
}

/// Segment-rotated WAL event storage.
///
/// Accepts every `put` (unbounded acceptance, bounded disk); the oldest
/// segment is evicted once the file count limit is exceeded. Producers may
/// call `put` from any thread; the consumer path assumes a single delivery
/// loop.
pub struct FileEventStorage {
    config: FileStorageConfig,
    inner: Mutex<Inner>,
}

impl FileEventStorage {
    /// Open (or create) the data directory, scan existing segments and
    /// restore the read cursor from the state file.
    pub fn new(config: FileStorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_folder_path)?;

        let mut segments = Self::scan_segments(&config.data_folder_path)?;
        if segments.is_empty() {
            segments.push(Self::create_segment(&config.data_folder_path, &segments)?);
        }

        let oldest = ReadCursor {
            segment: segments[0].file_name.clone(),
            offset: 0,
        };
        let cursor = match Self::load_state(&config.data_folder_path) {
            Some(saved) => match segments.iter().find(|s| s.file_name == saved.segment) {
                Some(seg) => ReadCursor {
                    offset: saved.offset.min(seg.records),
                    segment: saved.segment,
                },
                None => {
                    tracing::warn!(
                        "cursor segment {} no longer exists, resuming from oldest segment",
                        saved.segment
                    );
                    oldest
                }
            },
            None => oldest,
        };

        let unread = Self::recompute_unread(&segments, &cursor);
        tracing::info!(
            "file storage opened at {}: {} segments, {} unread records",
            config.data_folder_path.display(),
            segments.len(),
            unread
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                segments,
                writer: None,
                records_since_fsync: 0,
                pending: Vec::new(),
                pending_next: cursor.clone(),
                pending_consumed: 0,
                cursor,
                unread,
                write_throttle: LogThrottle::new(IO_LOG_INTERVAL),
                read_throttle: LogThrottle::new(IO_LOG_INTERVAL),
            }),
            config,
        })
    }

    /// Flush buffered writes and fsync the current segment.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        if let Some(writer) = inner.writer.as_mut() {
            if let Err(e) = writer.flush().and_then(|()| writer.get_ref().sync_data()) {
                tracing::warn!("segment flush failed: {e}");
            }
        }
        inner.records_since_fsync = 0;
    }

    fn scan_segments(dir: &Path) -> Result<Vec<Segment>, StorageError> {
        let mut found: Vec<Segment> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(created_ms) = file_name
                .strip_prefix("data_")
                .and_then(|rest| rest.strip_suffix(".txt"))
                .and_then(|ts| ts.parse::<u64>().ok())
            else {
                continue;
            };
            let path = entry.path();
            let records = Self::count_records(&path)?;
            found.push(Segment {
                created_ms,
                file_name,
                path,
                records,
            });
        }
        found.sort_by_key(|seg| seg.created_ms);
        Ok(found)
    }

    fn count_records(path: &Path) -> Result<usize, StorageError> {
        let file = File::open(path)?;
        Ok(BufReader::new(file).lines().count())
    }

    fn state_path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE_NAME)
    }

    fn load_state(dir: &Path) -> Option<ReadCursor> {
        let path = Self::state_path(dir);
        if !path.exists() {
            return None;
        }
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ReadCursor>(&bytes) {
                Ok(cursor) => Some(cursor),
                Err(e) => {
                    tracing::warn!("state file unreadable, resuming from oldest segment: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("state file unreadable, resuming from oldest segment: {e}");
                None
            }
        }
    }

    fn persist_state(&self, cursor: &ReadCursor) {
        let path = Self::state_path(&self.config.data_folder_path);
        match serde_json::to_vec(cursor) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&path, bytes) {
                    tracing::warn!("failed to persist read cursor: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to encode read cursor: {e}"),
        }
    }

    /// Create the next segment file. Timestamps are kept strictly
    /// increasing, so rotations within one millisecond stay unique and the
    /// startup scan reconstructs the same order.
    fn create_segment(dir: &Path, existing: &[Segment]) -> Result<Segment, StorageError> {
        let mut created_ms = now_ms();
        if let Some(newest) = existing.last() {
            if created_ms <= newest.created_ms {
                created_ms = newest.created_ms + 1;
            }
        }
        let file_name = Segment::file_name_for(created_ms);
        let path = dir.join(&file_name);
        File::create(&path)?;
        Ok(Segment {
            created_ms,
            file_name,
            path,
            records: 0,
        })
    }

    fn recompute_unread(segments: &[Segment], cursor: &ReadCursor) -> usize {
        let mut unread = 0;
        let mut reached = false;
        for seg in segments {
            if reached {
                unread += seg.records;
            } else if seg.file_name == cursor.segment {
                reached = true;
                unread += seg.records.saturating_sub(cursor.offset);
            }
        }
        if reached {
            unread
        } else {
            segments.iter().map(|s| s.records).sum()
        }
    }

    /// Rotate to a fresh segment, evicting the oldest past the file limit.
    fn rotate(&self, inner: &mut Inner) -> Result<(), StorageError> {
        if let Some(writer) = inner.writer.as_mut() {
            writer.flush()?;
            if let Err(e) = writer.get_ref().sync_data() {
                tracing::warn!("fsync before rotation failed: {e}");
            }
        }
        inner.writer = None;
        inner.records_since_fsync = 0;

        let segment = Self::create_segment(&self.config.data_folder_path, &inner.segments)?;
        tracing::debug!("rotated to segment {}", segment.file_name);
        inner.segments.push(segment);

        while inner.segments.len() > self.config.max_file_count {
            self.evict_oldest(inner);
        }
        Ok(())
    }

    fn evict_oldest(&self, inner: &mut Inner) {
        let seg = inner.segments.remove(0);
        if inner.cursor.segment == seg.file_name {
            let lost = seg.records.saturating_sub(inner.cursor.offset);
            if lost > 0 {
                tracing::warn!(
                    "dropping {} unread records with evicted segment {}",
                    lost,
                    seg.file_name
                );
            }
            // segments is never empty here: eviction runs right after a
            // rotation pushed the replacement segment
            if let Some(next) = inner.segments.first() {
                inner.cursor = ReadCursor {
                    segment: next.file_name.clone(),
                    offset: 0,
                };
            }
        }
        if let Err(e) = fs::remove_file(&seg.path) {
            tracing::warn!("failed to delete evicted segment {}: {e}", seg.file_name);
        }
        inner.unread = Self::recompute_unread(&inner.segments, &inner.cursor);
    }

    fn append_record(&self, inner: &mut Inner, event: &str) -> Result<(), StorageError> {
        let full = inner
            .segments
            .last()
            .is_some_and(|seg| seg.records >= self.config.max_records_per_file);
        if full {
            self.rotate(inner)?;
        }

        if inner.writer.is_none() {
            let newest = inner
                .segments
                .last()
                .ok_or_else(|| StorageError::InvalidState("no segment to append to".into()))?;
            let file = OpenOptions::new().append(true).open(&newest.path)?;
            inner.writer = Some(BufWriter::new(file));
        }

        let mut line = BASE64.encode(event.as_bytes());
        line.push('\n');
        if let Some(writer) = inner.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
        }

        if let Some(newest) = inner.segments.last_mut() {
            newest.records += 1;
        }
        inner.unread += 1;
        inner.records_since_fsync += 1;
        if inner.records_since_fsync >= self.config.max_records_between_fsync {
            if let Some(writer) = inner.writer.as_mut() {
                writer.flush()?;
                if let Err(e) = writer.get_ref().sync_data() {
                    tracing::warn!("fsync failed: {e}");
                }
            }
            inner.records_since_fsync = 0;
        }
        Ok(())
    }

    /// Fill the pending pack from the cursor position onwards.
    fn refill(&self, inner: &mut Inner) {
        // Re-anchor if the cursor's segment was evicted while idle.
        if !inner
            .segments
            .iter()
            .any(|s| s.file_name == inner.cursor.segment)
        {
            let Some(first) = inner.segments.first() else {
                return;
            };
            inner.cursor = ReadCursor {
                segment: first.file_name.clone(),
                offset: 0,
            };
        }
        let Some(start_idx) = inner
            .segments
            .iter()
            .position(|s| s.file_name == inner.cursor.segment)
        else {
            return;
        };

        let max = self.config.max_read_records_count;
        let mut collected = Vec::new();
        let mut seg_idx = start_idx;
        let mut offset = inner.cursor.offset;
        let mut consumed = 0usize;

        loop {
            let seg = &inner.segments[seg_idx];
            let file = match File::open(&seg.path) {
                Ok(f) => f,
                Err(e) => {
                    if let Some(suppressed) = inner.read_throttle.ready() {
                        tracing::error!(
                            "failed to open segment {} ({suppressed} earlier failures suppressed): {e}",
                            seg.file_name
                        );
                    }
                    break;
                }
            };

            let mut lines = BufReader::new(file).lines().skip(offset);
            let mut io_error = false;
            while collected.len() < max {
                match lines.next() {
                    Some(Ok(line)) => {
                        offset += 1;
                        consumed += 1;
                        match BASE64
                            .decode(line.as_bytes())
                            .map_err(|e| e.to_string())
                            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
                        {
                            Ok(event) => collected.push(event),
                            Err(e) => tracing::warn!(
                                "skipping corrupt record in {}: {e}",
                                seg.file_name
                            ),
                        }
                    }
                    Some(Err(e)) => {
                        if let Some(suppressed) = inner.read_throttle.ready() {
                            tracing::error!(
                                "read error in segment {} ({suppressed} earlier failures suppressed): {e}",
                                seg.file_name
                            );
                        }
                        io_error = true;
                        break;
                    }
                    None => break,
                }
            }

            if io_error || collected.len() >= max {
                break;
            }
            // Segment exhausted; continue into the next one if any.
            if seg_idx + 1 < inner.segments.len() {
                seg_idx += 1;
                offset = 0;
            } else {
                break;
            }
        }

        let next = ReadCursor {
            segment: inner.segments[seg_idx].file_name.clone(),
            offset,
        };
        if collected.is_empty() {
            // Nothing deliverable; if corrupt lines were skipped, advance
            // past them now or the reader would rescan them forever.
            if consumed > 0 {
                inner.cursor = next;
                inner.unread = Self::recompute_unread(&inner.segments, &inner.cursor);
                self.persist_state(&inner.cursor);
            }
            return;
        }
        inner.pending = collected;
        inner.pending_next = next;
        inner.pending_consumed = consumed;
    }
}

impl EventStorage for FileEventStorage {
    fn put(&self, event: String) -> bool {
        let mut inner = self.inner.lock();
        match self.append_record(&mut inner, &event) {
            Ok(()) => true,
            Err(e) => {
                // Drop the writer so the next put reopens or recreates the
                // segment instead of reusing a broken handle.
                inner.writer = None;
                if let Some(suppressed) = inner.write_throttle.ready() {
                    tracing::error!(
                        "event write failed ({suppressed} earlier failures suppressed): {e}"
                    );
                }
                false
            }
        }
    }

    fn get_event_pack(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        if !inner.pending.is_empty() {
            return inner.pending.clone();
        }
        // Make buffered writes visible to the reader.
        if let Some(writer) = inner.writer.as_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!("segment flush before read failed: {e}");
            }
        }
        self.refill(&mut inner);
        inner.pending.clone()
    }

    fn event_pack_processing_done(&self) {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            return;
        }
        inner.pending.clear();
        inner.pending_consumed = 0;

        let next = inner.pending_next.clone();
        if inner.segments.iter().any(|s| s.file_name == next.segment) {
            inner.cursor = next;
        } else if let Some(first) = inner.segments.first() {
            // The pack's segment was evicted while the send was in flight;
            // everything older than the remaining segments is gone anyway.
            inner.cursor = ReadCursor {
                segment: first.file_name.clone(),
                offset: 0,
            };
        }
        inner.unread = Self::recompute_unread(&inner.segments, &inner.cursor);
        self.persist_state(&inner.cursor);
    }

    fn len(&self) -> usize {
        self.inner.lock().unread
    }

    fn empty_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.no_records_sleep_interval_ms)
    }

    fn flush(&self) {
        FileEventStorage::flush(self);
    }
}

impl Drop for FileEventStorage {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> FileStorageConfig {
        FileStorageConfig::new(dir)
            .max_file_count(3)
            .max_records_per_file(5)
            .max_records_between_fsync(2)
            .max_read_records_count(10)
    }

    fn segment_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("data_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_put_and_get_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let storage = FileEventStorage::new(test_config(dir.path())).expect("open");

        assert!(storage.put("hello".into()));
        assert!(storage.put("wörld\nwith newline".into()));

        let pack = storage.get_event_pack();
        assert_eq!(
            pack,
            vec!["hello".to_string(), "wörld\nwith newline".to_string()]
        );
    }

    #[test]
    fn test_pack_repeats_until_acknowledged() {
        let dir = tempdir().expect("tempdir");
        let storage = FileEventStorage::new(test_config(dir.path())).expect("open");

        for i in 0..3 {
            assert!(storage.put(format!("event-{i}")));
        }
        let first = storage.get_event_pack();
        let second = storage.get_event_pack();
        assert_eq!(first, second);

        storage.event_pack_processing_done();
        assert!(storage.get_event_pack().is_empty());
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_segment_rotation() {
        let dir = tempdir().expect("tempdir");
        let storage = FileEventStorage::new(test_config(dir.path())).expect("open");

        // 5 records fill the first segment; the 6th lands in a new one.
        for i in 0..6 {
            assert!(storage.put(format!("event-{i}")));
        }
        assert_eq!(segment_files(dir.path()).len(), 2);
        assert_eq!(storage.len(), 6);
    }

    #[test]
    fn test_oldest_segment_evicted_past_file_limit() {
        let dir = tempdir().expect("tempdir");
        let storage = FileEventStorage::new(test_config(dir.path())).expect("open");

        // 3 files x 5 records fit; the 16th record forces a 4th segment and
        // evicts the oldest.
        for i in 0..16 {
            assert!(storage.put(format!("event-{i}")));
        }
        assert_eq!(segment_files(dir.path()).len(), 3);

        // Records 0..5 went with the evicted segment.
        let pack = storage.get_event_pack();
        assert_eq!(pack.first().map(String::as_str), Some("event-5"));
    }

    #[test]
    fn test_reads_cross_segment_boundaries() {
        let dir = tempdir().expect("tempdir");
        let storage = FileEventStorage::new(test_config(dir.path())).expect("open");

        for i in 0..8 {
            assert!(storage.put(format!("event-{i}")));
        }
        // 8 records span two segments; one pack (limit 10) returns them all.
        let pack = storage.get_event_pack();
        assert_eq!(pack.len(), 8);
        assert_eq!(pack[7], "event-7");
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let dir = tempdir().expect("tempdir");
        {
            let storage = FileEventStorage::new(test_config(dir.path())).expect("open");
            assert!(storage.put("good-1".into()));
        }

        // Append garbage that is not valid base64.
        let segment = segment_files(dir.path()).remove(0);
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(segment))
            .expect("open segment");
        file.write_all(b"!!not-base64!!\n").expect("write");
        drop(file);

        let storage = FileEventStorage::new(test_config(dir.path())).expect("reopen");
        assert!(storage.put("good-2".into()));

        let pack = storage.get_event_pack();
        assert_eq!(pack, vec!["good-1".to_string(), "good-2".to_string()]);
    }

    #[test]
    fn test_cursor_survives_restart() {
        let dir = tempdir().expect("tempdir");
        {
            let storage = FileEventStorage::new(test_config(dir.path())).expect("open");
            for i in 0..4 {
                assert!(storage.put(format!("event-{i}")));
            }
            let pack = storage.get_event_pack();
            assert_eq!(pack.len(), 4);
            storage.event_pack_processing_done();
            assert!(storage.put("event-4".into()));
        }

        let storage = FileEventStorage::new(test_config(dir.path())).expect("reopen");
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get_event_pack(), vec!["event-4".to_string()]);
    }

    #[test]
    fn test_unacknowledged_pack_redelivered_after_restart() {
        let dir = tempdir().expect("tempdir");
        {
            let storage = FileEventStorage::new(test_config(dir.path())).expect("open");
            for i in 0..3 {
                assert!(storage.put(format!("event-{i}")));
            }
            // Pack pulled but never acknowledged -- the cursor must not move.
            let pack = storage.get_event_pack();
            assert_eq!(pack.len(), 3);
        }

        let storage = FileEventStorage::new(test_config(dir.path())).expect("reopen");
        let pack = storage.get_event_pack();
        assert_eq!(
            pack,
            vec![
                "event-0".to_string(),
                "event-1".to_string(),
                "event-2".to_string()
            ]
        );
    }

    #[test]
    fn test_missing_state_file_resets_to_oldest() {
        let dir = tempdir().expect("tempdir");
        {
            let storage = FileEventStorage::new(test_config(dir.path())).expect("open");
            for i in 0..2 {
                assert!(storage.put(format!("event-{i}")));
            }
            storage.get_event_pack();
            storage.event_pack_processing_done();
        }
        fs::remove_file(dir.path().join(STATE_FILE_NAME)).expect("remove state");

        // Without the cursor the reader starts over: at-least-once allows
        // re-delivery, never skipping.
        let storage = FileEventStorage::new(test_config(dir.path())).expect("reopen");
        assert_eq!(storage.get_event_pack().len(), 2);
    }
}
