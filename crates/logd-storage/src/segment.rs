// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-disk segment file: an append-only sequence of length-prefixed CBOR
//! records, one per committed [`LogEntry`] (spec.md §6 "Persistent state
//! layout").
//!
//! Record framing mirrors `logd-proto`'s wire framing: a 4-byte big-endian
//! length prefix followed by a `ciborium`-encoded body. A trailing record
//! whose declared length runs past the end of the file (a crash mid-write)
//! is dropped rather than treated as an error — recovery yields the same
//! state as before the crash, excluding that torn commit.

use crate::log::LogEntry;
use logd_node::{KPath, Node};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Errors reading or writing a segment file.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Underlying file I/O failed.
    #[error("segment io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be CBOR-encoded.
    #[error("segment encode error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    commit: i64,
    tx: i64,
    scope: Option<String>,
    timestamp_millis: u64,
    patch: Node,
    touched_paths: Vec<KPath>,
}

impl From<&LogEntry> for PersistedEntry {
    fn from(entry: &LogEntry) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let timestamp_millis = entry
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Self {
            commit: entry.commit,
            tx: entry.tx,
            scope: entry.scope.clone(),
            timestamp_millis,
            patch: entry.patch.clone(),
            touched_paths: entry.touched_paths.clone(),
        }
    }
}

impl From<PersistedEntry> for LogEntry {
    fn from(entry: PersistedEntry) -> Self {
        Self {
            commit: entry.commit,
            tx: entry.tx,
            scope: entry.scope,
            timestamp: UNIX_EPOCH + Duration::from_millis(entry.timestamp_millis),
            patch: entry.patch,
            touched_paths: entry.touched_paths,
        }
    }
}

/// An open handle to a segment file, ready to append further records.
pub struct SegmentWriter {
    file: File,
}

impl SegmentWriter {
    /// Open `path` for appending, creating it if absent.
    ///
    /// # Errors
    /// Returns [`SegmentError::Io`] if the file cannot be opened.
    pub fn create_or_append(path: &Path) -> Result<Self, SegmentError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Append one record and `fsync` it before returning, so a crash right
    /// after this call leaves at most the next write torn.
    ///
    /// # Errors
    /// Returns [`SegmentError::Encode`] if `entry` cannot be CBOR-encoded, or
    /// [`SegmentError::Io`] if the write or sync fails.
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), SegmentError> {
        let persisted = PersistedEntry::from(entry);
        let mut body = Vec::new();
        ciborium::into_writer(&persisted, &mut body)?;
        #[allow(clippy::cast_possible_truncation)]
        let len = body.len().min(u32::MAX as usize) as u32;
        self.file.write_all(&len.to_be_bytes())?;
        self.file.write_all(&body)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Read every complete record from `path`, in commit order. Returns an
/// empty list if `path` does not exist yet (a fresh store). A record whose
/// length prefix claims more bytes than the file actually holds is a torn
/// write from an interrupted append — reading stops there rather than
/// erroring, and the bytes after the last complete record are left
/// untouched on disk (the next append overwrites them, same as any other
/// append-only log recovering from a torn tail).
///
/// # Errors
/// Returns [`SegmentError::Io`] if the file exists but cannot be read.
pub fn read_segment(path: &Path) -> Result<Vec<LogEntry>, SegmentError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as usize;
        let body_start = offset + 4;
        let Some(body_end) = body_start.checked_add(len) else { break };
        if body_end > bytes.len() {
            warn!(%len, "segment file ends with a torn record, truncating recovery here");
            break;
        }
        match ciborium::from_reader::<PersistedEntry, _>(&bytes[body_start..body_end]) {
            Ok(persisted) => entries.push(LogEntry::from(persisted)),
            Err(err) => {
                warn!(?err, "segment record failed to decode, truncating recovery here");
                break;
            }
        }
        offset = body_end;
    }
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Value;
    use std::io::Seek;

    fn entry(commit: i64) -> LogEntry {
        LogEntry {
            commit,
            tx: commit,
            scope: None,
            timestamp: SystemTime::now(),
            patch: Node::new(Value::String(format!("entry-{commit}"))),
            touched_paths: vec![KPath::parse(".x").unwrap()],
        }
    }

    #[test]
    fn round_trips_entries_through_a_segment_file() {
        let dir = tempfile_dir();
        let path = dir.join("log.segment");
        {
            let mut writer = SegmentWriter::create_or_append(&path).unwrap();
            writer.append(&entry(1)).unwrap();
            writer.append(&entry(2)).unwrap();
        }
        let read_back = read_segment(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].commit, 1);
        assert_eq!(read_back[1].commit, 2);
        assert_eq!(read_back[1].patch, Node::new(Value::String("entry-2".to_string())));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile_dir();
        let path = dir.join("does-not-exist.segment");
        assert!(read_segment(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_trailing_record_is_dropped_not_errored() {
        let dir = tempfile_dir();
        let path = dir.join("log.segment");
        {
            let mut writer = SegmentWriter::create_or_append(&path).unwrap();
            writer.append(&entry(1)).unwrap();
        }
        // Simulate a crash mid-append: a length prefix claiming a body that
        // was never fully written.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&999_999u32.to_be_bytes()).unwrap();
        file.write_all(b"short").unwrap();
        file.seek(std::io::SeekFrom::End(0)).unwrap();

        let read_back = read_segment(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].commit, 1);
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("logd-segment-test-{}", std::process::id())).join(unique_suffix());
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn unique_suffix() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
    }
}
