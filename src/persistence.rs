//! # Persistence Sink
//!
//! The in-memory storage engine is always authoritative (§1); persistence is
//! an opaque write-through sink behind it, never a second query path.
//! `NullSink` is the default (matches the teacher's in-memory-only
//! `RwLockEngine` with its "not persistent!" note); `FileSink` is a flat
//! append-log + periodic snapshot, grounded in the teacher's `SledEngine`
//! pattern (a storage path, opened once, written on every mutation) but
//! simplified to a log writer rather than a second embedded database, since
//! `sled` itself is an alternative storage backend this crate doesn't need.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::codec;
use crate::model::Entry;

/// Write-through sink for replication events, plus periodic full-state
/// snapshots (§6 "Persisted state layout").
pub trait PersistenceSink: Send + Sync {
    fn append(&self, event: &Entry) -> io::Result<()>;
    fn snapshot(&self, entries: &[Entry]) -> io::Result<()>;
}

/// Default sink: the in-memory engine remains authoritative and nothing is
/// written to disk.
#[derive(Debug, Default)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn append(&self, _event: &Entry) -> io::Result<()> {
        Ok(())
    }

    fn snapshot(&self, _entries: &[Entry]) -> io::Result<()> {
        Ok(())
    }
}

/// Append-only log of CBOR-encoded events (length-prefixed, one record per
/// line boundary) plus a separate snapshot file of the full live map.
/// `open` replays the snapshot then the log tail to reconstruct state
/// (§6: "On open, replay snapshot then log tail; truncate log behind
/// snapshots").
pub struct FileSink {
    log_path: PathBuf,
    snapshot_path: PathBuf,
    log_file: Mutex<File>,
}

impl FileSink {
    pub fn open(storage_path: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(storage_path)?;
        let log_path = storage_path.join("replication.log");
        let snapshot_path = storage_path.join("snapshot.cbor");
        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        Ok(Self { log_path, snapshot_path, log_file: Mutex::new(log_file) })
    }

    /// Replay the snapshot (if any) followed by every log record written
    /// since, in order. Malformed trailing log records (e.g. a torn write
    /// from a crash mid-append) are skipped rather than failing the whole
    /// replay.
    pub fn replay(&self) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        if self.snapshot_path.exists() {
            let bytes = std::fs::read(&self.snapshot_path)?;
            if let Ok(snapshot) = serde_cbor::from_slice::<Vec<Entry>>(&bytes) {
                entries = snapshot;
            }
        }

        let log_file = File::open(&self.log_path)?;
        let reader = BufReader::new(log_file);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match hex_decode(&line).and_then(|bytes| codec::decode(&bytes).ok()) {
                Some(entry) => entries.push(entry),
                None => continue,
            }
        }
        Ok(entries)
    }

    /// Truncate the log behind a fresh snapshot, so replay cost stays
    /// bounded by the time since the last snapshot rather than the whole
    /// history.
    pub fn truncate_log(&self) -> io::Result<()> {
        let mut guard = self.log_file.lock().unwrap();
        *guard = OpenOptions::new().create(true).write(true).truncate(true).open(&self.log_path)?;
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

impl PersistenceSink for FileSink {
    fn append(&self, event: &Entry) -> io::Result<()> {
        let bytes = codec::encode(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let mut guard = self.log_file.lock().unwrap();
        writeln!(guard, "{}", hex_encode(&bytes))?;
        guard.flush()
    }

    fn snapshot(&self, entries: &[Entry]) -> io::Result<()> {
        let bytes = serde_cbor::to_vec(entries).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(&self.snapshot_path, bytes)?;
        self.truncate_log()
    }
}
