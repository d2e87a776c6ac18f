//! Write-ahead log: append-only per-day segment with checksums
//!
//! Every accepted batch is written here, flushed to stable storage, and
//! only then handed to the fan-out path. One segment file exists per
//! trading day; rotation seals the old file and opens the next.
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len: u32]
//! [sequence:  u64]
//! [timestamp: i64]
//! [table_len: u16][table: bytes]
//! [payload_len: u32][payload: bincode Vec<Record>]
//! [checksum: u32]  // CRC32C over sequence+timestamp+table+payload
//! ```

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::record::Record;
use types::session::SessionDate;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("entry codec error: {0}")]
    Codec(String),

    #[error("segment corruption at byte offset {offset}: {detail} ({valid_entries} valid entries precede it)")]
    Corruption {
        valid_entries: u64,
        offset: u64,
        detail: String,
    },
}

// ── Log Entry ───────────────────────────────────────────────────────

/// A single segment entry: one (table, record-batch) append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Entry sequence within the segment, starting at 1.
    pub sequence: u64,
    /// Engine time of the append, Unix nanoseconds.
    pub timestamp: i64,
    /// Target table name.
    pub table: String,
    /// Bincode-serialized record batch.
    pub payload: Vec<u8>,
    /// CRC32C checksum over (sequence ++ timestamp ++ table ++ payload).
    pub checksum: u32,
}

impl LogEntry {
    /// Create an entry from a record batch, computing payload and checksum.
    pub fn new(
        sequence: u64,
        timestamp: i64,
        table: &str,
        records: &[Record],
    ) -> Result<Self, WalError> {
        let payload = bincode::serialize(records).map_err(|e| WalError::Codec(e.to_string()))?;
        let checksum = Self::compute_checksum(sequence, timestamp, table, &payload);
        Ok(Self {
            sequence,
            timestamp,
            table: table.to_string(),
            payload,
            checksum,
        })
    }

    /// Compute CRC32C over the concatenation of (sequence, timestamp, table, payload).
    pub fn compute_checksum(sequence: u64, timestamp: i64, table: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + table.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(table.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Validate the stored checksum against a recomputed value.
    pub fn verify_checksum(&self) -> bool {
        let expected =
            Self::compute_checksum(self.sequence, self.timestamp, &self.table, &self.payload);
        self.checksum == expected
    }

    /// Decode the record batch carried by this entry.
    pub fn records(&self) -> Result<Vec<Record>, WalError> {
        bincode::deserialize(&self.payload).map_err(|e| WalError::Codec(e.to_string()))
    }

    /// Serialize entry to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let table_bytes = self.table.as_bytes();
        let table_len = table_bytes.len() as u16;
        let payload_len = self.payload.len() as u32;

        // body = 8 (seq) + 8 (ts) + 2 (table_len) + table + 4 (pl_len) + payload + 4 (crc)
        let body_len: u32 = 8 + 8 + 2 + (table_len as u32) + 4 + payload_len + 4;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&table_len.to_le_bytes());
        buf.extend_from_slice(table_bytes);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize entry from the binary wire format.
    ///
    /// Returns `(entry, bytes_consumed)` on success. Truncated or
    /// implausible data returns a `Codec` error rather than panicking.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), WalError> {
        if data.len() < 4 {
            return Err(WalError::Codec("not enough data for length prefix".into()));
        }

        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        // Reject absurdly large body_len (likely corruption)
        if body_len > 100_000_000 {
            return Err(WalError::Codec(format!(
                "implausible body length: {}",
                body_len
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(WalError::Codec(format!(
                "incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        // Minimum body: 8 (seq) + 8 (ts) + 2 (table_len) + 4 (pl_len) + 4 (crc) = 26
        if body_len < 26 {
            return Err(WalError::Codec(format!(
                "body too small: {} bytes, minimum is 26",
                body_len
            )));
        }

        let body = &data[4..total];
        let mut pos: usize = 0;

        let sequence = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let timestamp = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let table_len = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;

        if pos + table_len > body.len() {
            return Err(WalError::Codec(format!(
                "table_len {} exceeds remaining body ({} bytes)",
                table_len,
                body.len() - pos
            )));
        }
        let table = String::from_utf8(body[pos..pos + table_len].to_vec())
            .map_err(|e| WalError::Codec(e.to_string()))?;
        pos += table_len;

        if pos + 4 > body.len() {
            return Err(WalError::Codec("not enough data for payload length".into()));
        }
        let payload_len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;

        if pos + payload_len > body.len() {
            return Err(WalError::Codec(format!(
                "payload_len {} exceeds remaining body ({} bytes)",
                payload_len,
                body.len() - pos
            )));
        }
        let payload = body[pos..pos + payload_len].to_vec();
        pos += payload_len;

        if pos + 4 > body.len() {
            return Err(WalError::Codec("not enough data for checksum".into()));
        }
        let checksum = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());

        let entry = Self {
            sequence,
            timestamp,
            table,
            payload,
            checksum,
        };

        Ok((entry, total))
    }
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushPolicy {
    /// Flush after every write.
    EveryWrite,
    /// Flush every N writes.
    EveryN(usize),
}

/// Controls when `fsync` (durable write) is called.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    EveryWrite,
    /// Fsync every N writes.
    EveryN(usize),
    /// Fsync only on rotation and explicit `sync`.
    OnRotation,
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for the segment writer.
///
/// The defaults (flush and fsync on every write) realize the
/// log-before-publish durability contract; the `EveryN` policies exist
/// for throughput tuning and require the caller to `sync()` before any
/// delivery boundary.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the per-day segment files.
    pub dir: PathBuf,
    /// Flush policy.
    pub flush_policy: FlushPolicy,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl WalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Segment Writer ──────────────────────────────────────────────────

/// Append-only writer for the current trading day's segment.
pub struct SegmentWriter {
    config: WalConfig,
    writer: BufWriter<File>,
    current_path: PathBuf,
    date: SessionDate,
    next_sequence: u64,
    entries_logged: u64,
    records_logged: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
}

impl SegmentWriter {
    /// Open (or create) the segment for `date`, creating the log
    /// directory if needed. An existing segment is opened in append mode;
    /// the caller replays it first and calls `resume`.
    pub fn open(config: WalConfig, date: SessionDate) -> Result<Self, WalError> {
        fs::create_dir_all(&config.dir)?;

        let current_path = Self::segment_path(&config.dir, date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_path)?;

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_path,
            date,
            next_sequence: 1,
            entries_logged: 0,
            records_logged: 0,
            writes_since_flush: 0,
            writes_since_fsync: 0,
        })
    }

    /// Segment file path for a trading date.
    pub fn segment_path(dir: &Path, date: SessionDate) -> PathBuf {
        dir.join(format!("segment-{}.wal", date.compact()))
    }

    /// Identifier of the open segment (file stem).
    pub fn open_segment_id(&self) -> String {
        format!("segment-{}", self.date.compact())
    }

    /// Position the counters after a startup replay.
    pub fn resume(&mut self, entries_logged: u64, records_logged: u64) {
        self.entries_logged = entries_logged;
        self.records_logged = records_logged;
        self.next_sequence = entries_logged + 1;
    }

    /// Append one (table, batch) entry. The write is flushed/fsynced per
    /// policy before this returns; with the default policies the entry is
    /// on stable storage when the caller proceeds to fan-out.
    pub fn append(
        &mut self,
        table: &str,
        records: &[Record],
        timestamp: i64,
    ) -> Result<u64, WalError> {
        let entry = LogEntry::new(self.next_sequence, timestamp, table, records)?;
        let bytes = entry.to_bytes();
        self.writer.write_all(&bytes)?;

        self.next_sequence += 1;
        self.entries_logged += 1;
        self.records_logged += records.len() as u64;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;

        Ok(entry.sequence)
    }

    /// Force flush + fsync (used before rotation and shutdown).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Seal the current segment and open an empty one for `new_date`.
    ///
    /// Returns the path of the sealed (now immutable) segment. The caller
    /// serializes rotation with appends, so no entry straddles segments.
    pub fn rotate(&mut self, new_date: SessionDate) -> Result<PathBuf, WalError> {
        self.sync()?;

        let sealed = self.current_path.clone();
        self.current_path = Self::segment_path(&self.config.dir, new_date);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_path)?;

        self.writer = BufWriter::new(file);
        self.date = new_date;
        self.next_sequence = 1;
        self.entries_logged = 0;
        self.records_logged = 0;
        Ok(sealed)
    }

    pub fn date(&self) -> SessionDate {
        self.date
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Entries appended to the open segment (including replayed ones).
    pub fn entries_logged(&self) -> u64 {
        self.entries_logged
    }

    /// Records appended to the open segment (including replayed ones).
    pub fn records_logged(&self) -> u64 {
        self.records_logged
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn apply_flush_policy(&mut self) -> Result<(), WalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), WalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
