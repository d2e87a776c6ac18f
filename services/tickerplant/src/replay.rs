//! Segment replay: sequential reader with corruption detection
//!
//! On startup the engine replays the current day's segment from offset 0
//! to rebuild in-memory table state before accepting publisher traffic.
//! A malformed or checksum-failing trailing entry is a fatal condition:
//! the reader reports the count of valid entries that precede it and the
//! engine refuses to enter service. Recovery is an operator decision,
//! never an automatic truncate.

use crate::wal::{LogEntry, SegmentWriter, WalError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use types::record::Record;
use types::session::SessionDate;

/// Sequential reader over one trading day's segment.
pub struct SegmentReader {
    path: PathBuf,
    data: Vec<u8>,
    pos: usize,
    entries_read: u64,
    last_sequence: Option<u64>,
}

impl SegmentReader {
    /// Open the segment for `date`. A missing file reads as an empty
    /// segment (fresh day, nothing to replay).
    pub fn open(dir: &Path, date: SessionDate) -> Result<Self, WalError> {
        let path = SegmentWriter::segment_path(dir, date);
        let data = if path.exists() {
            fs::read(&path)?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            data,
            pos: 0,
            entries_read: 0,
            last_sequence: None,
        })
    }

    /// Read the next entry, validating its checksum and sequence
    /// contiguity. Returns `None` once the segment is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>, WalError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }

        let offset = self.pos as u64;
        let (entry, consumed) = match LogEntry::from_bytes(&self.data[self.pos..]) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Err(WalError::Corruption {
                    valid_entries: self.entries_read,
                    offset,
                    detail: format!("unreadable trailing entry: {}", e),
                });
            }
        };

        if !entry.verify_checksum() {
            return Err(WalError::Corruption {
                valid_entries: self.entries_read,
                offset,
                detail: format!(
                    "CRC32C mismatch for seq={}, stored={:#010x}",
                    entry.sequence, entry.checksum
                ),
            });
        }

        let expected = self.entries_read + 1;
        if entry.sequence != expected {
            return Err(WalError::Corruption {
                valid_entries: self.entries_read,
                offset,
                detail: format!(
                    "sequence discontinuity: expected {}, got {}",
                    expected, entry.sequence
                ),
            });
        }

        self.pos += consumed;
        self.entries_read += 1;
        self.last_sequence = Some(entry.sequence);
        Ok(Some(entry))
    }

    /// Replay the whole segment strictly, decoding each entry's batch.
    ///
    /// Entries come back in file order, which is append order.
    pub fn replay(&mut self) -> Result<Vec<(String, Vec<Record>)>, WalError> {
        let mut batches = Vec::new();
        while let Some(entry) = self.next_entry()? {
            let records = entry.records()?;
            batches.push((entry.table, records));
        }
        info!(
            segment = %self.path.display(),
            entries = self.entries_read,
            "Segment replay complete"
        );
        Ok(batches)
    }

    /// Entries successfully read so far.
    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    /// Sequence of the last successfully read entry.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Operator diagnostic: count the valid prefix of a segment without
    /// failing. Returns `(valid_entries, byte_offset_of_first_bad_entry)`;
    /// the offset equals the file length when the segment is clean.
    ///
    /// This is what populates the corruption report. It never feeds
    /// engine state.
    pub fn scan_valid_prefix(dir: &Path, date: SessionDate) -> Result<(u64, u64), WalError> {
        let mut reader = Self::open(dir, date)?;
        loop {
            match reader.next_entry() {
                Ok(Some(_)) => {}
                Ok(None) => return Ok((reader.entries_read, reader.pos as u64)),
                Err(WalError::Corruption {
                    valid_entries,
                    offset,
                    detail,
                }) => {
                    warn!(
                        valid_entries,
                        offset,
                        detail = %detail,
                        "Segment scan stopped at corrupt entry"
                    );
                    return Ok((valid_entries, offset));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
