//! Append-only commit journal for the counter store

use super::fault::{FaultInjector, FaultPoint};
use crate::core::{Counter, CounterId, CounterRow, DbError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

// ============================================================================
// Journal Entry Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Counter (re)created by setup
    Reset { counter: Counter, at: DateTime<Utc> },
    /// Rows installed by one committed transaction
    Commit {
        txn_id: u64,
        seq: u64,
        rows: Vec<Counter>,
        at: DateTime<Utc>,
    },
}

impl JournalEntry {
    pub fn reset(counter: Counter) -> Self {
        JournalEntry::Reset {
            counter,
            at: Utc::now(),
        }
    }

    pub fn commit(txn_id: u64, seq: u64, rows: Vec<Counter>) -> Self {
        JournalEntry::Commit {
            txn_id,
            seq,
            rows,
            at: Utc::now(),
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every entry
    Sync,
    /// flush to the OS, no fsync
    #[default]
    Async,
    /// journal writes are skipped
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(DurabilityMode::Sync),
            "async" => Ok(DurabilityMode::Async),
            "none" => Ok(DurabilityMode::None),
            other => Err(format!("unknown durability mode '{}'", other)),
        }
    }
}

// ============================================================================
// Journal
// ============================================================================

/// `len`, `crc32(len)`, `crc32(payload)`, each little-endian u32
const FRAME_HEADER_LEN: usize = 12;

/// Checksummed MessagePack frames, one per entry:
///
/// ```text
/// +---------+--------------+------------------+-----------------+
/// | len u32 | crc(len) u32 | crc(payload) u32 | payload (len B) |
/// +---------+--------------+------------------+-----------------+
/// ```
///
/// The header checksum tells a damaged length apart from a frame that was
/// cut short by a crash, which can only ever be the last one.
pub struct Journal {
    path: PathBuf,
    file: Option<File>,
    durability_mode: DurabilityMode,
    entries_written: usize,
    faults: Option<Arc<FaultInjector>>,
    // Set when a partial frame could not be cut off again
    poisoned: bool,
}

/// State rebuilt from a journal
#[derive(Debug, Default)]
pub struct Recovered {
    pub rows: BTreeMap<CounterId, CounterRow>,
    pub commit_seq: u64,
    pub entries: usize,
}

impl Journal {
    pub fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                DbError::StoreUnavailable(format!("Failed to create journal directory: {}", e))
            })?;
        }

        let file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| DbError::StoreUnavailable(format!("Failed to open journal: {}", e)))?;
            Some(file)
        } else {
            None
        };

        Ok(Self {
            path,
            file,
            durability_mode,
            entries_written: 0,
            faults: None,
            poisoned: false,
        })
    }

    /// Route appends through a fault injector
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Append one entry. Either the whole frame lands in the file or the file
    /// is cut back to its previous length before the error is returned.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        if self.poisoned {
            return Err(DbError::StoreUnavailable(format!(
                "journal '{}' holds a partial frame, reopen the store",
                self.path.display()
            )));
        }
        let frame = encode_frame(entry)?;
        let sync = self.durability_mode == DurabilityMode::Sync;
        let faults = self.faults.as_deref();
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DbError::StoreUnavailable("journal file not open".to_string()))?;

        let start = file
            .metadata()
            .map_err(|e| DbError::StoreUnavailable(format!("Failed to stat journal: {}", e)))?
            .len();
        if let Err(err) = write_frame(file, &frame, sync, faults) {
            if let Err(truncate_err) = file.set_len(start) {
                error!(path = %self.path.display(), error = %truncate_err, "could not drop partial journal frame");
                self.poisoned = true;
            }
            return Err(err);
        }
        self.entries_written += 1;
        Ok(())
    }

    /// Read every complete frame. A torn trailing frame (crash mid-append) is
    /// dropped; a checksum mismatch or a frame that decodes badly is an error.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DbError::StoreUnavailable(format!(
                    "Failed to read journal: {}",
                    e
                )));
            }
        };

        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let rest = &bytes[offset..];
            if rest.len() < FRAME_HEADER_LEN {
                warn!(path = %self.path.display(), offset, "dropping torn journal header");
                break;
            }
            let len_bytes = [rest[0], rest[1], rest[2], rest[3]];
            if crc32fast::hash(&len_bytes) != le_u32(&rest[4..8]) {
                return Err(DbError::Journal(format!(
                    "frame {} at offset {}: header checksum mismatch",
                    entries.len(),
                    offset
                )));
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let body = &rest[FRAME_HEADER_LEN..];
            if len > body.len() {
                // intact header, short payload: the append never finished
                warn!(path = %self.path.display(), offset, len, "dropping torn journal frame");
                break;
            }
            let payload = &body[..len];
            if crc32fast::hash(payload) != le_u32(&rest[8..12]) {
                return Err(DbError::Journal(format!(
                    "frame {} at offset {}: payload checksum mismatch",
                    entries.len(),
                    offset
                )));
            }
            let entry: JournalEntry = rmp_serde::from_slice(payload).map_err(|e| {
                DbError::Journal(format!("Failed to decode frame {}: {}", entries.len(), e))
            })?;
            entries.push(entry);
            offset += FRAME_HEADER_LEN + len;
        }
        Ok(entries)
    }

    pub fn recover(&self) -> Result<Recovered> {
        let mut recovered = Recovered::default();
        for entry in self.read_all()? {
            recovered.entries += 1;
            match entry {
                JournalEntry::Reset { counter, .. } => {
                    recovered.rows.insert(counter.id, counter.row);
                    recovered.commit_seq += 1;
                }
                JournalEntry::Commit { seq, rows, .. } => {
                    for counter in rows {
                        recovered.rows.insert(counter.id, counter.row);
                    }
                    recovered.commit_seq = recovered.commit_seq.max(seq);
                }
            }
        }
        Ok(recovered)
    }
}

fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(entry)
        .map_err(|e| DbError::Journal(format!("Failed to serialize entry: {}", e)))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| DbError::Journal("entry too large for one frame".to_string()))?;
    let len_bytes = len.to_le_bytes();

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len_bytes);
    frame.extend_from_slice(&crc32fast::hash(&len_bytes).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn write_frame(
    file: &mut File,
    frame: &[u8],
    sync: bool,
    faults: Option<&FaultInjector>,
) -> Result<()> {
    if let Some(faults) = faults
        && let Err(err) = faults.check(FaultPoint::JournalWrite)
    {
        // half the frame reaches the file, as with a disk that fills up mid-write
        let _ = file.write_all(&frame[..frame.len() / 2]);
        return Err(err);
    }
    file.write_all(frame)
        .map_err(|e| DbError::StoreUnavailable(format!("Failed to write journal: {}", e)))?;
    if sync {
        file.sync_data()
            .map_err(|e| DbError::StoreUnavailable(format!("Failed to sync journal: {}", e)))?;
    }
    Ok(())
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
