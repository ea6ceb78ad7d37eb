use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// A single row mutation recorded in the redo log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    Put {
        table: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: String,
        key: Vec<u8>,
    },
}

/// One committed transaction.
///
/// On-disk format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized JournalRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub txn: u64,
    pub ops: Vec<JournalOp>,
}

/// Flush/sync strategy for the journal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every commit.
    EveryWrite,
    /// Flush to the OS on every commit and rely on its page cache.
    #[default]
    OsDefault,
}

/// Configuration for the [`Journal`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    writer: BufWriter<File>,
    offset: u64,
}

/// Append-only redo journal of committed transactions.
///
/// Each commit is one framed record. Recovery reads front to back and stops
/// at the first record that is truncated or fails its CRC; everything from
/// that point on is an incomplete commit and is cut off before the journal
/// is reopened for appending.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    config: JournalConfig,
}

impl Journal {
    /// Open (or create) the journal at `path` and return every complete
    /// record it holds.
    pub fn open(path: &Path, config: JournalConfig) -> DbResult<(Self, Vec<JournalRecord>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            File::create(path)?;
        }

        let (records, valid_len) = read_records(path)?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            warn!(
                path = %path.display(),
                valid_len,
                "discarding incomplete journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);

        let file = OpenOptions::new().append(true).open(path)?;
        let journal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter {
                writer: BufWriter::new(file),
                offset: valid_len,
            }),
            config,
        };
        debug!(records = records.len(), "journal opened");
        Ok((journal, records))
    }

    /// Append one record. Returns the byte offset it was written at.
    pub fn append(&self, record: &JournalRecord) -> DbResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| DbError::Serialization(e.to_string()))?;
        let length = payload.len() as u32;
        let crc = crc32fast::hash(&payload);

        let mut w = self.writer.lock().expect("journal lock poisoned");
        let offset = w.offset;

        w.writer.write_all(&length.to_le_bytes())?;
        w.writer.write_all(&crc.to_le_bytes())?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_all()?;
        }

        w.offset += HEADER_SIZE as u64 + payload.len() as u64;
        debug!(offset, txn = record.txn, ops = record.ops.len(), "journal append");
        Ok(offset)
    }

    /// Replace the whole journal with a single record.
    ///
    /// The record is written to a sibling temporary file which is then
    /// renamed over the journal, so a crash leaves either the old or the
    /// new journal in place.
    pub fn rewrite(&self, record: &JournalRecord) -> DbResult<()> {
        let payload =
            bincode::serialize(record).map_err(|e| DbError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("compact");

        let mut w = self.writer.lock().expect("journal lock poisoned");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            out.write_all(&(payload.len() as u32).to_le_bytes())?;
            out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            out.write_all(&payload)?;
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = HEADER_SIZE as u64 + payload.len() as u64;

        debug!(txn = record.txn, ops = record.ops.len(), "journal compacted");
        Ok(())
    }

    /// Current write offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("journal lock poisoned").offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every complete record and the byte length they span.
fn read_records(path: &Path) -> DbResult<(Vec<JournalRecord>, u64)> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "truncated journal record");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated journal record");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "journal CRC mismatch"
            );
            break;
        }

        match bincode::deserialize::<JournalRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(offset, error = %e, "undecodable journal record");
                break;
            }
        }

        offset += HEADER_SIZE as u64 + length as u64;
    }

    Ok((records, offset))
}
