//! Write-ahead log of consensus inputs.
//!
//! Every message and timeout is logged before it is processed; our own
//! messages and the `EndHeight` marker are synced to disk first. After a
//! crash the messages following `EndHeight(h - 1)` are replayed to bring
//! the machine back to where it stopped in height `h`.
//!
//! The file log rolls its head into numbered segments (`wal.000000`,
//! `wal.000001`, ...) right after an `EndHeight` once the head passes the
//! segment size, and deletes the oldest segments beyond the configured
//! count. A search reads from the head backwards and stops at the first
//! file holding the marker.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use halcyon_core::{hash_blake3, now_millis, RoundStep};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WalError;
use crate::messages::MsgInfo;
use crate::ticker::TimeoutInfo;

/// Records are `checksum(4) | length(4) | payload`, big endian.
const RECORD_HEADER_LEN: usize = 8;
/// Upper bound of a single record, a full block plus overhead.
const MAX_RECORD_SIZE: u32 = 32 * 1024 * 1024;

pub const DEFAULT_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_SEGMENTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalMessage {
    MsgInfo(MsgInfo),
    Timeout(TimeoutInfo),
    /// Written once the block of this height is stored and before it is
    /// applied.
    EndHeight(u64),
    NewRoundStep { height: u64, round: u32, step: RoundStep },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedWalMessage {
    pub time: u64,
    pub msg: WalMessage,
}

pub trait Wal: Send {
    /// Append without waiting for the disk.
    fn write(&mut self, msg: WalMessage) -> Result<(), WalError>;

    /// Append and sync.
    fn write_sync(&mut self, msg: WalMessage) -> Result<(), WalError>;

    fn flush_and_sync(&mut self) -> Result<(), WalError>;

    /// Messages written after `EndHeight(height)`, or `None` when the
    /// marker is not in the log.
    fn search_for_end_height(&self, height: u64) -> Result<Option<Vec<WalMessage>>, WalError>;
}

fn encode_record(msg: WalMessage) -> Result<Vec<u8>, WalError> {
    let timed = TimedWalMessage {
        time: now_millis(),
        msg,
    };
    let payload = bincode::serialize(&timed).map_err(|e| WalError::Serialization(e.to_string()))?;
    let checksum = hash_blake3(&payload);
    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    record.extend_from_slice(&checksum.as_bytes()[..4]);
    record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Decode every record of `data`. A truncated final record is what a crash
/// mid-write leaves behind and ends the log; a bad checksum anywhere else
/// is corruption. Returns the records and the length of the intact prefix.
fn decode_records(data: &[u8]) -> Result<(Vec<TimedWalMessage>, usize), WalError> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        if data.len() - offset < RECORD_HEADER_LEN {
            warn!(offset, "truncated WAL record header, ignoring tail");
            break;
        }
        let checksum = &data[offset..offset + 4];
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[offset + 4..offset + 8]);
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_RECORD_SIZE {
            return Err(WalError::Corrupted {
                offset: offset as u64,
                reason: format!("record length {} exceeds {}", len, MAX_RECORD_SIZE),
            });
        }
        let start = offset + RECORD_HEADER_LEN;
        let end = start + len as usize;
        if end > data.len() {
            warn!(offset, "truncated WAL record, ignoring tail");
            break;
        }
        let payload = &data[start..end];
        if &hash_blake3(payload).as_bytes()[..4] != checksum {
            return Err(WalError::Corrupted {
                offset: offset as u64,
                reason: "checksum mismatch".into(),
            });
        }
        let timed: TimedWalMessage = bincode::deserialize(payload).map_err(|e| WalError::Corrupted {
            offset: offset as u64,
            reason: e.to_string(),
        })?;
        out.push(timed);
        offset = end;
    }
    Ok((out, offset))
}

fn messages_after_end_height<I>(msgs: I, height: u64) -> Option<Vec<WalMessage>>
where
    I: IntoIterator<Item = WalMessage>,
{
    let mut found: Option<Vec<WalMessage>> = None;
    for msg in msgs {
        match (&msg, found.as_mut()) {
            // A later marker for the same height restarts the search; the
            // last one wins.
            (WalMessage::EndHeight(h), _) if *h == height => found = Some(Vec::new()),
            (_, Some(after)) => after.push(msg),
            _ => {}
        }
    }
    found
}

/// Log kept in memory. Clones share the same log, so a test can "restart"
/// a node over the log it wrote.
#[derive(Debug, Clone)]
pub struct MemWal {
    records: Arc<Mutex<Vec<WalMessage>>>,
}

impl MemWal {
    pub fn new() -> Self {
        MemWal {
            records: Arc::new(Mutex::new(vec![WalMessage::EndHeight(0)])),
        }
    }

    pub fn messages(&self) -> Vec<WalMessage> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, msg: WalMessage) {
        if let Ok(mut records) = self.records.lock() {
            records.push(msg);
        }
    }
}

impl Default for MemWal {
    fn default() -> Self {
        MemWal::new()
    }
}

impl Wal for MemWal {
    fn write(&mut self, msg: WalMessage) -> Result<(), WalError> {
        self.push(msg);
        Ok(())
    }

    fn write_sync(&mut self, msg: WalMessage) -> Result<(), WalError> {
        self.push(msg);
        Ok(())
    }

    fn flush_and_sync(&mut self) -> Result<(), WalError> {
        Ok(())
    }

    fn search_for_end_height(&self, height: u64) -> Result<Option<Vec<WalMessage>>, WalError> {
        Ok(messages_after_end_height(self.messages(), height))
    }
}

/// Log file with rolled segments next to it.
pub struct FileWal {
    path: PathBuf,
    writer: BufWriter<File>,
    head_size: u64,
    segment_size: u64,
    max_segments: usize,
}

impl FileWal {
    /// Open or create the log. A new log starts with `EndHeight(0)` so the
    /// first height replays like any other.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let head_empty = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        if !head_empty {
            repair(&path)?;
        }
        let is_new = head_empty && segments(&path)?.is_empty();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let head_size = file.metadata()?.len();
        let mut wal = FileWal {
            path,
            writer: BufWriter::new(file),
            head_size,
            segment_size: DEFAULT_SEGMENT_SIZE,
            max_segments: DEFAULT_MAX_SEGMENTS,
        };
        if is_new {
            info!(path = %wal.path.display(), "created new WAL");
            wal.write_sync(WalMessage::EndHeight(0))?;
        }
        Ok(wal)
    }

    /// Roll the head once it reaches `segment_size` bytes (0 never rolls)
    /// and keep at most `max_segments` rolled files (at least one).
    pub fn with_limits(mut self, segment_size: u64, max_segments: usize) -> Self {
        self.segment_size = segment_size;
        self.max_segments = max_segments.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate(&mut self) -> Result<(), WalError> {
        self.flush_and_sync()?;
        let next = segments(&self.path)?.last().map_or(0, |(index, _)| index + 1);
        let rolled = segment_path(&self.path, next);
        fs::rename(&self.path, &rolled)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.head_size = 0;
        info!(segment = %rolled.display(), "rolled WAL segment");

        let rolled = segments(&self.path)?;
        let excess = rolled.len().saturating_sub(self.max_segments);
        for (_, old) in &rolled[..excess] {
            fs::remove_file(old)?;
            debug!(segment = %old.display(), "removed old WAL segment");
        }
        Ok(())
    }
}

fn segment_path(path: &Path, index: u64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{:06}", index));
    PathBuf::from(name)
}

/// Rolled segments of the log at `path`, oldest first.
fn segments(path: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = format!("{}.", name);
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let index = entry
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix(prefix.as_str()))
            .and_then(|i| i.parse::<u64>().ok());
        if let Some(index) = index {
            out.push((index, entry.path()));
        }
    }
    out.sort_by_key(|(index, _)| *index);
    Ok(out)
}

fn read_messages(path: &Path) -> Result<Vec<WalMessage>, WalError> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(decode_records(&data)?.0.into_iter().map(|r| r.msg).collect())
}

/// Cut off a partially written final record so appends start on a record
/// boundary.
fn repair(path: &Path) -> Result<(), WalError> {
    let data = fs::read(path)?;
    let (_, valid_len) = decode_records(&data)?;
    if valid_len < data.len() {
        warn!(
            path = %path.display(),
            dropped = data.len() - valid_len,
            "truncating partial WAL record"
        );
        OpenOptions::new().write(true).open(path)?.set_len(valid_len as u64)?;
    }
    Ok(())
}

impl Wal for FileWal {
    fn write(&mut self, msg: WalMessage) -> Result<(), WalError> {
        let ends_height = matches!(msg, WalMessage::EndHeight(_));
        let record = encode_record(msg)?;
        self.writer.write_all(&record)?;
        self.head_size += record.len() as u64;
        if ends_height && self.segment_size > 0 && self.head_size >= self.segment_size {
            self.rotate()?;
        }
        Ok(())
    }

    fn write_sync(&mut self, msg: WalMessage) -> Result<(), WalError> {
        self.write(msg)?;
        self.flush_and_sync()
    }

    fn flush_and_sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn search_for_end_height(&self, height: u64) -> Result<Option<Vec<WalMessage>>, WalError> {
        let mut files = vec![self.path.clone()];
        files.extend(segments(&self.path)?.into_iter().rev().map(|(_, path)| path));

        // Messages of the files already searched, which all follow the
        // current one.
        let mut newer: Vec<WalMessage> = Vec::new();
        for file in files {
            let mut msgs = read_messages(&file)?;
            if let Some(mut after) = messages_after_end_height(msgs.iter().cloned(), height) {
                after.append(&mut newer);
                return Ok(Some(after));
            }
            msgs.append(&mut newer);
            newer = msgs;
        }
        Ok(None)
    }
}

impl Drop for FileWal {
    fn drop(&mut self) {
        if let Err(e) = self.flush_and_sync() {
            warn!(error = %e, "failed to flush WAL on close");
        }
    }
}
