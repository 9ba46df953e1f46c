//! Disk-persistent storage backend.
//!
//! Records live in an append-only log (`vectors.log`) of length-prefixed
//! bincode frames; an in-memory index maps each ID to its latest frame.
//! Deletes append a tombstone frame. [`DiskStorage::compact`] rewrites
//! the log without superseded frames and tombstones.
//!
//! # Frame layout
//!
//! ```text
//! ┌──────────────┬─────────────────────────┐
//! │ u32 LE len   │ bincode(LogEntry)       │
//! └──────────────┴─────────────────────────┘
//! ```
//!
//! A torn frame at the tail (crash mid-append) is truncated on replay.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::storage::{page_from_order, StorageBackend};
use crate::types::{Page, VectorId, VectorRecord};

const LOG_FILE: &str = "vectors.log";

/// One frame in the append-only log.
#[derive(Debug, Serialize, Deserialize)]
enum LogEntry {
    /// A record write (insert or overwrite).
    Put(VectorRecord),
    /// A deletion tombstone.
    Delete(VectorId),
}

/// Location of a record's latest `Put` frame payload.
#[derive(Clone, Copy, Debug)]
struct FrameRef {
    offset: u64,
    len: u32,
}

/// Append-only log storage with an in-memory offset index.
pub struct DiskStorage {
    data_dir: PathBuf,
    log_path: PathBuf,
    writer: Option<BufWriter<File>>,
    /// Separate read handle; `get` takes `&self`, so seeks are serialized
    /// behind a mutex.
    reader: Mutex<Option<File>>,
    frames: HashMap<VectorId, FrameRef>,
    order: Vec<VectorId>,
    write_offset: u64,
}

impl DiskStorage {
    /// Creates a backend rooted at `data_dir`. Nothing is opened until
    /// [`StorageBackend::initialize`] runs.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        let log_path = data_dir.join(LOG_FILE);
        Self {
            data_dir,
            log_path,
            writer: None,
            reader: Mutex::new(None),
            frames: HashMap::new(),
            order: Vec::new(),
            write_offset: 0,
        }
    }

    /// Rewrites the log keeping only the latest frame per live ID,
    /// dropping tombstones and superseded writes.
    pub fn compact(&mut self) -> Result<()> {
        let live: Vec<VectorRecord> = self
            .order
            .iter()
            .filter_map(|id| self.read_record(id).transpose())
            .collect::<Result<_>>()?;

        let tmp_path = self.log_path.with_extension("log.tmp");
        {
            let tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| StorageError::io(format!("create {}: {e}", tmp_path.display())))?;
            let mut writer = BufWriter::new(tmp);
            let mut offset = 0u64;
            let mut frames = HashMap::with_capacity(live.len());
            for record in &live {
                let id = record.id.clone();
                let frame = append_frame(&mut writer, offset, &LogEntry::Put(record.clone()))?;
                frames.insert(id, frame.0);
                offset = frame.1;
            }
            writer
                .flush()
                .map_err(|e| StorageError::io(format!("flush compacted log: {e}")))?;
            self.frames = frames;
            self.write_offset = offset;
        }

        std::fs::rename(&tmp_path, &self.log_path)
            .map_err(|e| StorageError::io(format!("rename compacted log: {e}")))?;
        self.reopen_handles()?;

        debug!(records = live.len(), "Compacted disk log");
        Ok(())
    }

    /// Size of the log file in bytes.
    pub(crate) fn log_bytes(&self) -> u64 {
        std::fs::metadata(&self.log_path).map(|m| m.len()).unwrap_or(0)
    }

    fn reopen_handles(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| StorageError::io(format!("open {}: {e}", self.log_path.display())))?;
        self.writer = Some(BufWriter::new(file));

        let read_handle = File::open(&self.log_path)
            .map_err(|e| StorageError::io(format!("open reader: {e}")))?;
        *self
            .reader
            .lock()
            .map_err(|_| StorageError::io("reader lock poisoned"))? = Some(read_handle);
        Ok(())
    }

    fn read_record(&self, id: &VectorId) -> Result<Option<VectorRecord>> {
        let frame = match self.frames.get(id) {
            Some(frame) => *frame,
            None => return Ok(None),
        };

        let mut guard = self
            .reader
            .lock()
            .map_err(|_| StorageError::io("reader lock poisoned"))?;
        let reader = guard
            .as_mut()
            .ok_or_else(|| StorageError::io("storage is closed"))?;

        reader
            .seek(SeekFrom::Start(frame.offset))
            .map_err(|e| StorageError::io(format!("seek: {e}")))?;
        let mut buf = vec![0u8; frame.len as usize];
        reader
            .read_exact(&mut buf)
            .map_err(|e| StorageError::io(format!("read frame: {e}")))?;

        match bincode::deserialize::<LogEntry>(&buf).map_err(StorageError::from)? {
            LogEntry::Put(record) => Ok(Some(record)),
            LogEntry::Delete(_) => Err(StorageError::corrupted(format!(
                "offset index points at a tombstone for {id}"
            ))
            .into()),
        }
    }

    fn append(&mut self, entry: &LogEntry) -> Result<FrameRef> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StorageError::io("storage is closed"))?;
        let (frame, next_offset) = append_frame(writer, self.write_offset, entry)?;
        writer
            .flush()
            .map_err(|e| StorageError::io(format!("flush log: {e}")))?;
        self.write_offset = next_offset;
        Ok(frame)
    }

    /// Replays the log, building the offset index and insertion order.
    /// Returns the offset of the first torn byte, if any.
    fn replay(&mut self) -> Result<Option<u64>> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(format!("open log for replay: {e}")).into()),
        };
        let file_len = file
            .metadata()
            .map_err(|e| StorageError::io(format!("stat log: {e}")))?
            .len();

        let mut reader = BufReader::new(file);
        let mut offset = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // A partial length prefix at the tail is torn too
                    if offset < file_len {
                        return Ok(Some(offset));
                    }
                    break;
                }
                Err(e) => return Err(StorageError::io(format!("replay: {e}")).into()),
            }
            let len = u32::from_le_bytes(len_buf);
            let payload_offset = offset + 4;

            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Torn frame at the tail; truncate back to the last
                    // complete frame
                    return Ok(Some(offset));
                }
                Err(e) => return Err(StorageError::io(format!("replay: {e}")).into()),
            }

            match bincode::deserialize::<LogEntry>(&payload).map_err(StorageError::from)? {
                LogEntry::Put(record) => {
                    let id = record.id;
                    if !self.frames.contains_key(&id) {
                        self.order.push(id.clone());
                    }
                    self.frames.insert(
                        id,
                        FrameRef {
                            offset: payload_offset,
                            len,
                        },
                    );
                }
                LogEntry::Delete(id) => {
                    if self.frames.remove(&id).is_some() {
                        self.order.retain(|existing| *existing != id);
                    }
                }
            }

            offset = payload_offset + len as u64;
        }

        self.write_offset = offset;
        Ok(None)
    }
}

fn append_frame(
    writer: &mut BufWriter<File>,
    offset: u64,
    entry: &LogEntry,
) -> Result<(FrameRef, u64)> {
    let payload = bincode::serialize(entry).map_err(StorageError::from)?;
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .and_then(|_| writer.write_all(&payload))
        .map_err(|e| StorageError::io(format!("append frame: {e}")))?;
    Ok((
        FrameRef {
            offset: offset + 4,
            len,
        },
        offset + 4 + len as u64,
    ))
}

impl StorageBackend for DiskStorage {
    fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::io(format!("create {}: {e}", self.data_dir.display())))?;

        if let Some(torn_at) = self.replay()? {
            warn!(
                offset = torn_at,
                path = %self.log_path.display(),
                "Truncating torn frame at log tail"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&self.log_path)
                .map_err(|e| StorageError::io(format!("open for truncate: {e}")))?;
            file.set_len(torn_at)
                .map_err(|e| StorageError::io(format!("truncate: {e}")))?;
            self.write_offset = torn_at;
        }

        self.reopen_handles()?;
        debug!(
            records = self.frames.len(),
            bytes = self.write_offset,
            "Disk log replayed"
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "disk"
    }

    fn put(&mut self, record: VectorRecord) -> Result<()> {
        let id = record.id.clone();
        let frame = self.append(&LogEntry::Put(record))?;
        if !self.frames.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.frames.insert(id, frame);
        Ok(())
    }

    fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>> {
        self.read_record(id)
    }

    fn delete(&mut self, id: &VectorId) -> Result<bool> {
        if !self.frames.contains_key(id) {
            return Ok(false);
        }
        self.append(&LogEntry::Delete(id.clone()))?;
        self.frames.remove(id);
        self.order.retain(|existing| existing != id);
        Ok(true)
    }

    fn contains(&self, id: &VectorId) -> bool {
        self.frames.contains_key(id)
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn list_ids_in_order(&self) -> Vec<VectorId> {
        self.order.clone()
    }

    fn scan_page(&self, after: Option<&VectorId>, limit: usize) -> Result<Page<VectorId>> {
        Ok(page_from_order(&self.order, after, limit))
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("vector_count".into(), json!(self.frames.len()));
        stats.insert("log_bytes".into(), json!(self.log_bytes()));
        stats.insert("data_dir".into(), json!(self.data_dir.display().to_string()));
        stats
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| StorageError::io(format!("flush on close: {e}")))?;
        }
        if let Ok(mut reader) = self.reader.lock() {
            reader.take();
        }
        Ok(())
    }
}
