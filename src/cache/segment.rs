//! L2 Segment Tier - Fast Persistent Storage
//!
//! Small persistent tier backed by a single append-only log file.
//!
//! # Design
//!
//! - Length-prefixed, checksummed bincode records (put / tombstone)
//! - In-memory index (key -> record location + access summary)
//! - Replay on open; a torn or corrupt tail is truncated
//! - Compaction once dead bytes exceed half of the file
//!
//! Access statistics live only in the index. After a restart every entry
//! starts from the access state it was written with.
//!
//! Record layout:
//!
//! ```text
//! +----------------+----------------+------------------------+
//! | body len (u32) | checksum (u32) | bincode(Record) body   |
//! +----------------+----------------+------------------------+
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::{fx_hash, observe_sequence, CacheEntry, EntrySummary};
use super::tier::{Tier, TierKind};
use crate::error::{Error, Result};

/// Log file name inside the tier directory
pub const SEGMENT_FILE: &str = "segment.log";

const COMPACT_FILE: &str = "segment.log.compact";
const HEADER_LEN: usize = 8;
const DEFAULT_COMPACTION_FLOOR: u64 = 64 * 1024; // 64KB

#[derive(Serialize, Deserialize)]
enum Record {
    Put(CacheEntry),
    Delete(String),
}

fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let body = bincode::serialize(record).map_err(|e| Error::Serialization(e.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(fx_hash(&body) as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the frame at the start of `buf`, returning it with its total length
fn decode_frame(buf: &[u8]) -> Option<(Record, u64)> {
    let len = u32::from_le_bytes(buf.get(0..4)?.try_into().ok()?) as usize;
    let checksum = u32::from_le_bytes(buf.get(4..8)?.try_into().ok()?);
    let body = buf.get(HEADER_LEN..HEADER_LEN + len)?;
    if fx_hash(body) as u32 != checksum {
        return None;
    }
    let record = bincode::deserialize(body).ok()?;
    Some((record, (HEADER_LEN + len) as u64))
}

/// Location of a live record
#[derive(Debug, Clone)]
struct Slot {
    offset: u64,
    len: u64,
    summary: EntrySummary,
}

/// Log file plus index, always accessed under the tier's mutex
struct Segment {
    dir: PathBuf,
    file: File,
    index: HashMap<String, Slot>,
    file_len: u64,
    dead_bytes: u64,
    live_bytes: u64,
    compaction_floor: u64,
}

impl Segment {
    fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        // Left behind by a compaction that never finished
        let _ = std::fs::remove_file(dir.join(COMPACT_FILE));

        let path = dir.join(SEGMENT_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut segment = Self {
            dir: dir.to_path_buf(),
            file,
            index: HashMap::new(),
            file_len: 0,
            dead_bytes: 0,
            live_bytes: 0,
            compaction_floor: DEFAULT_COMPACTION_FLOOR,
        };

        let mut pos = 0usize;
        while pos < buf.len() {
            match decode_frame(&buf[pos..]) {
                Some((record, len)) => {
                    segment.replay(record, pos as u64, len);
                    pos += len as usize;
                }
                None => {
                    warn!(
                        path = %path.display(),
                        offset = pos,
                        discarded = buf.len() - pos,
                        "Truncating torn segment tail"
                    );
                    segment.file.set_len(pos as u64)?;
                    break;
                }
            }
        }
        segment.file_len = pos as u64;

        debug!(
            path = %path.display(),
            entries = segment.index.len(),
            bytes = segment.file_len,
            "Opened segment"
        );
        Ok(segment)
    }

    fn replay(&mut self, record: Record, offset: u64, len: u64) {
        match record {
            Record::Put(entry) => {
                observe_sequence(entry.sequence());
                let slot = Slot {
                    offset,
                    len,
                    summary: entry.summary(),
                };
                self.install(entry.key().to_string(), slot);
            }
            Record::Delete(key) => {
                self.drop_slot(&key);
                self.dead_bytes += len;
            }
        }
    }

    fn install(&mut self, key: String, slot: Slot) {
        self.live_bytes += slot.summary.size_bytes;
        if let Some(old) = self.index.insert(key, slot) {
            self.live_bytes -= old.summary.size_bytes;
            self.dead_bytes += old.len;
        }
    }

    fn drop_slot(&mut self, key: &str) -> Option<Slot> {
        let old = self.index.remove(key)?;
        self.live_bytes -= old.summary.size_bytes;
        self.dead_bytes += old.len;
        Some(old)
    }

    fn append(&mut self, frame: &[u8]) -> Result<u64> {
        let offset = self.file_len;
        let written = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(frame));

        if let Err(e) = written {
            // Drop any partial frame so replay never sees it
            let _ = self.file.set_len(offset);
            return Err(e.into());
        }

        self.file_len += frame.len() as u64;
        Ok(offset)
    }

    fn read_frame(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read(&mut self, key: &str, record_access: bool) -> Result<Option<CacheEntry>> {
        let (offset, len) = match self.index.get(key) {
            Some(slot) => (slot.offset, slot.len),
            None => return Ok(None),
        };

        let frame = self.read_frame(offset, len)?;
        let mut entry = match decode_frame(&frame) {
            Some((Record::Put(entry), _)) if entry.key() == key => entry,
            _ => {
                if let Err(e) = self.delete(key) {
                    warn!(key, error = %e, "Failed to tombstone corrupt record");
                }
                return Err(Error::corrupt(
                    TierKind::Fast,
                    format!("unreadable record for {} at offset {}", key, offset),
                ));
            }
        };

        if let Some(slot) = self.index.get_mut(key) {
            if record_access {
                slot.summary.record_access();
            }
            entry.apply_access(&slot.summary);
        }
        Ok(Some(entry))
    }

    fn put(&mut self, entry: CacheEntry) -> Result<bool> {
        if let Some(slot) = self.index.get(entry.key()) {
            if slot.summary.sequence > entry.sequence() {
                return Ok(false);
            }
        }

        let key = entry.key().to_string();
        let summary = entry.summary();
        let frame = encode_record(&Record::Put(entry))?;
        let offset = self.append(&frame)?;

        self.install(
            key,
            Slot {
                offset,
                len: frame.len() as u64,
                summary,
            },
        );
        self.maybe_compact();
        Ok(true)
    }

    /// Tombstone `key` if its live record is still the write `sequence`
    fn delete_if_unchanged(&mut self, key: &str, sequence: u64) -> Result<bool> {
        match self.index.get(key) {
            Some(slot) if slot.summary.sequence == sequence => self.delete(key),
            _ => Ok(false),
        }
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        if !self.index.contains_key(key) {
            return Ok(false);
        }

        let frame = encode_record(&Record::Delete(key.to_string()))?;
        self.append(&frame)?;
        self.drop_slot(key);
        self.dead_bytes += frame.len() as u64;
        self.maybe_compact();
        Ok(true)
    }

    fn clear(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.index.clear();
        self.file_len = 0;
        self.dead_bytes = 0;
        self.live_bytes = 0;
        Ok(())
    }

    fn maybe_compact(&mut self) {
        if self.file_len < self.compaction_floor || self.dead_bytes * 2 <= self.file_len {
            return;
        }
        if let Err(e) = self.compact() {
            warn!(error = %e, "Segment compaction failed");
        }
    }

    /// Rewrite the log with live records only
    fn compact(&mut self) -> Result<()> {
        let tmp_path = self.dir.join(COMPACT_FILE);
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut live: Vec<(String, u64, u64)> = self
            .index
            .iter()
            .map(|(key, slot)| (key.clone(), slot.offset, slot.len))
            .collect();
        live.sort_by_key(|(_, offset, _)| *offset);

        let mut moved = Vec::with_capacity(live.len());
        let mut new_len = 0u64;
        for (key, offset, len) in live {
            let frame = self.read_frame(offset, len)?;
            out.write_all(&frame)?;
            moved.push((key, new_len));
            new_len += len;
        }
        out.sync_all()?;
        std::fs::rename(&tmp_path, self.dir.join(SEGMENT_FILE))?;

        self.file = out;
        for (key, offset) in moved {
            if let Some(slot) = self.index.get_mut(&key) {
                slot.offset = offset;
            }
        }

        debug!(
            before = self.file_len,
            after = new_len,
            entries = self.index.len(),
            "Compacted segment"
        );
        self.file_len = new_len;
        self.dead_bytes = 0;
        Ok(())
    }
}

// =============================================================================
// Segment Tier
// =============================================================================

/// Fast persistent tier over an append-only segment log
pub struct SegmentTier {
    state: Arc<Mutex<Segment>>,
    entries: AtomicU64,
    size_bytes: AtomicU64,
}

impl SegmentTier {
    /// Open (or create) the segment under `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let segment = tokio::task::spawn_blocking(move || {
            Segment::open(&dir).map_err(|e| Error::unavailable(TierKind::Fast, format!("{}: {}", dir.display(), e)))
        })
        .await
        .map_err(|e| Error::unavailable(TierKind::Fast, e))??;

        let tier = Self {
            entries: AtomicU64::new(segment.index.len() as u64),
            size_bytes: AtomicU64::new(segment.live_bytes),
            state: Arc::new(Mutex::new(segment)),
        };
        Ok(tier)
    }

    /// Minimum log size before compaction is considered
    pub fn set_compaction_floor(&self, bytes: u64) {
        self.state.lock().compaction_floor = bytes;
    }

    /// Current log file length in bytes
    pub fn file_len(&self) -> u64 {
        self.state.lock().file_len
    }

    /// Compact the log now
    pub async fn compact(&self) -> Result<()> {
        self.with_segment(|segment| segment.compact()).await
    }

    async fn with_segment<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Segment) -> Result<R> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let (result, entries, size_bytes) = tokio::task::spawn_blocking(move || {
            let mut segment = state.lock();
            let result = f(&mut segment);
            (result, segment.index.len() as u64, segment.live_bytes)
        })
        .await
        .map_err(|e| Error::Internal(format!("segment task failed: {}", e)))?;

        self.entries.store(entries, Ordering::Relaxed);
        self.size_bytes.store(size_bytes, Ordering::Relaxed);
        result
    }
}

#[async_trait]
impl Tier for SegmentTier {
    fn kind(&self) -> TierKind {
        TierKind::Fast
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_segment(move |segment| segment.read(&key, true)).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_segment(move |segment| segment.read(&key, false)).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<bool> {
        self.with_segment(move |segment| segment.put(entry)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_segment(move |segment| segment.delete(&key)).await
    }

    async fn delete_if_unchanged(&self, key: &str, sequence: u64) -> Result<bool> {
        let key = key.to_string();
        self.with_segment(move |segment| segment.delete_if_unchanged(&key, sequence))
            .await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_segment(move |segment| Ok(segment.index.contains_key(&key)))
            .await
    }

    async fn scan(&self) -> Result<Vec<EntrySummary>> {
        self.with_segment(|segment| {
            Ok(segment
                .index
                .values()
                .map(|slot| slot.summary.clone())
                .collect())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_segment(|segment| segment.clear()).await
    }

    fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed) as usize
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}
