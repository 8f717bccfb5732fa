//! L3 Disk Tier - Durable Storage
//!
//! Larger, slower persistent tier storing one file per entry.
//!
//! # Design
//!
//! - File name is the FxHash of the key (`{hash:016x}.entry`)
//! - Writes go to a temp file and are renamed into place
//! - DashMap index rebuilt on open; undecodable files are deleted
//! - The stored key is checked on read, so a hash collision is a miss

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, warn};

use super::entry::{fx_hash, observe_sequence, CacheEntry, EntrySummary};
use super::tier::{Tier, TierKind};
use crate::error::{Error, Result};

const ENTRY_EXT: &str = "entry";
const TEMP_EXT: &str = "tmp";

#[derive(Debug, Clone)]
struct DiskSlot {
    hash: u64,
    summary: EntrySummary,
}

/// Durable tier with one file per entry
pub struct DiskTier {
    dir: PathBuf,
    index: DashMap<String, DiskSlot>,
    /// file hash -> owning key
    owners: DashMap<u64, String>,
    size_bytes: AtomicU64,
    /// Serializes mutations so the sequence check and the write are atomic
    write_lock: tokio::sync::Mutex<()>,
}

async fn read_entry(path: &Path) -> Result<CacheEntry> {
    let bytes = fs::read(path).await?;
    bincode::deserialize(&bytes).map_err(|e| Error::corrupt(TierKind::Durable, format!("{}: {}", path.display(), e)))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove entry file");
        }
    }
}

impl DiskTier {
    /// Open (or create) the tier under `dir` and rebuild its index
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        Self::probe(&dir)
            .await
            .map_err(|e| Error::unavailable(TierKind::Durable, format!("{}: {}", dir.display(), e)))?;

        let tier = Self {
            dir,
            index: DashMap::new(),
            owners: DashMap::new(),
            size_bytes: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        };
        tier.load().await?;
        Ok(tier)
    }

    /// Make sure the directory exists and is writable
    async fn probe(dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir).await?;
        let probe = dir.join(".probe");
        fs::write(&probe, b"").await?;
        fs::remove_file(&probe).await
    }

    async fn load(&self) -> Result<()> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::unavailable(TierKind::Durable, e))?;

        let mut removed = 0usize;
        while let Some(dent) = dir.next_entry().await? {
            let path = dent.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(ENTRY_EXT) => {}
                Some(TEMP_EXT) => {
                    remove_quietly(&path).await;
                    continue;
                }
                _ => continue,
            }

            match read_entry(&path).await {
                Ok(entry) if path == self.path_for(fx_hash(entry.key().as_bytes())) => {
                    observe_sequence(entry.sequence());
                    self.install(entry.key().to_string(), entry.summary());
                }
                Ok(_) => {
                    remove_quietly(&path).await;
                    removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Removing corrupt entry file");
                    remove_quietly(&path).await;
                    removed += 1;
                }
            }
        }

        debug!(
            dir = %self.dir.display(),
            entries = self.index.len(),
            removed,
            "Opened disk tier"
        );
        Ok(())
    }

    fn path_for(&self, hash: u64) -> PathBuf {
        self.dir.join(format!("{:016x}.{}", hash, ENTRY_EXT))
    }

    /// Record `key` as the owner of its file, displacing any colliding key
    fn install(&self, key: String, summary: EntrySummary) {
        let hash = fx_hash(key.as_bytes());
        if let Some(previous) = self.owners.insert(hash, key.clone()) {
            if previous != key {
                self.forget_slot(&previous);
            }
        }

        let added = summary.size_bytes;
        if let Some(old) = self.index.insert(key, DiskSlot { hash, summary }) {
            self.size_bytes.fetch_sub(old.summary.size_bytes, Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
    }

    fn forget_slot(&self, key: &str) -> Option<DiskSlot> {
        let (_, slot) = self.index.remove(key)?;
        self.size_bytes.fetch_sub(slot.summary.size_bytes, Ordering::Relaxed);
        Some(slot)
    }

    fn forget(&self, key: &str) -> Option<DiskSlot> {
        let slot = self.forget_slot(key)?;
        self.owners.remove_if(&slot.hash, |_, owner| owner == key);
        Some(slot)
    }

    async fn read(&self, key: &str, record_access: bool) -> Result<Option<CacheEntry>> {
        let hash = match self.index.get(key) {
            Some(slot) => slot.hash,
            None => return Ok(None),
        };
        let path = self.path_for(hash);

        match read_entry(&path).await {
            Ok(mut entry) if entry.key() == key => {
                if let Some(mut slot) = self.index.get_mut(key) {
                    if record_access {
                        slot.summary.record_access();
                    }
                    entry.apply_access(&slot.summary);
                }
                Ok(Some(entry))
            }
            Ok(_) => {
                self.forget(key);
                Ok(None)
            }
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget(key);
                Ok(None)
            }
            Err(e) if e.is_corruption() => {
                let _guard = self.write_lock.lock().await;
                if self.forget(key).is_some() {
                    remove_quietly(&path).await;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Tier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.read(key, true).await
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.read(key, false).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let current = self.index.get(entry.key()).map(|slot| slot.summary.sequence);
        if current.is_some_and(|sequence| sequence > entry.sequence()) {
            return Ok(false);
        }

        let bytes = bincode::serialize(&entry).map_err(|e| Error::Serialization(e.to_string()))?;
        let path = self.path_for(fx_hash(entry.key().as_bytes()));
        let tmp = path.with_extension(format!("{}.{}", ENTRY_EXT, TEMP_EXT));

        if let Err(e) = fs::write(&tmp, &bytes).await {
            remove_quietly(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            remove_quietly(&tmp).await;
            return Err(e.into());
        }

        self.install(entry.key().to_string(), entry.summary());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match self.forget(key) {
            Some(slot) => {
                remove_quietly(&self.path_for(slot.hash)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_if_unchanged(&self, key: &str, sequence: u64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let unchanged = self
            .index
            .get(key)
            .is_some_and(|slot| slot.summary.sequence == sequence);
        if !unchanged {
            return Ok(false);
        }
        match self.forget(key) {
            Some(slot) => {
                remove_quietly(&self.path_for(slot.hash)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.index.contains_key(key))
    }

    async fn scan(&self) -> Result<Vec<EntrySummary>> {
        Ok(self
            .index
            .iter()
            .map(|slot| slot.summary.clone())
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let hashes: Vec<u64> = self.index.iter().map(|slot| slot.hash).collect();
        self.index.clear();
        self.owners.clear();
        self.size_bytes.store(0, Ordering::Relaxed);

        for hash in hashes {
            remove_quietly(&self.path_for(hash)).await;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}
