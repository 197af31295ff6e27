//! Persistent facility query cache
//!
//! Entries live in memory behind a read-write lock and are appended to a
//! JSON-lines file as they are created. The file is only ever appended to
//! during a run; [`QueryCache::compact`] rewrites it atomically.
//!
//! The cache never fails a run: a missing, unreadable or partially corrupt
//! file degrades to whatever could be read, and a failed append switches the
//! cache to memory-only for the rest of the run.

pub mod key;

pub use key::FacilityQueryKey;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Cache I/O errors
///
/// Only surfaced by explicit maintenance calls; lookups and inserts absorb
/// them and degrade.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("cache I/O error: {0}")]
    Io(String),

    /// Entry could not be serialized
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// One facility returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityItem {
    /// OSM element id
    pub id: i64,
    /// OSM element type (node, way, relation)
    pub element_type: String,
    /// Name tag, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Latitude (element center for ways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Longitude (element center for ways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// Cached result of one facility query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Query identity
    pub key: FacilityQueryKey,
    /// Number of facilities returned
    pub facility_count: u32,
    /// Returned items, when raw item storage is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_items: Option<Vec<FacilityItem>>,
    /// When the query was answered
    pub fetched_at: DateTime<Utc>,
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Lines skipped while loading
    pub corrupt_lines: u64,
}

/// Facility query cache shared by all workers
pub struct QueryCache {
    entries: RwLock<HashMap<FacilityQueryKey, CacheEntry>>,
    path: Option<PathBuf>,
    writer: Mutex<Option<File>>,
    persistence_failed: AtomicBool,
    needs_compaction: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt_lines: u64,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

impl QueryCache {
    /// Cache that is never persisted
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
            writer: Mutex::new(None),
            persistence_failed: AtomicBool::new(false),
            needs_compaction: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            corrupt_lines: 0,
        }
    }

    /// Open (or create) a cache file
    ///
    /// Never fails: problems are logged and the cache starts with whatever
    /// entries could be recovered.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = Self::in_memory();

        let (entries, corrupt, duplicates, readable) = match load_entries(&path) {
            Ok((entries, corrupt, duplicates)) => (entries, corrupt, duplicates, true),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cache file unreadable, starting empty");
                (HashMap::new(), 0, 0, false)
            }
        };
        if corrupt > 0 {
            warn!(
                path = %path.display(),
                corrupt_lines = corrupt,
                "Skipped malformed cache lines"
            );
        }
        cache.corrupt_lines = corrupt;
        cache
            .needs_compaction
            .store(corrupt > 0 || duplicates > 0, Ordering::Relaxed);
        info!(path = %path.display(), entries = entries.len(), "Query cache opened");
        cache.entries = RwLock::new(entries);

        if !readable {
            // Never append to or compact over a file we could not read back
            cache.persistence_failed.store(true, Ordering::Relaxed);
            cache.path = Some(path);
            return cache;
        }

        match open_append(&path) {
            Ok(file) => cache.writer = Mutex::new(Some(file)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Cache file not writable, continuing memory-only"
                );
                cache.persistence_failed.store(true, Ordering::Relaxed);
            }
        }
        cache.path = Some(path);
        cache
    }

    /// Look up a key
    pub fn get(&self, key: &FacilityQueryKey) -> Option<CacheEntry> {
        let entry = self.entries.read().get(key).cloned();
        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup(true);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_lookup(false);
        }
        entry
    }

    /// Whether a key is present, without touching hit counters
    pub fn contains(&self, key: &FacilityQueryKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Insert an entry
    ///
    /// Idempotent: concurrent writers of the same key are last-writer-wins
    /// in memory, and a key already present is not appended again.
    pub fn put(&self, entry: CacheEntry) {
        let previous = self.entries.write().insert(entry.key.clone(), entry.clone());
        if previous.is_none() {
            self.append(&entry);
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Backing file, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether appends are still reaching disk
    pub fn is_persistent(&self) -> bool {
        self.path.is_some() && !self.persistence_failed.load(Ordering::Relaxed)
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt_lines: self.corrupt_lines,
        }
    }

    /// Drop entries whose predicate version is not in `active`
    ///
    /// Returns the number of entries removed.
    pub fn retain_versions(&self, active: &HashSet<String>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| active.contains(&key.predicate_version));
        let removed = before - entries.len();
        if removed > 0 {
            self.needs_compaction.store(true, Ordering::Relaxed);
            info!(removed, "Dropped cache entries from retired predicate versions");
        }
        removed
    }

    /// Drop every entry of one predicate version
    pub fn invalidate(&self, predicate_version: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.predicate_version != predicate_version);
        let removed = before - entries.len();
        if removed > 0 {
            self.needs_compaction.store(true, Ordering::Relaxed);
            info!(removed, predicate_version, "Invalidated cache entries");
        }
        removed
    }

    /// Whether the file holds stale, duplicate or corrupt lines
    pub fn needs_compaction(&self) -> bool {
        self.needs_compaction.load(Ordering::Relaxed)
    }

    /// Rewrite the cache file with one line per live entry
    ///
    /// Written to a temp file in the same directory, synced, then renamed
    /// over the original.
    pub fn compact(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.persistence_failed.load(Ordering::Relaxed) {
            debug!(path = %path.display(), "Cache is memory-only, skipping compaction");
            return Ok(());
        }

        let mut writer = self.writer.lock();
        let entries = self.entries.read();

        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent_dir).map_err(|e| CacheError::Io(e.to_string()))?;
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create temp file: {e}")))?;

        for entry in entries.values() {
            let line = serde_json::to_string(entry)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            temp_file
                .write_all(line.as_bytes())
                .and_then(|_| temp_file.write_all(b"\n"))
                .map_err(|e| CacheError::Io(format!("Failed to write temp file: {e}")))?;
        }
        temp_file
            .flush()
            .map_err(|e| CacheError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CacheError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| CacheError::Io(format!("Failed to persist temp file: {e}")))?;

        *writer = open_append(path).ok();
        if writer.is_none() {
            self.persistence_failed.store(true, Ordering::Relaxed);
        }
        self.needs_compaction.store(false, Ordering::Relaxed);

        info!(path = %path.display(), entries = entries.len(), "Query cache compacted");
        Ok(())
    }

    fn append(&self, entry: &CacheEntry) {
        if self.persistence_failed.load(Ordering::Relaxed) {
            return;
        }
        let mut guard = self.writer.lock();
        let Some(file) = guard.as_mut() else {
            return;
        };

        let result = serde_json::to_string(entry)
            .map_err(|e| e.to_string())
            .and_then(|mut line| {
                line.push('\n');
                file.write_all(line.as_bytes()).map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            warn!(error = %e, "Cache append failed, continuing memory-only");
            self.persistence_failed.store(true, Ordering::Relaxed);
            *guard = None;
        } else {
            debug!(key = %entry.key, "Cache entry persisted");
        }
    }
}

type LoadedEntries = (HashMap<FacilityQueryKey, CacheEntry>, u64, u64);

fn load_entries(path: &Path) -> Result<LoadedEntries, CacheError> {
    let mut entries = HashMap::new();
    let mut corrupt = 0u64;
    let mut duplicates = 0u64;

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((entries, corrupt, duplicates))
        }
        Err(e) => return Err(CacheError::Io(e.to_string())),
    };

    for line in BufReader::new(file).split(b'\n') {
        let line = line.map_err(|e| CacheError::Io(e.to_string()))?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<CacheEntry>(&line) {
            Ok(entry) => {
                if entries.insert(entry.key.clone(), entry).is_some() {
                    duplicates += 1;
                }
            }
            Err(_) => corrupt += 1,
        }
    }
    Ok((entries, corrupt, duplicates))
}

/// Open for append, terminating a torn last line so new entries start clean
fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
    }
    Ok(file)
}
