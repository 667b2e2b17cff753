//! Storage backends for content-addressed chunks.
//!
//! Provides a ChunkStore trait and multiple implementations:
//! - MemoryChunkStore: In-memory storage using a HashMap
//! - FileSystemChunkStore: Persistent storage using the filesystem
//! - CachedFSChunkStore: Filesystem storage with LRU cache

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::chunk::ChunkId;
use crate::error::{StoreError, StoreResult};

/// Protocol for chunk storage backends.
///
/// Identifiers are always derived from content, so putting the same bytes
/// twice is a no-op and a chunk is durable before its identifier is returned.
pub trait ChunkStore: Send + Sync {
    /// Store a block and return its content identifier.
    fn put_chunk(&self, data: Vec<u8>) -> StoreResult<ChunkId>;

    /// Retrieve a block by identifier. Returns None if not found.
    /// Returns Arc to avoid copying blocks on retrieval.
    fn get_chunk(&self, id: &ChunkId) -> StoreResult<Option<Arc<Vec<u8>>>>;

    /// Whether a block is present.
    fn has_chunk(&self, id: &ChunkId) -> StoreResult<bool> {
        Ok(self.get_chunk(id)?.is_some())
    }

    /// Delete a block. Returns true if deleted, false if not found.
    fn delete_chunk(&self, id: &ChunkId) -> StoreResult<bool>;

    /// All identifiers in the store.
    fn list_chunks(&self) -> StoreResult<Vec<ChunkId>>;

    /// Return the total number of blocks in storage.
    fn count_chunks(&self) -> StoreResult<usize> {
        Ok(self.list_chunks()?.len())
    }
}

/// In-memory chunk storage using a HashMap.
#[derive(Debug, Clone)]
pub struct MemoryChunkStore {
    chunks: Arc<Mutex<HashMap<ChunkId, Arc<Vec<u8>>>>>,
}

impl MemoryChunkStore {
    /// Create a new in-memory chunk store.
    pub fn new() -> Self {
        MemoryChunkStore {
            chunks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put_chunk(&self, data: Vec<u8>) -> StoreResult<ChunkId> {
        let id = ChunkId::digest(&data);
        let mut chunks = self.chunks.lock()?;
        chunks.entry(id).or_insert_with(|| Arc::new(data));
        Ok(id)
    }

    fn get_chunk(&self, id: &ChunkId) -> StoreResult<Option<Arc<Vec<u8>>>> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.get(id).cloned())
    }

    fn delete_chunk(&self, id: &ChunkId) -> StoreResult<bool> {
        let mut chunks = self.chunks.lock()?;
        Ok(chunks.remove(id).is_some())
    }

    fn list_chunks(&self) -> StoreResult<Vec<ChunkId>> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.keys().copied().collect())
    }

    fn count_chunks(&self) -> StoreResult<usize> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.len())
    }
}

/// File system-based chunk storage.
pub struct FileSystemChunkStore {
    base_path: PathBuf,
}

impl FileSystemChunkStore {
    /// Initialize filesystem storage.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory to store chunks in
    pub fn new(base_path: impl AsRef<Path>) -> StoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        Ok(FileSystemChunkStore { base_path })
    }

    /// Get the file path for a chunk identifier.
    fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        let hex_id = id.to_string();
        // First 2 hex chars as subdirectory keeps directories small
        self.base_path.join(&hex_id[..2]).join(hex_id)
    }
}

impl ChunkStore for FileSystemChunkStore {
    fn put_chunk(&self, data: Vec<u8>) -> StoreResult<ChunkId> {
        let id = ChunkId::digest(&data);
        let path = self.chunk_path(&id);
        if path.exists() {
            return Ok(id);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        // Write under a temporary name so a reader never sees a torn chunk
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;

        Ok(id)
    }

    fn get_chunk(&self, id: &ChunkId) -> StoreResult<Option<Arc<Vec<u8>>>> {
        let path = self.chunk_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(Arc::new(data)))
    }

    fn has_chunk(&self, id: &ChunkId) -> StoreResult<bool> {
        Ok(self.chunk_path(id).exists())
    }

    fn delete_chunk(&self, id: &ChunkId) -> StoreResult<bool> {
        let path = self.chunk_path(id);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn list_chunks(&self) -> StoreResult<Vec<ChunkId>> {
        let mut chunks = Vec::new();
        for entry in fs::read_dir(&self.base_path)?.flatten() {
            let subdir_path = entry.path();
            if !subdir_path.is_dir() {
                continue;
            }
            for subentry in fs::read_dir(&subdir_path)?.flatten() {
                let file_path = subentry.path();
                if !file_path.is_file() {
                    continue;
                }
                // Skips leftover temporary files too
                if let Some(id) = file_path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| ChunkId::parse(name).ok())
                {
                    chunks.push(id);
                }
            }
        }
        Ok(chunks)
    }
}

/// Filesystem storage with LRU cache for frequently accessed chunks.
pub struct CachedFSChunkStore {
    fs_store: FileSystemChunkStore,
    cache_size: usize,
    cache: Arc<Mutex<LruCache>>,
}

impl CachedFSChunkStore {
    /// Initialize cached filesystem storage.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory to store chunks in
    /// * `cache_size` - Maximum number of chunks to keep in memory cache
    pub fn new(base_path: impl AsRef<Path>, cache_size: usize) -> StoreResult<Self> {
        Ok(CachedFSChunkStore {
            fs_store: FileSystemChunkStore::new(base_path)?,
            cache_size,
            cache: Arc::new(Mutex::new(LruCache::new(cache_size))),
        })
    }

    /// Get cache statistics.
    pub fn get_cache_stats(&self) -> StoreResult<CacheStats> {
        let cache = self.cache.lock()?;
        let total_requests = cache.cache_hits + cache.cache_misses;
        let hit_rate = if total_requests > 0 {
            (cache.cache_hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        Ok(CacheStats {
            cache_size: cache.items.len(),
            max_cache_size: self.cache_size,
            cache_hits: cache.cache_hits,
            cache_misses: cache.cache_misses,
            cache_evictions: cache.cache_evictions,
            hit_rate,
        })
    }
}

impl ChunkStore for CachedFSChunkStore {
    fn put_chunk(&self, data: Vec<u8>) -> StoreResult<ChunkId> {
        let id = ChunkId::digest(&data);

        // Cached means it already reached the filesystem
        {
            let mut cache = self.cache.lock()?;
            if cache.contains(&id) {
                cache.touch(&id);
                return Ok(id);
            }
        }

        let data = Arc::new(data);
        self.fs_store.put_chunk(data.as_ref().clone())?;

        let mut cache = self.cache.lock()?;
        cache.put(id, data);
        Ok(id)
    }

    fn get_chunk(&self, id: &ChunkId) -> StoreResult<Option<Arc<Vec<u8>>>> {
        {
            let mut cache = self.cache.lock()?;
            if let Some(data) = cache.get(id) {
                return Ok(Some(data));
            }
            cache.cache_misses += 1;
        }

        let data = match self.fs_store.get_chunk(id)? {
            Some(data) => data,
            None => return Ok(None),
        };

        let mut cache = self.cache.lock()?;
        cache.put(*id, data.clone());
        Ok(Some(data))
    }

    fn delete_chunk(&self, id: &ChunkId) -> StoreResult<bool> {
        {
            let mut cache = self.cache.lock()?;
            cache.remove(id);
        }
        self.fs_store.delete_chunk(id)
    }

    fn list_chunks(&self) -> StoreResult<Vec<ChunkId>> {
        self.fs_store.list_chunks()
    }
}

/// LRU cache implementation using a HashMap and access timestamps
struct LruCache {
    items: HashMap<ChunkId, (Arc<Vec<u8>>, usize)>, // (data, timestamp)
    next_timestamp: usize,
    max_size: usize,
    cache_hits: usize,
    cache_misses: usize,
    cache_evictions: usize,
}

impl LruCache {
    fn new(max_size: usize) -> Self {
        LruCache {
            items: HashMap::new(),
            next_timestamp: 0,
            max_size,
            cache_hits: 0,
            cache_misses: 0,
            cache_evictions: 0,
        }
    }

    fn contains(&self, key: &ChunkId) -> bool {
        self.items.contains_key(key)
    }

    fn tick(&mut self) -> usize {
        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;
        timestamp
    }

    fn touch(&mut self, key: &ChunkId) {
        let timestamp = self.tick();
        if let Some(entry) = self.items.get_mut(key) {
            entry.1 = timestamp;
        }
    }

    fn get(&mut self, key: &ChunkId) -> Option<Arc<Vec<u8>>> {
        let timestamp = self.tick();
        let entry = self.items.get_mut(key)?;
        entry.1 = timestamp;
        self.cache_hits += 1;
        Some(entry.0.clone())
    }

    fn put(&mut self, key: ChunkId, value: Arc<Vec<u8>>) {
        if self.max_size == 0 {
            return;
        }
        let timestamp = self.tick();

        if !self.items.contains_key(&key) && self.items.len() >= self.max_size {
            // Evict oldest item (lowest timestamp)
            let oldest_key = self
                .items
                .iter()
                .min_by_key(|(_, (_, timestamp))| *timestamp)
                .map(|(key, _)| *key);
            if let Some(oldest_key) = oldest_key {
                self.items.remove(&oldest_key);
                self.cache_evictions += 1;
            }
        }
        self.items.insert(key, (value, timestamp));
    }

    fn remove(&mut self, key: &ChunkId) {
        self.items.remove(key);
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_evictions: usize,
    pub hit_rate: f64,
}

/// Create a chunk store from a specification string.
///
/// # Arguments
///
/// * `spec` - Store specification, one of:
///   - `:memory:` - in-memory storage
///   - `file:///path/to/dir` - filesystem storage
///   - `cached-file:///path/to/dir` - cached filesystem storage
/// * `cache_size` - Cache size for cached stores (default: 1000)
pub fn create_store_from_spec(
    spec: &str,
    cache_size: Option<usize>,
) -> StoreResult<Arc<dyn ChunkStore>> {
    if spec == ":memory:" {
        Ok(Arc::new(MemoryChunkStore::new()))
    } else if let Some(path) = spec.strip_prefix("cached-file://") {
        Ok(Arc::new(CachedFSChunkStore::new(
            path,
            cache_size.unwrap_or(1000),
        )?))
    } else if let Some(path) = spec.strip_prefix("file://") {
        Ok(Arc::new(FileSystemChunkStore::new(path)?))
    } else {
        Err(StoreError::Other(format!("Invalid store spec: {}", spec)))
    }
}
