use anyhow::{Context, Result};
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// A persistent key/value store for tile bytes, keyed by tile URL
pub trait TileStore {
    /// Look up the bytes stored under `key`
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `data` under `key`, replacing any previous value
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Drop every entry
    fn clear(&self) -> Result<()>;
}

/// File-backed tile store: one file per URL, named by the URL's SHA-256
pub struct FsTileStore {
    cache_dir: PathBuf,
}

impl FsTileStore {
    /// Create a new store in the given directory
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)
                .context("Failed to create cache directory")?;
        }

        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the cache path for a URL
    fn get_cache_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        // Keep the extension so cached tiles stay recognisable on disk;
        // the cache-busting query string is not part of it
        let last_segment = url.split(['?', '#']).next().unwrap_or("");
        let extension = last_segment
            .rsplit('/')
            .next()
            .and_then(|s| s.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .unwrap_or("");

        let file_name = if extension.is_empty() {
            hash
        } else {
            format!("{}.{}", hash, extension)
        };

        self.cache_dir.join(file_name)
    }
}

impl TileStore for FsTileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let file_path = self.get_cache_path(key);
        match fs::read(&file_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read cache file {}", file_path.display())),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let file_path = self.get_cache_path(key);

        if let Some(parent) = file_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context("Failed to create parent directories for cache file")?;
            }
        }

        // Write beside the target and rename, so a concurrent reader never
        // sees a half-written tile. The temp file is removed if anything fails.
        let dir = file_path.parent().unwrap_or(&self.cache_dir);
        let mut file = NamedTempFile::new_in(dir)
            .context("Failed to create cache file")?;
        file.write_all(data)
            .context("Failed to write data to cache file")?;
        file.persist(&file_path)
            .context("Failed to move cache file into place")?;

        debug!("Cached {} bytes for {} at {}", data.len(), key, file_path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)
                .context("Failed to remove cache directory")?;
        }
        fs::create_dir_all(&self.cache_dir)
            .context("Failed to recreate cache directory")?;

        Ok(())
    }
}

/// In-process tile store, gone when dropped
#[derive(Default)]
pub struct MemoryTileStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileStore for MemoryTileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("tile store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("tile store lock poisoned"))?;
        entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("tile store lock poisoned"))?;
        entries.clear();
        Ok(())
    }
}
