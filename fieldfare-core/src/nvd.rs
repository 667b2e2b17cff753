//! Non-volatile descriptor store (NVD).
//!
//! A small key → JSON descriptor store holding the pointers that must survive
//! a restart, such as the current state of each collection.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{StoreError, StoreResult};

pub trait Nvd: Send + Sync {
    /// Whether the store can be used.
    fn available(&self) -> bool {
        true
    }

    fn load(&self, key: &str) -> StoreResult<Option<Value>>;

    fn save(&self, key: &str, descriptor: Value) -> StoreResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryNvd {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryNvd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Nvd for MemoryNvd {
    fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn save(&self, key: &str, descriptor: Value) -> StoreResult<()> {
        self.entries.lock()?.insert(key.to_string(), descriptor);
        Ok(())
    }
}

/// One JSON file per key under a base directory.
#[derive(Debug, Clone)]
pub struct FileSystemNvd {
    base_path: PathBuf,
}

impl FileSystemNvd {
    pub fn new<P: AsRef<Path>>(base_path: P) -> StoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(FileSystemNvd { base_path })
    }

    fn entry_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(StoreError::InvalidIdentifier(format!("NVD key '{}'", key)));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }
}

impl Nvd for FileSystemNvd {
    fn available(&self) -> bool {
        self.base_path.is_dir()
    }

    fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&self, key: &str, descriptor: Value) -> StoreResult<()> {
        let path = self.entry_path(key)?;
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&serde_json::to_vec(&descriptor)?)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_nvd() {
        let nvd = MemoryNvd::new();
        assert!(nvd.available());
        assert_eq!(nvd.load("a").unwrap(), None);
        nvd.save("a", json!({"degree": 5})).unwrap();
        assert_eq!(nvd.load("a").unwrap(), Some(json!({"degree": 5})));
    }

    #[test]
    fn test_filesystem_nvd_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let nvd = FileSystemNvd::new(temp_dir.path()).unwrap();
            nvd.save("0b8e8a62-a1b2-4c3d-9e0f-123456789abc", json!("state")).unwrap();
        }
        let nvd = FileSystemNvd::new(temp_dir.path()).unwrap();
        assert!(nvd.available());
        assert_eq!(
            nvd.load("0b8e8a62-a1b2-4c3d-9e0f-123456789abc").unwrap(),
            Some(json!("state"))
        );
    }

    #[test]
    fn test_filesystem_nvd_rejects_path_keys() {
        let temp_dir = TempDir::new().unwrap();
        let nvd = FileSystemNvd::new(temp_dir.path()).unwrap();
        assert!(matches!(
            nvd.save("../escape", json!(1)),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
