//! Configuration for versioned collections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::change::ChangeMethod;
use crate::error::{VersionError, VersionResult};
use crate::store::{create_store_from_spec, ChunkStore};
use crate::tree::DEFAULT_DEGREE;

pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 50;
pub const DEFAULT_CACHE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// B-tree degree of new collections
    pub degree: usize,
    /// Bound on chain walks and merge nesting
    pub max_chain_depth: usize,
    /// Change methods accepted from remote statements
    pub allowed_changes: BTreeSet<ChangeMethod>,
    /// Chunk store spec: `:memory:`, `file:///path` or `cached-file:///path`
    pub store: String,
    /// Cache entries for `cached-file://` stores
    pub cache_size: usize,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        VersioningConfig {
            degree: DEFAULT_DEGREE,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            allowed_changes: ChangeMethod::ALL.into_iter().collect(),
            store: ":memory:".to_string(),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl VersioningConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    ///
    /// An unreadable or invalid file yields the default config.
    pub fn load<P: AsRef<Path>>(path: P) -> VersioningConfig {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                VersioningConfig::default()
            }
        }
    }

    pub fn try_load<P: AsRef<Path>>(path: P) -> VersionResult<VersioningConfig> {
        let data = fs::read(path.as_ref()).map_err(|e| {
            VersionError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let config: VersioningConfig = serde_json::from_slice(&data)
            .map_err(|e| VersionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VersionResult<()> {
        if self.degree < 3 {
            return Err(VersionError::InvalidConfig(format!(
                "degree must be at least 3, got {}",
                self.degree
            )));
        }
        if self.max_chain_depth == 0 {
            return Err(VersionError::InvalidConfig(
                "max_chain_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn allows(&self, method: ChangeMethod) -> bool {
        self.allowed_changes.contains(&method)
    }

    /// Open the chunk store this config names.
    pub fn open_store(&self) -> VersionResult<Arc<dyn ChunkStore>> {
        Ok(create_store_from_spec(&self.store, Some(self.cache_size))?)
    }
}
