//! File-backed storage for lists, cache metadata, cached feed bodies and the
//! user config.
//!
//! Layout:
//!
//! ```text
//! <config_dir>/config.json
//! <config_dir>/lists/<list>          "<unix> <url>" per line
//! <cache_dir>/cache_info             "<url> <unix> <etag> <unix>" per line
//! <cache_dir>/feed_<escaped url>     last fetched body
//! ```
//!
//! Whole files are rewritten through a temp file and renamed into place.

mod cache;
mod config;
mod list;

use crate::traits::Clock;
use crate::types::{AggregatorError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const LISTS_DIR: &str = "lists";

/// Environment variable that relocates both storage roots under one directory.
pub const HOME_ENV: &str = "FEED_READER_HOME";

pub struct LocalStorage {
    config_dir: PathBuf,
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl LocalStorage {
    pub fn new(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config_dir: config_dir.into(),
            cache_dir: cache_dir.into(),
            clock,
        }
    }

    /// Resolves the storage roots from `FEED_READER_HOME`, falling back to the
    /// platform config and cache directories.
    pub fn from_env(name: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            let home = PathBuf::from(home);
            return Ok(Self::new(home.join("config"), home.join("cache"), clock));
        }
        let config_base = dirs::config_dir()
            .ok_or_else(|| AggregatorError::General("no config directory available".to_string()))?;
        let cache_base = dirs::cache_dir()
            .ok_or_else(|| AggregatorError::General("no cache directory available".to_string()))?;
        Ok(Self::new(config_base.join(name), cache_base.join(name), clock))
    }

    /// Creates the directory layout and a default config when missing.
    pub fn init(&self, version: &str) -> Result<()> {
        fs::create_dir_all(self.lists_dir())?;
        fs::create_dir_all(&self.cache_dir)?;
        let mut config = self.load_config()?;
        if config.version != version {
            config.version = version.to_string();
            self.save_config(&config)?;
        }
        debug!("Storage ready at {:?} / {:?}", self.config_dir, self.cache_dir);
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn lists_dir(&self) -> PathBuf {
        self.config_dir.join(LISTS_DIR)
    }

    fn list_path(&self, list: &str) -> Result<PathBuf> {
        validate_list_name(list)?;
        Ok(self.lists_dir().join(list))
    }
}

fn validate_list_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(AggregatorError::InvalidListName(name.to_string()));
    }
    Ok(())
}

/// Replaces `path` with `contents` so readers never observe a partial file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AggregatorError::General(format!("no parent directory for {:?}", path)))?;
    fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
