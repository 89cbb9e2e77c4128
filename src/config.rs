//! Store configuration
//!
//! Resolution order: built-in defaults, then `config.yaml` in the memory root,
//! then environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::paths::CONFIG_FILE;
use crate::error::{MemoryError, Result};
use crate::search::embedding::{is_known_model, HTP_MODEL_ID};

pub const ENV_MEMORY_DIR: &str = "MEMORY_DIR";
pub const ENV_EMBEDDING_MODEL: &str = "EMBEDDING_MODEL";
pub const ENV_MAX_MEMORY_SIZE_MB: &str = "MAX_MEMORY_SIZE_MB";
pub const ENV_AUTO_ARCHIVE_DAYS: &str = "AUTO_ARCHIVE_DAYS";
pub const ENV_ENABLE_AUTO_INDEXING: &str = "ENABLE_AUTO_INDEXING";

const DEFAULT_DIR_NAME: &str = ".memstore";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Root directory. The location of `config.yaml` wins over this field.
    pub memory_dir: PathBuf,
    pub embedding_model: String,
    /// Soft limit; exceeding it only logs a warning
    pub max_memory_size_mb: u64,
    pub auto_archive_days: u32,
    pub enable_auto_indexing: bool,
    pub index_batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_dir: default_memory_dir(),
            embedding_model: HTP_MODEL_ID.to_string(),
            max_memory_size_mb: 1000,
            auto_archive_days: 90,
            enable_auto_indexing: true,
            index_batch_size: 10,
        }
    }
}

pub fn default_memory_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIR_NAME)
}

impl MemoryConfig {
    /// Resolve from the process environment
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Resolve using `env` as the variable lookup
    pub fn load_with<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = env(ENV_MEMORY_DIR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_memory_dir);

        let mut config = Self::from_root(&root)?;
        config.apply_env(env)?;
        config.resolve_model();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `<root>/config.yaml` when present
    pub fn from_root(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            debug!(path = %path.display(), "reading config file");
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                Self::default()
            } else {
                serde_yaml::from_str(&text)?
            }
        } else {
            Self::default()
        };

        config.memory_dir = root.to_path_buf();
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = env(ENV_EMBEDDING_MODEL).filter(|v| !v.trim().is_empty()) {
            self.embedding_model = model.trim().to_string();
        }
        if let Some(v) = env(ENV_MAX_MEMORY_SIZE_MB) {
            self.max_memory_size_mb = parse_number(ENV_MAX_MEMORY_SIZE_MB, &v)?;
        }
        if let Some(v) = env(ENV_AUTO_ARCHIVE_DAYS) {
            self.auto_archive_days = parse_number(ENV_AUTO_ARCHIVE_DAYS, &v)?;
        }
        if let Some(v) = env(ENV_ENABLE_AUTO_INDEXING) {
            self.enable_auto_indexing = v.trim() != "false";
        }
        Ok(())
    }

    fn resolve_model(&mut self) {
        if !is_known_model(&self.embedding_model) {
            warn!(
                model = %self.embedding_model,
                fallback = HTP_MODEL_ID,
                "unknown embedding model in config, using default"
            );
            self.embedding_model = HTP_MODEL_ID.to_string();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.index_batch_size == 0 {
            return Err(MemoryError::Validation(
                "index_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_size_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        MemoryError::Validation(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}
