pub mod add;
pub mod archive;
pub mod index;
pub mod list;
pub mod reconcile;
pub mod search;
pub mod stats;

use std::path::PathBuf;

use anyhow::{Context, Result};
use memstore::config::ENV_MEMORY_DIR;
use memstore::{MemoryConfig, StorageManager};

/// Resolve config and open the store. The binary owns the embedding backend.
pub fn open_store(dir: Option<PathBuf>) -> Result<StorageManager> {
    let config = MemoryConfig::load_with(|key| {
        if key == ENV_MEMORY_DIR {
            if let Some(ref dir) = dir {
                return Some(dir.to_string_lossy().to_string());
            }
        }
        std::env::var(key).ok()
    })
    .context("Failed to load configuration")?;

    let root = config.memory_dir.clone();
    StorageManager::open_with_config(config)
        .with_context(|| format!("Failed to open memory store at {}", root.display()))
}

/// Truncate for display (char-aware)
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}

/// Collapse newlines so a snippet fits on one line
pub fn snippet(content: &str, max_chars: usize) -> String {
    truncate(&content.split_whitespace().collect::<Vec<_>>().join(" "), max_chars)
}
