//! Ledger configuration.
//!
//! `LedgerConfig` is the on-disk JSON configuration. `HistoryConfig` is the
//! runtime switch for history indexing; it is handed to every history handle
//! and read once per operation, so flipping it takes effect on the next
//! commit or query without reopening anything.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::primitives::{HistoryError, Result};

const HISTORY_DIR: &str = "history";
const BLOCK_STORE_DIR: &str = "chains";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Root directory for all ledger data
    pub fs_path: PathBuf,
    pub history: HistorySettings,
    pub block_store: BlockStoreSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub enable_history_database: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockStoreSettings {
    /// Flush the block store every N appended blocks; 0 disables periodic flushing
    pub flush_every_blocks: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fs_path: PathBuf::from("./data"),
            history: HistorySettings::default(),
            block_store: BlockStoreSettings::default(),
        }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            enable_history_database: true,
        }
    }
}

impl Default for BlockStoreSettings {
    fn default() -> Self {
        Self {
            flush_every_blocks: 100,
        }
    }
}

impl LedgerConfig {
    pub fn with_fs_path(fs_path: impl Into<PathBuf>) -> Self {
        Self {
            fs_path: fs_path.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            HistoryError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        info!(
            "Loaded ledger config from {} (history enabled: {})",
            path.display(),
            config.history.enable_history_database
        );
        Ok(config)
    }

    pub fn history_path(&self) -> PathBuf {
        self.fs_path.join(HISTORY_DIR)
    }

    pub fn block_store_path(&self) -> PathBuf {
        self.fs_path.join(BLOCK_STORE_DIR)
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig::new(self.history.enable_history_database)
    }
}

/// Shared, togglable "history indexing enabled" flag.
///
/// Clones observe the same flag. Independent instances do not, which is how
/// two handles with different settings coexist in one process.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    enabled: Arc<AtomicBool>,
}

impl HistoryConfig {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn enabled() -> Self {
        Self::new(true)
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self::enabled()
    }
}
