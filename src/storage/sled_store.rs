// Sled database wrapper shared by the block store and the history index
use std::path::{Path, PathBuf};

use sled::{Db, Tree};
use tracing::{debug, info};

use crate::primitives::{HistoryError, Result};

const DEFAULT_TREE: &[u8] = b"__sled__default";

/// Handle to one sled database directory.
///
/// Cloning is cheap and every clone talks to the same database.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .map_err(|e| HistoryError::Storage(format!("Failed to create directory: {}", e)))?;

        let db = sled::open(path)
            .map_err(|e| HistoryError::Storage(format!("Failed to open Sled database: {}", e)))?;

        info!("Opened sled database at {}", path.display());
        Ok(Self {
            db,
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory database removed on drop
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open().map_err(|e| {
            HistoryError::Storage(format!("Failed to open temporary database: {}", e))
        })?;

        Ok(Self { db, path: None })
    }

    pub fn open_tree(&self, name: &str) -> Result<Tree> {
        debug!("Opening tree {}", name);
        self.db
            .open_tree(name)
            .map_err(|e| HistoryError::Storage(format!("Failed to open {} tree: {}", name, e)))
    }

    /// Names of all user trees, sorted
    pub fn tree_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter(|name| name.as_ref() != DEFAULT_TREE)
            .map(|name| String::from_utf8_lossy(&name).into_owned())
            .collect();
        names.sort();
        names
    }

    /// Tree count and on-disk footprint of the whole database
    pub fn stats(&self) -> Result<DatabaseStats> {
        let size_on_disk = self
            .db
            .size_on_disk()
            .map_err(|e| HistoryError::Storage(format!("Failed to read database size: {}", e)))?;

        Ok(DatabaseStats {
            trees: self.tree_names().len(),
            size_on_disk,
        })
    }

    /// Sync database to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| HistoryError::Storage(format!("Failed to sync database: {}", e)))?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub trees: usize,
    pub size_on_disk: u64,
}
