// History database handles and crash recovery
use std::path::Path;
use std::sync::Arc;

use sled::Tree;
use tracing::{debug, info, warn};

use super::commit::CommitProcessor;
use super::query::HistoryQueryExecutor;
use super::savepoint::{SavepointStore, SAVEPOINT_KEY};
use crate::config::HistoryConfig;
use crate::ledger::Block;
use crate::primitives::{BlockNumber, HistoryError, Result};
use crate::storage::{BlockStore, DatabaseStats, SledStore};

const TREE_PREFIX: &str = "history/";

/// Opens per-ledger history databases inside one sled database
pub struct HistoryDbProvider {
    store: SledStore,
    config: HistoryConfig,
}

impl HistoryDbProvider {
    pub fn open(path: impl AsRef<Path>, config: HistoryConfig) -> Result<Self> {
        let store = SledStore::open(path)?;
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: SledStore, config: HistoryConfig) -> Self {
        Self { store, config }
    }

    pub fn get_db_handle(&self, ledger_id: &str) -> Result<HistoryDb> {
        let tree = self.store.open_tree(&format!("{}{}", TREE_PREFIX, ledger_id))?;
        Ok(HistoryDb::new(ledger_id, tree, self.config.clone()))
    }

    pub fn list_ledgers(&self) -> Vec<String> {
        self.store
            .tree_names()
            .into_iter()
            .filter_map(|name| name.strip_prefix(TREE_PREFIX).map(str::to_string))
            .collect()
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        self.store.stats()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Flush and release this provider's handle on the database
    pub fn close(self) -> Result<()> {
        self.store.flush()?;
        match self.store.path() {
            Some(path) => info!("Closed history database at {}", path.display()),
            None => info!("Closed temporary history database"),
        }
        Ok(())
    }
}

/// History index of a single ledger
#[derive(Clone)]
pub struct HistoryDb {
    ledger_id: String,
    tree: Tree,
    savepoints: SavepointStore,
    processor: CommitProcessor,
    config: HistoryConfig,
}

impl HistoryDb {
    pub fn new(ledger_id: &str, tree: Tree, config: HistoryConfig) -> Self {
        Self {
            ledger_id: ledger_id.to_string(),
            savepoints: SavepointStore::new(tree.clone()),
            processor: CommitProcessor::new(ledger_id, tree.clone(), config.clone()),
            tree,
            config,
        }
    }

    pub fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Handle on the same ledger governed by a different switch
    pub fn with_config(&self, config: HistoryConfig) -> HistoryDb {
        HistoryDb::new(&self.ledger_id, self.tree.clone(), config)
    }

    pub fn commit(&self, block: &Block) -> Result<()> {
        self.processor.commit(block)
    }

    pub fn get_block_num_from_savepoint(&self) -> Result<BlockNumber> {
        self.savepoints.get()
    }

    pub fn new_history_query_executor(
        &self,
        block_store: Arc<dyn BlockStore>,
    ) -> HistoryQueryExecutor {
        HistoryQueryExecutor::new(self.tree.clone(), self.config.clone(), block_store)
    }

    /// Number of history entries, excluding the savepoint record
    pub fn entry_count(&self) -> Result<usize> {
        let has_savepoint = self
            .tree
            .contains_key(SAVEPOINT_KEY)
            .map_err(|e| HistoryError::Storage(format!("Failed to read savepoint: {}", e)))?;
        Ok(self.tree.len() - usize::from(has_savepoint))
    }

    /// First block to re-index if the index lags `last_available_block`.
    ///
    /// `None` when caught up, or while history is disabled. On an index that
    /// has never committed anything this is block 0, even for ledgers whose
    /// block store starts at block 1.
    pub fn should_recover(&self, last_available_block: BlockNumber) -> Result<Option<BlockNumber>> {
        if !self.config.is_enabled() {
            return Ok(None);
        }

        match self.savepoints.get_raw()? {
            Some(savepoint) if savepoint >= last_available_block => Ok(None),
            Some(savepoint) => Ok(Some(savepoint + 1)),
            None => Ok(Some(0)),
        }
    }

    /// Index a block the index missed, e.g. one lost in a crash
    pub fn commit_lost_block(&self, block: &Block) -> Result<()> {
        info!(
            "Recommitting lost block {} to history for ledger {}",
            block.number(),
            self.ledger_id
        );
        self.commit(block)
    }

    /// Replay every block the block store has but the index lacks.
    ///
    /// Returns the number of blocks indexed.
    pub fn recover_from(&self, block_store: &dyn BlockStore) -> Result<u64> {
        let Some(last_available) = block_store.last_block_number()? else {
            debug!("Block store for ledger {} is empty, nothing to recover", self.ledger_id);
            return Ok(0);
        };
        let Some(first_missing) = self.should_recover(last_available)? else {
            return Ok(0);
        };

        warn!(
            "History for ledger {} lags the block store, re-indexing blocks {} to {}",
            self.ledger_id, first_missing, last_available
        );

        let mut recovered = 0;
        for block_num in first_missing..=last_available {
            let block = match block_store.retrieve_block_by_number(block_num) {
                Ok(block) => block,
                // Ledgers without a genesis block start at 1
                Err(HistoryError::BlockNotFound(0)) if block_num == 0 => continue,
                Err(e) => return Err(e),
            };
            self.commit_lost_block(&block)?;
            recovered += 1;
        }

        info!(
            "Recovered {} blocks into history for ledger {}",
            recovered, self.ledger_id
        );
        Ok(recovered)
    }
}
