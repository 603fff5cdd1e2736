// Primary block store: append-only blocks addressed by number
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sled::Tree;
use tracing::{debug, info};

use super::sled_store::SledStore;
use crate::config::BlockStoreSettings;
use crate::ledger::Block;
use crate::primitives::{BlockNumber, HistoryError, Result};

/// Read side of the primary block store as consumed by the history index
pub trait BlockStore: Send + Sync {
    fn retrieve_block_by_number(&self, block_num: BlockNumber) -> Result<Block>;

    /// Highest stored block number, `None` while the store is empty
    fn last_block_number(&self) -> Result<Option<BlockNumber>>;
}

/// Sled-backed block store for one ledger
pub struct SledBlockStore {
    ledger_id: String,
    store: SledStore,
    blocks: Tree,
    settings: BlockStoreSettings,
    appended: AtomicU64,
}

impl SledBlockStore {
    fn new(store: SledStore, ledger_id: &str, settings: BlockStoreSettings) -> Result<Self> {
        let blocks = store.open_tree(&format!("blocks/{}", ledger_id))?;
        Ok(Self {
            ledger_id: ledger_id.to_string(),
            store,
            blocks,
            settings,
            appended: AtomicU64::new(0),
        })
    }

    pub fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Append the next block. Numbers must be contiguous and the block must
    /// link to the current tip by hash.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        if !block.verify_data_hash() {
            return Err(HistoryError::InvalidBlock(format!(
                "block {} data hash does not match its transactions",
                block.number()
            )));
        }

        match self.last_block()? {
            Some(tip) => {
                let expected = tip.number() + 1;
                if block.number() != expected {
                    return Err(HistoryError::InvalidBlock(format!(
                        "expected block {}, got {}",
                        expected,
                        block.number()
                    )));
                }
                if block.header.previous_hash != tip.hash() {
                    return Err(HistoryError::InvalidBlock(format!(
                        "block {} does not link to block {}",
                        block.number(),
                        tip.number()
                    )));
                }
            }
            None if block.number() > 1 => {
                return Err(HistoryError::InvalidBlock(format!(
                    "first block must be 0 or 1, got {}",
                    block.number()
                )));
            }
            None => {}
        }

        let serialized = bincode::serialize(block).map_err(|e| {
            HistoryError::Serialization(format!("Block serialization failed: {}", e))
        })?;
        self.blocks
            .insert(block.number().to_be_bytes(), serialized)
            .map_err(|e| HistoryError::Storage(format!("Failed to put block: {}", e)))?;

        debug!(
            "Stored block {} with {} transactions in ledger {}",
            block.number(),
            block.transactions.len(),
            self.ledger_id
        );

        let appended = self.appended.fetch_add(1, Ordering::SeqCst) + 1;
        let every = self.settings.flush_every_blocks;
        if every > 0 && appended % every == 0 {
            self.store.flush()?;
        }

        Ok(())
    }

    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    fn last_block(&self) -> Result<Option<Block>> {
        match self
            .blocks
            .last()
            .map_err(|e| HistoryError::Storage(format!("Failed to read block tip: {}", e)))?
        {
            Some((_, data)) => Ok(Some(decode_block(&data)?)),
            None => Ok(None),
        }
    }
}

impl BlockStore for SledBlockStore {
    fn retrieve_block_by_number(&self, block_num: BlockNumber) -> Result<Block> {
        let data = self
            .blocks
            .get(block_num.to_be_bytes())
            .map_err(|e| HistoryError::Storage(format!("Failed to get block: {}", e)))?
            .ok_or(HistoryError::BlockNotFound(block_num))?;
        decode_block(&data)
    }

    fn last_block_number(&self) -> Result<Option<BlockNumber>> {
        match self
            .blocks
            .last()
            .map_err(|e| HistoryError::Storage(format!("Failed to read block tip: {}", e)))?
        {
            Some((key, _)) => {
                let bytes: [u8; 8] = key[..].try_into().map_err(|_| {
                    HistoryError::Storage(format!("Corrupt block key of {} bytes", key.len()))
                })?;
                Ok(Some(BlockNumber::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}

fn decode_block(data: &[u8]) -> Result<Block> {
    bincode::deserialize(data)
        .map_err(|e| HistoryError::Serialization(format!("Block deserialization failed: {}", e)))
}

/// Opens block stores, one per ledger, on top of a single sled database
pub struct BlockStoreProvider {
    store: SledStore,
    settings: BlockStoreSettings,
    open_stores: Mutex<HashMap<String, Arc<SledBlockStore>>>,
}

impl BlockStoreProvider {
    pub fn open(path: impl AsRef<Path>, settings: BlockStoreSettings) -> Result<Self> {
        let store = SledStore::open(path)?;
        Ok(Self::with_store(store, settings))
    }

    pub fn with_store(store: SledStore, settings: BlockStoreSettings) -> Self {
        Self {
            store,
            settings,
            open_stores: Mutex::new(HashMap::new()),
        }
    }

    /// Open the ledger's block store, or return the already open handle
    pub fn open_block_store(&self, ledger_id: &str) -> Result<Arc<SledBlockStore>> {
        let mut open_stores = self
            .open_stores
            .lock()
            .map_err(|_| HistoryError::Storage("block store registry poisoned".to_string()))?;

        if let Some(existing) = open_stores.get(ledger_id) {
            return Ok(existing.clone());
        }

        let block_store = Arc::new(SledBlockStore::new(
            self.store.clone(),
            ledger_id,
            self.settings.clone(),
        )?);
        info!("Opened block store for ledger {}", ledger_id);
        open_stores.insert(ledger_id.to_string(), block_store.clone());
        Ok(block_store)
    }

    pub fn list_ledgers(&self) -> Vec<String> {
        self.store
            .tree_names()
            .into_iter()
            .filter_map(|name| name.strip_prefix("blocks/").map(str::to_string))
            .collect()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
