// Savepoint: last block whose history entries are fully indexed
use sled::{Batch, Tree};

use crate::primitives::{BlockNumber, HistoryError, Result};

/// Fixed key of the savepoint record.
///
/// Every index entry is at least 24 bytes and every entry range starts with
/// an 8-byte prefix, so this single byte can neither collide with an entry
/// nor appear inside a history scan.
pub const SAVEPOINT_KEY: &[u8] = &[0x00];

#[derive(Clone)]
pub struct SavepointStore {
    tree: Tree,
}

impl SavepointStore {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Last indexed block number, 0 when nothing has been indexed yet
    pub fn get(&self) -> Result<BlockNumber> {
        Ok(self.get_raw()?.unwrap_or(0))
    }

    /// Savepoint as stored; `None` distinguishes a fresh index from block 0
    pub fn get_raw(&self) -> Result<Option<BlockNumber>> {
        let value = self
            .tree
            .get(SAVEPOINT_KEY)
            .map_err(|e| HistoryError::Storage(format!("Failed to read savepoint: {}", e)))?;

        match value {
            Some(bytes) => {
                let raw: [u8; 8] = bytes[..].try_into().map_err(|_| {
                    HistoryError::Storage(format!("Corrupt savepoint of {} bytes", bytes.len()))
                })?;
                Ok(Some(BlockNumber::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Stage the savepoint into the caller's batch; nothing is written until
    /// the batch is applied.
    pub fn set_in_batch(batch: &mut Batch, block_num: BlockNumber) {
        batch.insert(SAVEPOINT_KEY, block_num.to_be_bytes().to_vec());
    }
}
