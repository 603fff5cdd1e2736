// Block commit path: write events -> index entries + savepoint, one batch
use chrono::{DateTime, Utc};
use sled::{Batch, Tree};
use tracing::{debug, error};

use super::keys;
use super::savepoint::SavepointStore;
use crate::config::HistoryConfig;
use crate::ledger::{Block, TransactionEnvelope};
use crate::primitives::{BlockNumber, HistoryError, Result, TranNumber};

/// A single key write (or delete) as found in a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent<'a> {
    pub namespace: &'a str,
    pub key: &'a str,
    /// `None` for deletes
    pub value: Option<&'a [u8]>,
    pub tx_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub block_num: BlockNumber,
    pub tran_num: TranNumber,
}

impl WriteEvent<'_> {
    pub fn index_key(&self) -> Result<Vec<u8>> {
        keys::encode(self.namespace, self.key, self.block_num, self.tran_num)
    }
}

/// Write events of one transaction, in write-set order.
///
/// Configuration transactions carry no write-set and yield nothing.
pub fn tx_write_events<'a>(
    block_num: BlockNumber,
    tran_num: TranNumber,
    tx: &'a TransactionEnvelope,
) -> impl Iterator<Item = WriteEvent<'a>> + 'a {
    tx.write_set()
        .into_iter()
        .flat_map(|rwset| rwset.ns_rw_sets.iter())
        .flat_map(move |ns| {
            ns.writes.iter().map(move |write| WriteEvent {
                namespace: &ns.namespace,
                key: &write.key,
                value: (!write.is_delete).then_some(write.value.as_slice()),
                tx_id: &tx.tx_id,
                timestamp: tx.timestamp,
                block_num,
                tran_num,
            })
        })
}

/// Every indexable write event of a block, in block then write-set order.
///
/// Transactions flagged invalid never touched state and are skipped.
pub fn block_write_events(block: &Block) -> impl Iterator<Item = WriteEvent<'_>> + '_ {
    let block_num = block.number();
    block
        .transactions
        .iter()
        .enumerate()
        .filter(move |(idx, _)| block.is_tx_valid(*idx))
        .flat_map(move |(idx, tx)| tx_write_events(block_num, idx as TranNumber, tx))
}

/// Applies blocks to the history index of one ledger
#[derive(Clone)]
pub struct CommitProcessor {
    ledger_id: String,
    tree: Tree,
    savepoints: SavepointStore,
    config: HistoryConfig,
}

impl CommitProcessor {
    pub fn new(ledger_id: &str, tree: Tree, config: HistoryConfig) -> Self {
        Self {
            ledger_id: ledger_id.to_string(),
            savepoints: SavepointStore::new(tree.clone()),
            tree,
            config,
        }
    }

    /// Index `block`. A no-op while history is disabled.
    pub fn commit(&self, block: &Block) -> Result<()> {
        self.commit_with(block, |batch| self.tree.apply_batch(batch))
    }

    /// `commit` with the final batch write supplied by the caller
    pub(crate) fn commit_with<F>(&self, block: &Block, apply: F) -> Result<()>
    where
        F: FnOnce(Batch) -> sled::Result<()>,
    {
        if !self.config.is_enabled() {
            debug!(
                "History disabled, skipping block {} for ledger {}",
                block.number(),
                self.ledger_id
            );
            return Ok(());
        }

        self.check_sequence(block.number())?;

        let (batch, entries) = stage_block(block)?;
        apply(batch).map_err(|e| {
            error!(
                "Failed to commit history for block {} in ledger {}: {}",
                block.number(),
                self.ledger_id,
                e
            );
            HistoryError::IndexCommitFailed(format!("block {}: {}", block.number(), e))
        })?;

        if block.is_config_only() {
            debug!(
                "Config block {} advanced savepoint for ledger {}",
                block.number(),
                self.ledger_id
            );
        } else if entries == 0 {
            debug!(
                "Block {} has no chaincode writes, advanced savepoint for ledger {}",
                block.number(),
                self.ledger_id
            );
        } else {
            debug!(
                "Updated history for block {} in ledger {} ({} entries)",
                block.number(),
                self.ledger_id,
                entries
            );
        }
        Ok(())
    }

    fn check_sequence(&self, block_num: BlockNumber) -> Result<()> {
        let savepoint = self.savepoints.get_raw()?;
        let in_sequence = match savepoint {
            Some(savepoint) => block_num == savepoint + 1,
            // A fresh index starts at the genesis block or, for ledgers
            // without one, at block 1.
            None => block_num <= 1,
        };
        if in_sequence {
            return Ok(());
        }

        let expected = savepoint.map_or(0, |s| s + 1);
        error!(
            "History index for ledger {} diverged from block store: expected block {}, got {}",
            self.ledger_id, expected, block_num
        );
        Err(HistoryError::NonSequentialBlock {
            expected,
            actual: block_num,
        })
    }
}

/// Stage all entries of `block` plus its savepoint into a fresh batch.
///
/// Staging is a pure function of the block, so replaying it after a failed
/// or lost commit writes exactly the same keys.
pub(crate) fn stage_block(block: &Block) -> Result<(Batch, usize)> {
    let mut batch = Batch::default();
    let mut entries = 0;

    for event in block_write_events(block) {
        batch.insert(event.index_key()?, Vec::<u8>::new());
        entries += 1;
    }
    SavepointStore::set_in_batch(&mut batch, block.number());

    Ok((batch, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{RwSetBuilder, TxValidationCode};
    use crate::storage::SledStore;
    use crate::testutil::{make_genesis_block, BlockGenerator};

    fn processor(config: HistoryConfig) -> (SledStore, CommitProcessor) {
        let store = SledStore::open_temporary().unwrap();
        let tree = store.open_tree("ledger1").unwrap();
        let processor = CommitProcessor::new("ledger1", tree, config);
        (store, processor)
    }

    fn dump(tree: &Tree) -> Vec<(Vec<u8>, Vec<u8>)> {
        tree.iter()
            .map(|item| {
                let (k, v) = item.unwrap();
                (k.to_vec(), v.to_vec())
            })
            .collect()
    }

    #[test]
    fn test_block_write_events_order_and_deletes() {
        let mut tx1 = RwSetBuilder::new();
        tx1.set_state("ns1", "b", b"1".to_vec()).set_state("ns1", "a", b"2".to_vec());
        let mut tx2 = RwSetBuilder::new();
        tx2.delete_state("ns2", "a");
        let block = BlockGenerator::new().next_block(vec![tx1.build(), tx2.build()]);

        let events: Vec<_> = block_write_events(&block).collect();
        assert_eq!(events.len(), 3);
        assert_eq!((events[0].key, events[0].tran_num), ("a", 0));
        assert_eq!((events[1].key, events[1].tran_num), ("b", 0));
        assert_eq!((events[2].namespace, events[2].tran_num), ("ns2", 1));
        assert_eq!(events[2].value, None);
        assert_eq!(events[0].tx_id, block.transactions[0].tx_id);
    }

    #[test]
    fn test_invalid_transactions_are_not_indexed() {
        let mut block = BlockGenerator::new()
            .next_block_with_writes(&[("ns1", "key1", "ok"), ("ns1", "key1", "conflict")]);
        block.metadata.tx_validation_flags =
            vec![TxValidationCode::Valid, TxValidationCode::MvccReadConflict];

        let events: Vec<_> = block_write_events(&block).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, Some(&b"ok"[..]));
    }

    #[test]
    fn test_commit_writes_entries_and_savepoint() {
        let (_store, processor) = processor(HistoryConfig::enabled());
        let block = BlockGenerator::new().next_block_with_writes(&[("ns1", "key1", "value1")]);

        processor.commit(&block).unwrap();

        assert_eq!(processor.savepoints.get().unwrap(), 1);
        let key = keys::encode("ns1", "key1", 1, 0).unwrap();
        assert_eq!(processor.tree.get(&key).unwrap().map(|v| v.to_vec()), Some(Vec::new()));
        assert_eq!(processor.tree.len(), 2);
    }

    #[test]
    fn test_commit_disabled_is_noop() {
        let (_store, processor) = processor(HistoryConfig::disabled());
        let block = BlockGenerator::new().next_block_with_writes(&[("ns1", "key1", "value1")]);

        processor.commit(&block).unwrap();
        assert!(processor.tree.is_empty());
        assert_eq!(processor.savepoints.get_raw().unwrap(), None);
    }

    #[test]
    fn test_genesis_block_advances_savepoint_only() {
        let (_store, processor) = processor(HistoryConfig::enabled());

        processor.commit(&make_genesis_block("test_chainid")).unwrap();
        assert_eq!(processor.savepoints.get_raw().unwrap(), Some(0));
        assert_eq!(processor.tree.len(), 1);
    }

    #[test]
    fn test_non_sequential_blocks_are_rejected() {
        let (_store, processor) = processor(HistoryConfig::enabled());
        let mut generator = BlockGenerator::new();
        let block1 = generator.next_block_with_writes(&[("ns1", "k", "v1")]);
        let block2 = generator.next_block_with_writes(&[("ns1", "k", "v2")]);
        let block3 = generator.next_block_with_writes(&[("ns1", "k", "v3")]);

        let err = processor.commit(&block2).unwrap_err();
        assert!(matches!(err, HistoryError::NonSequentialBlock { expected: 0, actual: 2 }));

        processor.commit(&block1).unwrap();
        let err = processor.commit(&block3).unwrap_err();
        assert!(matches!(err, HistoryError::NonSequentialBlock { expected: 2, actual: 3 }));

        let err = processor.commit(&block1).unwrap_err();
        assert!(matches!(err, HistoryError::NonSequentialBlock { expected: 2, actual: 1 }));
        assert!(!err.is_retryable());

        assert_eq!(processor.savepoints.get().unwrap(), 1);
    }

    #[test]
    fn test_restaging_a_block_is_idempotent() {
        let mut generator = BlockGenerator::new();
        let block1 = generator.next_block_with_writes(&[("ns1", "key7", "value1")]);
        let block2 = generator
            .next_block_with_writes(&[("ns1", "key7", "value2"), ("ns1", "key7", "value3")]);

        let (_once_store, once) = processor(HistoryConfig::enabled());
        once.commit(&block1).unwrap();
        once.commit(&block2).unwrap();

        // Replay block 2's batch as a crash-and-retry would.
        let (_twice_store, twice) = processor(HistoryConfig::enabled());
        twice.commit(&block1).unwrap();
        let (first, entries) = stage_block(&block2).unwrap();
        let (second, _) = stage_block(&block2).unwrap();
        twice.tree.apply_batch(first).unwrap();
        twice.tree.apply_batch(second).unwrap();

        assert_eq!(entries, 2);
        assert_eq!(dump(&once.tree), dump(&twice.tree));
    }

    #[test]
    fn test_failed_batch_write_keeps_savepoint() {
        let (_store, processor) = processor(HistoryConfig::enabled());
        let mut generator = BlockGenerator::new();
        let block1 = generator.next_block_with_writes(&[("ns1", "key1", "value1")]);
        let block2 = generator.next_block_with_writes(&[("ns1", "key1", "value2")]);
        processor.commit(&block1).unwrap();

        let err = processor
            .commit_with(&block2, |_| {
                Err(sled::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
            })
            .unwrap_err();

        assert!(matches!(&err, HistoryError::IndexCommitFailed(msg) if msg.contains("disk full")));
        assert!(err.is_retryable());
        assert_eq!(processor.savepoints.get_raw().unwrap(), Some(1));
        assert_eq!(processor.tree.len(), 2);

        // Retrying once storage recovers picks up where the failure left off
        processor.commit(&block2).unwrap();
        assert_eq!(processor.savepoints.get_raw().unwrap(), Some(2));
        assert_eq!(processor.tree.len(), 3);
    }
}
