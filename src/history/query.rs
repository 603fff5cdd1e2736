//! History queries.
//!
//! The index only records where a key was written. A [`HistoryScanner`]
//! walks those coordinates in commit order and, one entry per `next()`,
//! fetches the originating block from the primary block store to recover
//! the transaction id and the value written.

use std::iter::FusedIterator;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Tree;
use tracing::{debug, warn};

use super::keys;
use crate::config::HistoryConfig;
use crate::ledger::{KvWrite, TransactionEnvelope};
use crate::primitives::{HistoryError, Result};
use crate::storage::BlockStore;

/// One historical value of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: String,
    /// Empty for deletes
    #[serde(with = "hex")]
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub is_delete: bool,
}

impl KeyModification {
    pub fn new(tx: &TransactionEnvelope, write: &KvWrite) -> Self {
        Self {
            tx_id: tx.tx_id.clone(),
            value: if write.is_delete { Vec::new() } else { write.value.clone() },
            timestamp: tx.timestamp,
            is_delete: write.is_delete,
        }
    }
}

/// Answers history queries for one ledger
#[derive(Clone)]
pub struct HistoryQueryExecutor {
    tree: Tree,
    config: HistoryConfig,
    block_store: Arc<dyn BlockStore>,
}

impl HistoryQueryExecutor {
    pub fn new(tree: Tree, config: HistoryConfig, block_store: Arc<dyn BlockStore>) -> Self {
        Self {
            tree,
            config,
            block_store,
        }
    }

    /// All writes to `(namespace, key)`, oldest first
    pub fn get_history_for_key(&self, namespace: &str, key: &str) -> Result<HistoryScanner> {
        if !self.config.is_enabled() {
            return Err(HistoryError::HistoryDisabled);
        }

        let (low, high) = keys::range_bounds(namespace, key)?;
        debug!("Scanning history for {}:{}", namespace, key);

        Ok(HistoryScanner {
            namespace: namespace.to_string(),
            key: key.to_string(),
            entries: Some(self.tree.range(low..high)),
            block_store: self.block_store.clone(),
        })
    }
}

/// Lazy, forward-only walk over a key's history.
///
/// Once it has returned `None` it keeps doing so; query again to rescan.
pub struct HistoryScanner {
    namespace: String,
    key: String,
    entries: Option<sled::Iter>,
    block_store: Arc<dyn BlockStore>,
}

impl HistoryScanner {
    /// Drain the scanner and return the history most recent first
    pub fn newest_first(self) -> Result<Vec<KeyModification>> {
        let mut history = self.collect::<Result<Vec<_>>>()?;
        history.reverse();
        Ok(history)
    }

    fn resolve(&self, raw_key: &[u8]) -> Result<KeyModification> {
        let entry = keys::decode(raw_key)?;
        if entry.namespace != self.namespace || entry.key != self.key {
            return Err(HistoryError::MalformedKey(format!(
                "entry for {}:{} inside the range of {}:{}",
                entry.namespace, entry.key, self.namespace, self.key
            )));
        }

        let (block_num, tran_num) = (entry.block_num, entry.tran_num);
        let block = self
            .block_store
            .retrieve_block_by_number(block_num)
            .map_err(|e| HistoryError::read_failed(block_num, tran_num, e.to_string()))?;

        let tx = block.transaction(tran_num).ok_or_else(|| {
            HistoryError::read_failed(
                block_num,
                tran_num,
                format!("block has only {} transactions", block.transactions.len()),
            )
        })?;

        tx.write_set()
            .and_then(|rwset| rwset.find_write(&self.namespace, &self.key))
            .map(|write| KeyModification::new(tx, write))
            .ok_or_else(|| {
                HistoryError::read_failed(
                    block_num,
                    tran_num,
                    format!(
                        "transaction {} has no write for {}:{}",
                        tx.tx_id, self.namespace, self.key
                    ),
                )
            })
    }
}

impl Iterator for HistoryScanner {
    type Item = Result<KeyModification>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.entries.as_mut()?.next();
        match next {
            None => {
                self.entries = None;
                None
            }
            Some(Err(e)) => Some(Err(HistoryError::Storage(format!(
                "Failed to scan history index: {}",
                e
            )))),
            Some(Ok((raw_key, _))) => {
                let result = self.resolve(&raw_key);
                if let Err(e) = &result {
                    warn!("History for {}:{} is unreadable: {}", self.namespace, self.key, e);
                }
                Some(result)
            }
        }
    }
}

impl FusedIterator for HistoryScanner {}

impl std::fmt::Debug for HistoryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryScanner")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("exhausted", &self.entries.is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::commit::CommitProcessor;
    use crate::ledger::{Block, RwSetBuilder};
    use crate::primitives::BlockNumber;
    use crate::storage::{BlockStoreProvider, SledStore};
    use crate::config::BlockStoreSettings;
    use crate::testutil::BlockGenerator;

    /// Block store that has lost every block above `available`
    struct TruncatedBlockStore {
        inner: Arc<dyn BlockStore>,
        available: BlockNumber,
    }

    impl BlockStore for TruncatedBlockStore {
        fn retrieve_block_by_number(&self, block_num: BlockNumber) -> Result<Block> {
            if block_num > self.available {
                return Err(HistoryError::BlockNotFound(block_num));
            }
            self.inner.retrieve_block_by_number(block_num)
        }

        fn last_block_number(&self) -> Result<Option<BlockNumber>> {
            Ok(Some(self.available))
        }
    }

    struct Fixture {
        _store: SledStore,
        tree: Tree,
        block_store: Arc<dyn BlockStore>,
    }

    fn fixture(blocks: &[Block]) -> Fixture {
        let store = SledStore::open_temporary().unwrap();
        let tree = store.open_tree("ledger1").unwrap();
        let processor = CommitProcessor::new("ledger1", tree.clone(), HistoryConfig::enabled());
        let provider = BlockStoreProvider::with_store(store.clone(), BlockStoreSettings::default());
        let block_store = provider.open_block_store("ledger1").unwrap();

        for block in blocks {
            block_store.add_block(block).unwrap();
            processor.commit(block).unwrap();
        }

        Fixture {
            _store: store,
            tree,
            block_store,
        }
    }

    fn values(scanner: HistoryScanner) -> Vec<String> {
        scanner
            .map(|m| String::from_utf8(m.unwrap().value).unwrap())
            .collect()
    }

    #[test]
    fn test_history_is_oldest_first() {
        let mut generator = BlockGenerator::new();
        let blocks = vec![
            generator.next_block_with_writes(&[("ns1", "key7", "value1")]),
            generator
                .next_block_with_writes(&[("ns1", "key7", "value2"), ("ns1", "key7", "value3")]),
        ];
        let f = fixture(&blocks);
        let executor = HistoryQueryExecutor::new(f.tree, HistoryConfig::enabled(), f.block_store);

        let scanner = executor.get_history_for_key("ns1", "key7").unwrap();
        assert_eq!(values(scanner), vec!["value1", "value2", "value3"]);

        let newest = executor.get_history_for_key("ns1", "key7").unwrap().newest_first().unwrap();
        let tx_ids: Vec<&str> = newest.iter().map(|m| m.tx_id.as_str()).collect();
        assert_eq!(
            tx_ids,
            vec![
                blocks[1].transactions[1].tx_id.as_str(),
                blocks[1].transactions[0].tx_id.as_str(),
                blocks[0].transactions[0].tx_id.as_str(),
            ]
        );
    }

    #[test]
    fn test_deletes_surface_as_tombstones() {
        let mut generator = BlockGenerator::new();
        let mut delete = RwSetBuilder::new();
        delete.delete_state("ns1", "key1");
        let blocks = vec![
            generator.next_block_with_writes(&[("ns1", "key1", "value1")]),
            generator.next_block(vec![delete.build()]),
        ];
        let f = fixture(&blocks);
        let executor = HistoryQueryExecutor::new(f.tree, HistoryConfig::enabled(), f.block_store);

        let history: Vec<KeyModification> = executor
            .get_history_for_key("ns1", "key1")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_delete);
        assert!(history[1].is_delete);
        assert!(history[1].value.is_empty());
        assert_eq!(history[1].timestamp, blocks[1].transactions[0].timestamp);
    }

    #[test]
    fn test_unknown_key_is_empty_and_scanner_is_fused() {
        let blocks = vec![BlockGenerator::new().next_block_with_writes(&[("ns1", "key1", "v")])];
        let f = fixture(&blocks);
        let executor = HistoryQueryExecutor::new(f.tree, HistoryConfig::enabled(), f.block_store);

        let mut empty = executor.get_history_for_key("ns1", "missing").unwrap();
        assert!(empty.next().is_none());
        assert!(empty.next().is_none());

        let mut scanner = executor.get_history_for_key("ns1", "key1").unwrap();
        assert!(scanner.next().unwrap().is_ok());
        assert!(scanner.next().is_none());
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_disabled_query_fails() {
        let f = fixture(&[]);
        let executor = HistoryQueryExecutor::new(f.tree, HistoryConfig::disabled(), f.block_store);
        assert!(matches!(
            executor.get_history_for_key("ns1", "key7"),
            Err(HistoryError::HistoryDisabled)
        ));
    }

    #[test]
    fn test_missing_block_fails_that_item_only() {
        let mut generator = BlockGenerator::new();
        let blocks = vec![
            generator.next_block_with_writes(&[("ns1", "key1", "value1")]),
            generator.next_block_with_writes(&[("ns1", "key1", "value2")]),
        ];
        let f = fixture(&blocks);
        let truncated = Arc::new(TruncatedBlockStore {
            inner: f.block_store,
            available: 1,
        });
        let executor = HistoryQueryExecutor::new(f.tree, HistoryConfig::enabled(), truncated);

        let mut scanner = executor.get_history_for_key("ns1", "key1").unwrap();
        assert_eq!(scanner.next().unwrap().unwrap().value, b"value1".to_vec());
        assert!(matches!(
            scanner.next(),
            Some(Err(HistoryError::HistoryReadFailed { block_num: 2, tran_num: 0, .. }))
        ));
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_index_pointing_at_wrong_transaction_is_read_failure() {
        let blocks = vec![BlockGenerator::new().next_block_with_writes(&[("ns1", "key1", "v")])];
        let f = fixture(&blocks);
        f.tree.insert(keys::encode("ns1", "ghost", 1, 0).unwrap(), Vec::<u8>::new()).unwrap();
        f.tree.insert(keys::encode("ns1", "key1", 1, 5).unwrap(), Vec::<u8>::new()).unwrap();
        let executor = HistoryQueryExecutor::new(f.tree, HistoryConfig::enabled(), f.block_store);

        let mut ghost = executor.get_history_for_key("ns1", "ghost").unwrap();
        assert!(matches!(ghost.next(), Some(Err(HistoryError::HistoryReadFailed { .. }))));

        let results: Vec<_> = executor.get_history_for_key("ns1", "key1").unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(HistoryError::HistoryReadFailed { tran_num: 5, .. })));
    }

    #[test]
    fn test_key_modification_json_uses_hex_values() {
        let modification = KeyModification {
            tx_id: "tx1".to_string(),
            value: b"hi".to_vec(),
            timestamp: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            is_delete: false,
        };
        let json = serde_json::to_value(&modification).unwrap();
        assert_eq!(json["value"], "6869");
        let back: KeyModification = serde_json::from_value(json).unwrap();
        assert_eq!(back, modification);
    }
}
