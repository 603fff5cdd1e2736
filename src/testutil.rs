//! Deterministic block construction for tests, demos and tooling.
//!
//! Two generators fed the same inputs produce byte-identical blocks, which
//! lets tests compare independently built ledgers.

use chrono::{DateTime, Utc};

use crate::ledger::{
    Block, ConfigTransaction, RwSetBuilder, TransactionEnvelope, TransactionPayload,
    TxReadWriteSet,
};
use crate::primitives::{hash_data, BlockNumber, Hash256};

const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// Builds a chain of linked blocks starting at block 1
#[derive(Debug, Clone)]
pub struct BlockGenerator {
    next_number: BlockNumber,
    previous_hash: Hash256,
}

impl BlockGenerator {
    pub fn new() -> Self {
        Self::starting_at(1, Hash256::zero())
    }

    pub fn starting_at(next_number: BlockNumber, previous_hash: Hash256) -> Self {
        Self {
            next_number,
            previous_hash,
        }
    }

    pub fn next_number(&self) -> BlockNumber {
        self.next_number
    }

    /// One endorser transaction per simulation result, in the given order
    pub fn next_block(&mut self, simulation_results: Vec<TxReadWriteSet>) -> Block {
        let number = self.next_number;
        let transactions = simulation_results
            .into_iter()
            .enumerate()
            .map(|(idx, rwset)| TransactionEnvelope {
                tx_id: tx_id_for(number, idx),
                timestamp: timestamp_for(number),
                payload: TransactionPayload::Endorser(rwset),
            })
            .collect();
        self.seal(transactions)
    }

    /// One transaction per `(namespace, key, value)` write
    pub fn next_block_with_writes(&mut self, writes: &[(&str, &str, &str)]) -> Block {
        let results = writes
            .iter()
            .map(|(namespace, key, value)| {
                let mut builder = RwSetBuilder::new();
                builder.set_state(namespace, key, value.as_bytes().to_vec());
                builder.build()
            })
            .collect();
        self.next_block(results)
    }

    /// Block holding a single configuration transaction
    pub fn next_config_block(&mut self, channel_id: &str) -> Block {
        let number = self.next_number;
        let tx = TransactionEnvelope {
            tx_id: tx_id_for(number, 0),
            timestamp: timestamp_for(number),
            payload: TransactionPayload::Config(ConfigTransaction {
                channel_id: channel_id.to_string(),
                config_data: channel_id.as_bytes().to_vec(),
            }),
        };
        self.seal(vec![tx])
    }

    fn seal(&mut self, transactions: Vec<TransactionEnvelope>) -> Block {
        let block = Block::new(self.next_number, self.previous_hash, transactions);
        self.previous_hash = block.hash();
        self.next_number += 1;
        block
    }
}

impl Default for BlockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Genesis block (number 0) carrying the channel configuration
pub fn make_genesis_block(channel_id: &str) -> Block {
    BlockGenerator::starting_at(0, Hash256::zero()).next_config_block(channel_id)
}

fn tx_id_for(block_num: BlockNumber, idx: usize) -> String {
    hash_data(format!("{}:{}", block_num, idx).as_bytes()).to_hex()
}

fn timestamp_for(block_num: BlockNumber) -> DateTime<Utc> {
    let secs = BASE_TIMESTAMP + i64::try_from(block_num).unwrap_or(i64::MAX - BASE_TIMESTAMP);
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}
