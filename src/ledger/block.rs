// Block structures as committed by the ledger
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::rwset::TxReadWriteSet;
use crate::primitives::{BlockNumber, Hash256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<TransactionEnvelope>,
    pub metadata: BlockMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub previous_hash: Hash256,
    pub data_hash: Hash256,
}

/// Per-transaction validation outcome recorded by the committer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxValidationCode {
    Valid,
    MvccReadConflict,
    PhantomReadConflict,
    EndorsementPolicyFailure,
    BadPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// One flag per transaction; an empty list means every transaction is valid
    pub tx_validation_flags: Vec<TxValidationCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: TransactionPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionPayload {
    /// Chaincode invocation carrying its simulation results
    Endorser(TxReadWriteSet),
    /// Configuration update (including the genesis block); no write-set
    Config(ConfigTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTransaction {
    pub channel_id: String,
    pub config_data: Vec<u8>,
}

impl Block {
    pub fn new(
        number: BlockNumber,
        previous_hash: Hash256,
        transactions: Vec<TransactionEnvelope>,
    ) -> Self {
        let data_hash = Self::compute_data_hash(&transactions);
        Self {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash,
            },
            transactions,
            metadata: BlockMetadata::default(),
        }
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.header.number.to_be_bytes());
        hasher.update(self.header.previous_hash.0);
        hasher.update(self.header.data_hash.0);
        Hash256(hasher.finalize().into())
    }

    pub fn transaction(&self, tran_num: u64) -> Option<&TransactionEnvelope> {
        usize::try_from(tran_num)
            .ok()
            .and_then(|idx| self.transactions.get(idx))
    }

    pub fn is_tx_valid(&self, tran_num: usize) -> bool {
        self.metadata
            .tx_validation_flags
            .get(tran_num)
            .map_or(true, |code| *code == TxValidationCode::Valid)
    }

    /// True when no transaction carries a chaincode write-set
    pub fn is_config_only(&self) -> bool {
        self.transactions.iter().all(|tx| tx.write_set().is_none())
    }

    pub fn compute_data_hash(transactions: &[TransactionEnvelope]) -> Hash256 {
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update((tx.tx_id.len() as u64).to_be_bytes());
            hasher.update(tx.tx_id.as_bytes());
        }
        Hash256(hasher.finalize().into())
    }

    pub fn verify_data_hash(&self) -> bool {
        self.header.data_hash == Self::compute_data_hash(&self.transactions)
    }
}

impl TransactionEnvelope {
    pub fn write_set(&self) -> Option<&TxReadWriteSet> {
        match &self.payload {
            TransactionPayload::Endorser(rwset) => Some(rwset),
            TransactionPayload::Config(_) => None,
        }
    }
}
