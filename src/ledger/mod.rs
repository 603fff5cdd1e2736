// Ledger data model: blocks, envelopes and read/write sets

pub mod block;
pub mod rwset;

pub use block::{
    Block, BlockHeader, BlockMetadata, ConfigTransaction, TransactionEnvelope,
    TransactionPayload, TxValidationCode,
};
pub use rwset::{KvRead, KvWrite, NsReadWriteSet, RwSetBuilder, TxReadWriteSet, Version};
