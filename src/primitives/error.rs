// Error types for the history index and its collaborators
use thiserror::Error;

use super::primitives::{BlockNumber, TranNumber};

pub type Result<T> = std::result::Result<T, HistoryError>;

#[derive(Error, Debug)]
pub enum HistoryError {
    /// History queries are refused while indexing is switched off
    #[error("History database is disabled")]
    HistoryDisabled,

    /// The atomic batch for a block did not land; the savepoint is unchanged
    #[error("Index commit failed: {0}")]
    IndexCommitFailed(String),

    #[error("History read failed at block {block_num}, tran {tran_num}: {reason}")]
    HistoryReadFailed {
        block_num: BlockNumber,
        tran_num: TranNumber,
        reason: String,
    },

    #[error("Malformed history key: {0}")]
    MalformedKey(String),

    /// Block store and history index have diverged
    #[error("Non-sequential block: expected {expected}, got {actual}")]
    NonSequentialBlock {
        expected: BlockNumber,
        actual: BlockNumber,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Block not found: {0}")]
    BlockNotFound(BlockNumber),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),
}

impl HistoryError {
    /// Whether recommitting the same block may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HistoryError::IndexCommitFailed(_) | HistoryError::Storage(_))
    }

    pub(crate) fn read_failed(
        block_num: BlockNumber,
        tran_num: TranNumber,
        reason: impl Into<String>,
    ) -> Self {
        HistoryError::HistoryReadFailed {
            block_num,
            tran_num,
            reason: reason.into(),
        }
    }
}

/// Conversion from sled::Error to HistoryError
impl From<sled::Error> for HistoryError {
    fn from(err: sled::Error) -> Self {
        HistoryError::Storage(err.to_string())
    }
}

/// Conversion from std::io::Error to HistoryError
impl From<std::io::Error> for HistoryError {
    fn from(err: std::io::Error) -> Self {
        HistoryError::Storage(err.to_string())
    }
}

/// Conversion from bincode::Error to HistoryError
impl From<bincode::Error> for HistoryError {
    fn from(err: bincode::Error) -> Self {
        HistoryError::Serialization(err.to_string())
    }
}

/// Conversion from serde_json::Error to HistoryError
impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        HistoryError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HistoryError::IndexCommitFailed("io".into()).is_retryable());
        assert!(!HistoryError::HistoryDisabled.is_retryable());
        assert!(!HistoryError::NonSequentialBlock { expected: 2, actual: 4 }.is_retryable());
        assert!(!HistoryError::MalformedKey("short".into()).is_retryable());
    }

    #[test]
    fn test_read_failed_message() {
        let err = HistoryError::read_failed(3, 1, "block missing");
        assert_eq!(
            err.to_string(),
            "History read failed at block 3, tran 1: block missing"
        );
    }
}
