//! Ledger key-history index.
//!
//! For every committed block the index records where each chaincode key was
//! written, keyed so that one ordered range scan enumerates a key's history
//! in commit order. Values are not duplicated: queries re-read them from the
//! primary block store.
//!
//! ```text
//! Block commit
//!     ↓
//! CommitProcessor ── entries + savepoint ──> sled tree (one atomic batch)
//!
//! get_history_for_key(ns, key)
//!     ↓
//! range scan over the key's entries
//!     ↓ one block fetch per entry
//! BlockStore ──> KeyModification (oldest first)
//! ```

pub mod config;
pub mod history;
pub mod ledger;
pub mod primitives;
pub mod storage;
pub mod testutil;


pub use config::{HistoryConfig, LedgerConfig};
pub use history::{
    HistoryDb, HistoryDbProvider, HistoryQueryExecutor, HistoryScanner, KeyModification,
};
pub use ledger::{Block, TransactionEnvelope, TransactionPayload, TxReadWriteSet};
pub use primitives::{BlockNumber, HistoryError, Result, TranNumber};
pub use storage::{BlockStore, BlockStoreProvider, SledBlockStore};
