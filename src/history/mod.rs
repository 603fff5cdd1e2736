// Key-history index: composite keys, savepoint, commit and query paths
pub mod commit;
pub mod db;
pub mod keys;
pub mod query;
pub mod savepoint;

pub use commit::{block_write_events, tx_write_events, CommitProcessor, WriteEvent};
pub use db::{HistoryDb, HistoryDbProvider};
pub use keys::HistoryKey;
pub use query::{HistoryQueryExecutor, HistoryScanner, KeyModification};
pub use savepoint::SavepointStore;
