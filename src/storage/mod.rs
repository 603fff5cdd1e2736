// Storage layer: sled database handle and the primary block store
pub mod block_store;
pub mod sled_store;

pub use block_store::*;
pub use sled_store::*;
