// Core primitives shared by the ledger model and the history index
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type BlockNumber = u64;
/// Position of a transaction inside its block
pub type TranNumber = u64;

/// SHA-256 digest used for block data hashes and chaining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn zero() -> Self {
        Hash256([0u8; 32])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Hash256 {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_data(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash256(hasher.finalize().into())
}
