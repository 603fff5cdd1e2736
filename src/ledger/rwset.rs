// Transaction read/write sets produced by simulation
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::primitives::{BlockNumber, TranNumber};

/// Version of a key observed during simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub block_num: BlockNumber,
    pub tran_num: TranNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRead {
    pub key: String,
    pub version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvWrite {
    pub key: String,
    pub is_delete: bool,
    pub value: Vec<u8>,
}

/// Reads and writes of one transaction inside a single namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsReadWriteSet {
    pub namespace: String,
    pub reads: Vec<KvRead>,
    pub writes: Vec<KvWrite>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReadWriteSet {
    pub ns_rw_sets: Vec<NsReadWriteSet>,
}

impl TxReadWriteSet {
    /// The write this transaction made to `key` in `namespace`, if any.
    ///
    /// A write-set holds each key at most once per namespace, but should a
    /// malformed set repeat a key the last write wins, matching the order in
    /// which the writes would have been applied to state.
    pub fn find_write(&self, namespace: &str, key: &str) -> Option<&KvWrite> {
        self.ns_rw_sets
            .iter()
            .filter(|ns| ns.namespace == namespace)
            .flat_map(|ns| ns.writes.iter())
            .filter(|w| w.key == key)
            .last()
    }
}

#[derive(Debug, Default)]
struct NsBuilder {
    reads: BTreeMap<String, Option<Version>>,
    writes: BTreeMap<String, KvWrite>,
}

/// Accumulates the effects of a simulated transaction.
///
/// Namespaces and keys come out sorted, and a key written twice keeps only
/// its final value, so the same simulation always yields the same set.
#[derive(Debug, Default)]
pub struct RwSetBuilder {
    namespaces: BTreeMap<String, NsBuilder>,
}

impl RwSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&mut self, namespace: &str, key: &str, version: Option<Version>) -> &mut Self {
        self.ns(namespace).reads.insert(key.to_string(), version);
        self
    }

    pub fn set_state(
        &mut self,
        namespace: &str,
        key: &str,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        let write = KvWrite {
            key: key.to_string(),
            is_delete: false,
            value: value.into(),
        };
        self.ns(namespace).writes.insert(key.to_string(), write);
        self
    }

    pub fn delete_state(&mut self, namespace: &str, key: &str) -> &mut Self {
        let write = KvWrite {
            key: key.to_string(),
            is_delete: true,
            value: Vec::new(),
        };
        self.ns(namespace).writes.insert(key.to_string(), write);
        self
    }

    pub fn build(self) -> TxReadWriteSet {
        let ns_rw_sets = self
            .namespaces
            .into_iter()
            .map(|(namespace, ns)| NsReadWriteSet {
                namespace,
                reads: ns
                    .reads
                    .into_iter()
                    .map(|(key, version)| KvRead { key, version })
                    .collect(),
                writes: ns.writes.into_values().collect(),
            })
            .collect();

        TxReadWriteSet { ns_rw_sets }
    }

    fn ns(&mut self, namespace: &str) -> &mut NsBuilder {
        self.namespaces.entry(namespace.to_string()).or_default()
    }
}
