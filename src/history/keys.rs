//! Composite keys for history index entries.
//!
//! Layout:
//!
//! ```text
//! u32 BE len(ns) | ns | u32 BE len(key) | key | u64 BE block_num | u64 BE tran_num
//! ```
//!
//! Every (namespace, key) pair owns the prefix up to and including `key`.
//! Lengths make that prefix unambiguous, and the big-endian coordinates make
//! byte order equal commit order, so one forward range scan over the prefix
//! yields a key's full history oldest first.

use crate::primitives::{BlockNumber, HistoryError, Result, TranNumber};

const LEN_SIZE: usize = 4;
const COORD_SIZE: usize = 8;

/// Decoded form of an index entry key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryKey {
    pub namespace: String,
    pub key: String,
    pub block_num: BlockNumber,
    pub tran_num: TranNumber,
}

/// Fails with `MalformedKey` when the namespace or key does not fit a u32 length
pub fn encode(
    namespace: &str,
    key: &str,
    block_num: BlockNumber,
    tran_num: TranNumber,
) -> Result<Vec<u8>> {
    let mut encoded = key_prefix(namespace, key)?;
    encoded.reserve(2 * COORD_SIZE);
    encoded.extend_from_slice(&block_num.to_be_bytes());
    encoded.extend_from_slice(&tran_num.to_be_bytes());
    Ok(encoded)
}

pub fn decode(bytes: &[u8]) -> Result<HistoryKey> {
    let mut cursor = bytes;
    let namespace = read_segment(&mut cursor, "namespace")?;
    let key = read_segment(&mut cursor, "key")?;
    let block_num = read_u64(&mut cursor, "block number")?;
    let tran_num = read_u64(&mut cursor, "tran number")?;

    if !cursor.is_empty() {
        return Err(HistoryError::MalformedKey(format!(
            "{} trailing bytes after tran number",
            cursor.len()
        )));
    }

    Ok(HistoryKey {
        namespace,
        key,
        block_num,
        tran_num,
    })
}

/// Half-open interval `[low, high)` holding exactly the entries of one key
pub fn range_bounds(namespace: &str, key: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let low = key_prefix(namespace, key)?;
    let high = prefix_successor(&low);
    Ok((low, high))
}

fn key_prefix(namespace: &str, key: &str) -> Result<Vec<u8>> {
    let mut prefix =
        Vec::with_capacity(2 * LEN_SIZE + namespace.len() + key.len() + 2 * COORD_SIZE);
    push_segment(&mut prefix, namespace.as_bytes(), "namespace")?;
    push_segment(&mut prefix, key.as_bytes(), "key")?;
    Ok(prefix)
}

fn push_segment(buf: &mut Vec<u8>, segment: &[u8], field: &str) -> Result<()> {
    let len = segment_len(segment.len(), field)?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(segment);
    Ok(())
}

fn segment_len(len: usize, field: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        HistoryError::MalformedKey(format!(
            "{} of {} bytes exceeds the u32 length field",
            field, len
        ))
    })
}

/// Smallest byte string greater than every string starting with `prefix`.
///
/// The prefix always begins with a length field below `u32::MAX`, so at
/// least one byte can be incremented.
fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut successor = prefix.to_vec();
    while let Some(last) = successor.pop() {
        if last < u8::MAX {
            successor.push(last + 1);
            return successor;
        }
    }
    vec![u8::MAX; prefix.len() + 1]
}

fn read_segment(cursor: &mut &[u8], field: &str) -> Result<String> {
    let len_bytes = take(cursor, LEN_SIZE, field)?;
    let mut len = [0u8; LEN_SIZE];
    len.copy_from_slice(len_bytes);
    let len = u32::from_be_bytes(len) as usize;

    let raw = take(cursor, len, field)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| HistoryError::MalformedKey(format!("{} is not valid UTF-8: {}", field, e)))
}

fn read_u64(cursor: &mut &[u8], field: &str) -> Result<u64> {
    let raw = take(cursor, COORD_SIZE, field)?;
    let mut buf = [0u8; COORD_SIZE];
    buf.copy_from_slice(raw);
    Ok(u64::from_be_bytes(buf))
}

fn take<'a>(cursor: &mut &'a [u8], n: usize, field: &str) -> Result<&'a [u8]> {
    if cursor.len() < n {
        return Err(HistoryError::MalformedKey(format!(
            "truncated {}: need {} bytes, have {}",
            field,
            n,
            cursor.len()
        )));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}
