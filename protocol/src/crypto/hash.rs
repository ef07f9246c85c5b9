//! # Hashing Utilities
//!
//! BLAKE3 is the only hash function the consensus core uses: header hashes,
//! transaction codes, state roots and the signing context all go through
//! here.
//!
//! Structured values are hashed over their `bincode` encoding. Bincode is
//! deterministic for the plain structs we feed it (no maps, no floats), so
//! two nodes hashing the same header always agree.

use serde::Serialize;

use crate::types::Hash;

/// BLAKE3 of a byte slice.
///
/// # Example
///
/// ```
/// use strata_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"strata");
/// assert!(!hash.is_zero());
/// ```
pub fn blake3_hash(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// BLAKE3 over the concatenation of several byte slices, without
/// allocating the concatenation.
pub fn blake3_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(*hasher.finalize().as_bytes())
}

/// BLAKE3 over the canonical `bincode` encoding of a value.
///
/// Encoding failures only happen for types serde cannot represent in
/// bincode (unsized maps and the like), which none of our hashed types are;
/// such a value hashes as the empty input.
pub fn hash_encoded<T: Serialize + ?Sized>(value: &T) -> Hash {
    let encoded = bincode::serialize(value).unwrap_or_default();
    blake3_hash(&encoded)
}

/// Message bound by a consensus signature: `hash || parent_hash`.
///
/// Binding the parent hash stops a vote for one fork being replayed on
/// another fork at the same height.
pub fn signing_message(hash: &Hash, parent_hash: &Hash) -> Hash {
    blake3_concat(&[hash.as_bytes(), parent_hash.as_bytes()])
}

/// Binary Merkle root over a list of leaf hashes.
///
/// Odd nodes are promoted unchanged. An empty list has the zero root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => blake3_concat(&[left.as_bytes(), right.as_bytes()]),
                [single] => *single,
                _ => Hash::ZERO,
            })
            .collect();
    }
    level[0]
}
