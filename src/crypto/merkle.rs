//! Merkle tree over transaction ids
//!
//! Standard binary tree with sha256d pairing. An odd node at any level is
//! paired with itself. The root of an empty list is the all-zero hash,
//! although valid blocks always carry at least a coinbase.

use crate::crypto::hash::{sha256d, Hash256, TxId};

fn pair_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left.as_bytes());
    combined[32..].copy_from_slice(right.as_bytes());
    sha256d(&combined)
}

/// Compute the merkle root of a list of transaction ids.
pub fn merkle_root(txids: &[TxId]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }

    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
            next.push(pair_hash(&pair[0], right));
        }
        level = next;
    }
    level[0]
}
