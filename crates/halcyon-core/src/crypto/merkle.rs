//! Binary Merkle tree over byte slices with inclusion proofs.
//!
//! Leaves and inner nodes are domain separated with a one byte prefix, and the
//! tree is split at the largest power of two strictly below the item count, so
//! the shape of the tree depends only on the number of items.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{hash_blake3, hash_parts, Hash};
use crate::error::CoreError;

const LEAF_PREFIX: &[u8] = &[0];
const INNER_PREFIX: &[u8] = &[1];

/// Root of an empty tree.
pub fn empty_hash() -> Hash {
    hash_blake3(&[])
}

pub fn leaf_hash(leaf: &[u8]) -> Hash {
    hash_parts(&[LEAF_PREFIX, leaf])
}

pub fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    hash_parts(&[INNER_PREFIX, &left.0[..], &right.0[..]])
}

fn split_point(length: usize) -> usize {
    let bits = usize::BITS - length.leading_zeros();
    let k = 1usize << (bits - 1);
    if k == length {
        k >> 1
    } else {
        k
    }
}

/// Merkle root of `items`.
pub fn hash_from_byte_slices<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    match items.len() {
        0 => empty_hash(),
        1 => leaf_hash(items[0].as_ref()),
        n => {
            let k = split_point(n);
            let left = hash_from_byte_slices(&items[..k]);
            let right = hash_from_byte_slices(&items[k..]);
            inner_hash(&left, &right)
        }
    }
}

fn root_from_leaf_hashes(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => empty_hash(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            inner_hash(
                &root_from_leaf_hashes(&leaves[..k]),
                &root_from_leaf_hashes(&leaves[k..]),
            )
        }
    }
}

// Sibling hashes from the leaf up to the root.
fn aunts_for(leaves: &[Hash], index: usize) -> Vec<Hash> {
    if leaves.len() <= 1 {
        return Vec::new();
    }
    let k = split_point(leaves.len());
    if index < k {
        let mut aunts = aunts_for(&leaves[..k], index);
        aunts.push(root_from_leaf_hashes(&leaves[k..]));
        aunts
    } else {
        let mut aunts = aunts_for(&leaves[k..], index - k);
        aunts.push(root_from_leaf_hashes(&leaves[..k]));
        aunts
    }
}

/// Inclusion proof for one item of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub total: u64,
    pub index: u64,
    pub leaf_hash: Hash,
    pub aunts: Vec<Hash>,
}

impl MerkleProof {
    /// Root implied by this proof, or `None` if the proof is malformed.
    pub fn compute_root_hash(&self) -> Option<Hash> {
        compute_hash_from_aunts(
            self.index as usize,
            self.total as usize,
            self.leaf_hash,
            &self.aunts,
        )
    }

    /// Check that `leaf` is included under `root`.
    pub fn verify(&self, root: &Hash, leaf: &[u8]) -> Result<(), CoreError> {
        if leaf_hash(leaf) != self.leaf_hash {
            return Err(CoreError::InvalidProof("leaf hash mismatch".into()));
        }
        match self.compute_root_hash() {
            Some(computed) if computed == *root => Ok(()),
            Some(computed) => Err(CoreError::InvalidProof(format!(
                "root mismatch: computed {} expected {}",
                computed, root
            ))),
            None => Err(CoreError::InvalidProof("malformed aunts".into())),
        }
    }
}

fn compute_hash_from_aunts(index: usize, total: usize, leaf: Hash, aunts: &[Hash]) -> Option<Hash> {
    if total == 0 || index >= total {
        return None;
    }
    if total == 1 {
        return aunts.is_empty().then_some(leaf);
    }
    let (last, rest) = aunts.split_last()?;
    let k = split_point(total);
    if index < k {
        let left = compute_hash_from_aunts(index, k, leaf, rest)?;
        Some(inner_hash(&left, last))
    } else {
        let right = compute_hash_from_aunts(index - k, total - k, leaf, rest)?;
        Some(inner_hash(last, &right))
    }
}

/// Root of `items` together with one inclusion proof per item.
pub fn proofs_from_byte_slices<T: AsRef<[u8]>>(items: &[T]) -> (Hash, Vec<MerkleProof>) {
    let leaves: Vec<Hash> = items.iter().map(|item| leaf_hash(item.as_ref())).collect();
    let root = root_from_leaf_hashes(&leaves);
    let total = leaves.len() as u64;
    let proofs = leaves
        .iter()
        .enumerate()
        .map(|(index, leaf)| MerkleProof {
            total,
            index: index as u64,
            leaf_hash: *leaf,
            aunts: aunts_for(&leaves, index),
        })
        .collect();
    (root, proofs)
}
