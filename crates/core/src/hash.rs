//! Content digests, hash chains and Merkle roots
//!
//! The trust anchor every other component depends on. Pure functions,
//! deterministic, no side effects.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// SHA-256 digest of arbitrary bytes, as 64 lowercase hex characters.
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Merkle root over an ordered sequence of leaf strings.
///
/// An odd level is padded by duplicating its last node; pairs are combined
/// as `digest(left + right)` until one root remains. The empty sequence
/// maps to `digest("")`.
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return digest("");
    }
    let mut level: Vec<String> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1].clone());
        }
        level = level
            .chunks(2)
            .map(|pair| digest(format!("{}{}", pair[0], pair[1])))
            .collect();
    }
    level.remove(0)
}

/// Errors from Merkle proof generation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Leaf index {index} out of range for {leaves} leaves")]
    IndexOutOfRange { index: usize, leaves: usize },
}

/// One step of a Merkle inclusion proof: the sibling hash and whether it
/// sits to the left of the running hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: String,
    pub sibling_is_left: bool,
}

/// Inclusion proof for a single leaf of a Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: String,
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Build the proof for `index` within `leaves`.
    pub fn generate(leaves: &[String], index: usize) -> Result<Self, ProofError> {
        if index >= leaves.len() {
            return Err(ProofError::IndexOutOfRange {
                index,
                leaves: leaves.len(),
            });
        }

        let mut steps = Vec::new();
        let mut level: Vec<String> = leaves.to_vec();
        let mut pos = index;

        while level.len() > 1 {
            if level.len() % 2 == 1 {
                level.push(level[level.len() - 1].clone());
            }
            let sibling_pos = if pos % 2 == 0 { pos + 1 } else { pos - 1 };
            steps.push(ProofStep {
                sibling: level[sibling_pos].clone(),
                sibling_is_left: pos % 2 == 1,
            });
            level = level
                .chunks(2)
                .map(|pair| digest(format!("{}{}", pair[0], pair[1])))
                .collect();
            pos /= 2;
        }

        Ok(Self {
            leaf: leaves[index].clone(),
            steps,
        })
    }

    /// Recompute the root from the proof and compare it to `root`.
    pub fn verify(&self, root: &str) -> bool {
        let mut acc = self.leaf.clone();
        for step in &self.steps {
            acc = if step.sibling_is_left {
                digest(format!("{}{}", step.sibling, acc))
            } else {
                digest(format!("{}{}", acc, step.sibling))
            };
        }
        acc == root
    }
}
