use crate::error::{BlockchainError, Result};
use crate::utils::double_sha256_digest;
use serde::{Deserialize, Serialize};

/// Binary hash tree over a block's transaction hashes.
///
/// Each level pairs adjacent hashes as `SHA256(SHA256(left ++ right))`. When a
/// level has an odd number of nodes the last one is paired with itself. At
/// least one pairing round always runs, so a single leaf `h` yields the root
/// `SHA256(SHA256(h ++ h))`. An empty leaf list has the root
/// `SHA256(SHA256(""))`.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    // levels[0] are the leaves, the last level holds only the root
    levels: Vec<Vec<Vec<u8>>>,
}

/// Merkle proof for transaction verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Transaction hash being proven
    pub transaction_hash: Vec<u8>,
    /// Merkle root hash
    pub merkle_root: Vec<u8>,
    /// Sibling hashes from the leaf level upwards
    pub proof_path: Vec<ProofElement>,
    /// Index of the transaction in the block
    pub transaction_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofElement {
    pub hash: Vec<u8>,
    /// True if the sibling sits to the right of the running hash
    pub is_right: bool,
}

impl MerkleTree {
    pub fn from_hashes(leaf_hashes: &[Vec<u8>]) -> MerkleTree {
        let mut levels = vec![leaf_hashes.to_vec()];
        if leaf_hashes.is_empty() {
            levels.push(vec![double_sha256_digest(&[])]);
            return MerkleTree { levels };
        }

        loop {
            let current = &levels[levels.len() - 1];
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Self::hash_pair(left, right),
                    [single] => Self::hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            let done = next.len() == 1;
            levels.push(next);
            if done {
                break;
            }
        }
        MerkleTree { levels }
    }

    pub fn root(&self) -> Vec<u8> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn generate_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        let leaves = &self.levels[0];
        let transaction_hash = leaves.get(transaction_index).cloned().ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "Transaction index {transaction_index} out of bounds ({} leaves)",
                leaves.len()
            ))
        })?;

        let mut proof_path = Vec::new();
        let mut position = transaction_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let element = if position % 2 == 0 {
                // Right sibling, or ourselves when the level is odd
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                ProofElement {
                    hash: sibling.clone(),
                    is_right: true,
                }
            } else {
                ProofElement {
                    hash: level[position - 1].clone(),
                    is_right: false,
                }
            };
            proof_path.push(element);
            position /= 2;
        }

        Ok(MerkleProof {
            transaction_hash,
            merkle_root: self.root(),
            proof_path,
            transaction_index,
        })
    }

    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let computed = proof
            .proof_path
            .iter()
            .fold(proof.transaction_hash.clone(), |current, element| {
                if element.is_right {
                    Self::hash_pair(&current, &element.hash)
                } else {
                    Self::hash_pair(&element.hash, &current)
                }
            });
        computed == proof.merkle_root
    }

    /// Root of `transaction_hashes` without keeping the tree around.
    pub fn calculate_merkle_root(transaction_hashes: &[Vec<u8>]) -> Vec<u8> {
        Self::from_hashes(transaction_hashes).root()
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut combined = Vec::with_capacity(left.len() + right.len());
        combined.extend_from_slice(left);
        combined.extend_from_slice(right);
        double_sha256_digest(&combined)
    }
}
