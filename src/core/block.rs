use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction};
use crate::error::Result;
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

pub const BLOCK_VERSION: i32 = 2;

/// Difficulty word carried in every header; the target does not depend on it
pub const BLOCK_BITS: i32 = 404454260;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    version: i32,
    prev_block_hash: Vec<u8>, // empty for genesis
    merkle_root: Vec<u8>,
    hash: Vec<u8>,
    time: i64,
    bits: i32,
    nonce: i32,
    transactions: Vec<Transaction>,
    height: usize,
}

impl Block {
    /// Assembles a block on top of `prev_block_hash` and runs proof-of-work on it.
    pub fn new_block(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        let mut block = Self::template(prev_block_hash, transactions, height)?;
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block).run()?;
        block.seal(nonce, hash);
        Ok(block)
    }

    pub fn new_block_with_cancel(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        let mut block = Self::template(prev_block_hash, transactions, height)?;
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block).run_with_cancel(cancel)?;
        block.seal(nonce, hash);
        Ok(block)
    }

    pub fn generate_genesis_block(transaction: &Transaction) -> Result<Block> {
        Block::new_block(vec![], std::slice::from_ref(transaction), 0)
    }

    fn template(
        prev_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        Ok(Block {
            version: BLOCK_VERSION,
            prev_block_hash,
            merkle_root: Self::calculate_merkle_root(transactions)?,
            hash: vec![],
            time: current_timestamp()?,
            bits: BLOCK_BITS,
            nonce: 0,
            transactions: transactions.to_vec(),
            height,
        })
    }

    fn seal(&mut self, nonce: i32, hash: Vec<u8>) {
        self.nonce = nonce;
        self.hash = hash;
        info!(
            "Sealed block {} at height {} with {} transactions",
            HEXLOWER.encode(&self.hash),
            self.height,
            self.transactions.len()
        );
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_version(&self) -> i32 {
        self.version
    }

    pub fn get_prev_block_hash(&self) -> &[u8] {
        self.prev_block_hash.as_slice()
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        &self.merkle_root
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_time(&self) -> i64 {
        self.time
    }

    pub fn get_bits(&self) -> i32 {
        self.bits
    }

    pub fn get_nonce(&self) -> i32 {
        self.nonce
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    fn transaction_hashes(transactions: &[Transaction]) -> Result<Vec<Vec<u8>>> {
        transactions.iter().map(Transaction::hash).collect()
    }

    fn calculate_merkle_root(transactions: &[Transaction]) -> Result<Vec<u8>> {
        Ok(MerkleTree::calculate_merkle_root(
            &Self::transaction_hashes(transactions)?,
        ))
    }

    pub fn verify_merkle_root(&self) -> Result<bool> {
        Ok(Self::calculate_merkle_root(&self.transactions)? == self.merkle_root)
    }

    pub fn generate_merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::from_hashes(&Self::transaction_hashes(&self.transactions)?)
            .generate_proof(transaction_index)
    }

    pub fn verify_merkle_proof(&self, proof: &MerkleProof) -> bool {
        proof.merkle_root == self.merkle_root && MerkleTree::verify_proof(proof)
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(&self, nonce: i32) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }

    #[cfg(test)]
    pub(crate) fn with_transactions(&self, transactions: Vec<Transaction>) -> Block {
        Block {
            transactions,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    #[test]
    fn test_genesis_round_trip_keeps_empty_prev_hash() {
        let coinbase_tx = Transaction::new_coinbase_tx(TEST_ADDRESS, "genesis").unwrap();
        let genesis = Block::generate_genesis_block(&coinbase_tx).unwrap();

        let decoded = Block::deserialize(&genesis.serialize().unwrap()).unwrap();
        assert_eq!(decoded, genesis);
        assert!(decoded.is_genesis());
        assert!(decoded.get_prev_block_hash().is_empty());
        assert_eq!(decoded.get_height(), 0);
        assert_eq!(decoded.get_version(), BLOCK_VERSION);
        assert_eq!(decoded.get_bits(), BLOCK_BITS);
        assert!(ProofOfWork::validate(&decoded));
    }

    #[test]
    fn test_merkle_root_commits_to_transactions() {
        let first = Transaction::new_coinbase_tx(TEST_ADDRESS, "one").unwrap();
        let second = Transaction::new_coinbase_tx(TEST_ADDRESS, "two").unwrap();
        let block = Block::new_block(vec![7; 32], &[first.clone(), second.clone()], 3).unwrap();
        assert!(block.verify_merkle_root().unwrap());

        let reordered = block.with_transactions(vec![second, first]);
        assert!(!reordered.verify_merkle_root().unwrap());
    }

    #[test]
    fn test_merkle_proof_for_block_transaction() {
        let txs: Vec<Transaction> = ["a", "b", "c"]
            .iter()
            .map(|data| Transaction::new_coinbase_tx(TEST_ADDRESS, data).unwrap())
            .collect();
        let block = Block::new_block(vec![1; 32], &txs, 1).unwrap();

        let proof = block.generate_merkle_proof(2).unwrap();
        assert_eq!(proof.transaction_hash, txs[2].get_id());
        assert!(block.verify_merkle_proof(&proof));
        assert!(block.generate_merkle_proof(3).is_err());
    }

    #[test]
    fn test_block_without_transactions_has_stable_root() {
        let first = Block::new_block(vec![1; 32], &[], 1).unwrap();
        let second = Block::new_block(vec![2; 32], &[], 1).unwrap();
        assert_eq!(first.get_merkle_root(), second.get_merkle_root());
        assert!(first.verify_merkle_root().unwrap());
    }
}
