//! Test utilities for blockchain testing

use crate::core::{Blockchain, ProofOfWork};
use crate::error::{BlockchainError, Result};
use crate::wallet::Wallets;
use tempfile::TempDir;

/// A chain in a temporary directory whose genesis reward belongs to a local wallet.
pub struct TestChain {
    pub blockchain: Blockchain,
    pub wallets: Wallets,
    pub genesis_address: String,
    // Dropped last: removes the database and wallet file
    pub temp_dir: TempDir,
}

pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

pub fn create_test_blockchain() -> Result<TestChain> {
    let temp_dir = create_temp_dir()?;
    let mut wallets = Wallets::open(temp_dir.path().join("wallet.dat"))?;
    let genesis_address = wallets.create_wallet()?;
    let blockchain = Blockchain::open_or_init(&genesis_address, temp_dir.path().join("blocks"))?;

    Ok(TestChain {
        blockchain,
        wallets,
        genesis_address,
        temp_dir,
    })
}

/// Walks the chain checking proof of work, Merkle roots, heights and linkage.
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash = blockchain.get_tip_hash()?;
    let mut expected_height = blockchain.get_best_height()?;

    for block in blockchain.iterator()? {
        let block = block?;
        if block.get_hash() != expected_hash.as_slice()
            || block.get_height() != expected_height
            || !ProofOfWork::validate(&block)
            || !block.verify_merkle_root()?
        {
            return Ok(false);
        }
        if block.is_genesis() {
            return Ok(expected_height == 0);
        }
        expected_hash = block.get_prev_block_hash().to_vec();
        expected_height = match expected_height.checked_sub(1) {
            Some(height) => height,
            None => return Ok(false),
        };
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_blockchain() {
        let chain = create_test_blockchain().unwrap();
        assert_eq!(chain.blockchain.get_best_height().unwrap(), 0);
        assert!(chain.wallets.get_wallet(&chain.genesis_address).is_some());
    }

    #[test]
    fn test_validate_blockchain_integrity() {
        let chain = create_test_blockchain().unwrap();
        chain.blockchain.mine_block(&[]).unwrap();
        assert!(validate_blockchain_integrity(&chain.blockchain).unwrap());
    }
}
