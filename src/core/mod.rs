//! Core blockchain functionality
//!
//! This module contains the fundamental blockchain components including
//! blocks, transactions, blockchain management, and proof-of-work consensus.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BLOCK_BITS, BLOCK_VERSION};
pub use blockchain::{Adoption, Blockchain, BlockchainIterator};
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::{ProofOfWork, MAX_NONCE, TARGET_BITS};
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_VOUT, SUBSIDY, UNINDEXED};
