//! # UTXO Chain - a single-writer proof-of-work ledger
//!
//! An append-only, hash-linked chain of blocks stored in sled, with an index of
//! unspent transaction outputs kept beside it for balance queries and spend
//! validation.
//!
//! ## What's Here
//! - **Ledger**: blocks keyed by hash plus a tip pointer; the tallest chain wins
//! - **Proof of Work**: double SHA-256 over a fixed little-endian header layout
//! - **Merkle Commitment**: per-block root over transaction hashes, with proofs
//! - **UTXO Model**: ECDSA P-256 signed inputs spending earlier outputs
//! - **UTXO Index**: rebuilt in full or updated in the same transaction that
//!   adopts a block
//!
//! ## Layout
//! - `core/`: blocks, the ledger, mining, Merkle trees and transactions
//! - `storage/`: the UTXO index
//! - `wallet/`: key pairs, Base58Check addresses, the wallet file
//! - `config/`: data directory and per-node paths
//! - `utils/`: hashing, signatures and the bincode record codec
//! - `cli/`: command-line arguments for the `utxo-chain` binary
//!
//! Peer-to-peer sync is not part of this crate. A networking layer drives the
//! ledger through [`Blockchain::add_block`], [`Blockchain::get_block`],
//! [`Blockchain::get_best_height`], [`Blockchain::get_block_hashes`] and
//! [`Blockchain::find_all_utxo`].

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Adoption, Block, Blockchain, BlockchainIterator, MerkleProof, MerkleTree, ProofOfWork,
    TXInput, TXOutput, Transaction, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use storage::UTXOSet;
pub use utils::{
    base58_decode, base58_encode, current_timestamp, double_sha256_digest,
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, new_key_pair,
    ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
