use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::double_sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

/// Leading zero bits the block hash must have
pub const TARGET_BITS: u32 = 16;

/// Exclusive upper bound of the nonce search
pub const MAX_NONCE: i32 = i32::MAX;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> ProofOfWork<'a> {
        ProofOfWork {
            block,
            target: Self::target(block.get_bits()),
        }
    }

    /// The numeric ceiling for a block hash. `bits` is carried in the header
    /// but does not change the target: it is always `1 << (256 - TARGET_BITS)`.
    pub fn target(_bits: i32) -> BigInt {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        target
    }

    /// Recomputes the header hash from the stored nonce; the block is valid when
    /// that hash matches the stored one and falls below the target.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block);
        let hash = double_sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        hash.as_slice() == block.get_hash() && pow.meets_target(&hash)
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    // version ++ prev_hash ++ merkle_root ++ time ++ bits ++ nonce, integers little-endian
    fn prepare_data(&self, nonce: i32) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_version().to_le_bytes());
        data_bytes.extend(self.block.get_prev_block_hash());
        data_bytes.extend(self.block.get_merkle_root());
        data_bytes.extend(self.block.get_time().to_le_bytes());
        data_bytes.extend(self.block.get_bits().to_le_bytes());
        data_bytes.extend(nonce.to_le_bytes());
        data_bytes
    }

    pub fn run(&self) -> Result<(i32, Vec<u8>)> {
        self.search(MAX_NONCE, None)
    }

    /// Like [`run`](Self::run), but gives up with a `Mining` error once `cancel`
    /// is set. The flag is checked after every attempt.
    pub fn run_with_cancel(&self, cancel: &AtomicBool) -> Result<(i32, Vec<u8>)> {
        self.search(MAX_NONCE, Some(cancel))
    }

    fn search(&self, max_nonce: i32, cancel: Option<&AtomicBool>) -> Result<(i32, Vec<u8>)> {
        debug!("Mining block at height {}", self.block.get_height());
        let mut nonce = 0;
        while nonce < max_nonce {
            let hash = double_sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                info!(
                    "Found nonce {nonce} for height {}: {}",
                    self.block.get_height(),
                    HEXLOWER.encode(&hash)
                );
                return Ok((nonce, hash));
            }
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(BlockchainError::Mining(format!(
                    "cancelled after {} attempts",
                    u64::try_from(nonce).unwrap_or(0) + 1
                )));
            }
            nonce += 1;
        }
        Err(BlockchainError::PuzzleExhausted {
            attempts: u64::try_from(max_nonce).unwrap_or(0),
        })
    }
}
