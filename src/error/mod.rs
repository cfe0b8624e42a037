//! Error handling for the ledger
//!
//! Every fallible operation in the crate returns [`Result`]. Domain failures
//! (`NotFound`, `InsufficientFunds`, `MissingReferencedTransaction`) are ordinary
//! errors the caller is expected to handle; `Database` and `PuzzleExhausted` mean
//! the current operation cannot continue.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// A block or transaction could not be found by hash/id
    NotFound(String),
    /// Spendable total located for the sender is below the requested amount
    InsufficientFunds { required: u64, available: u64 },
    /// An input references a transaction (or output) that the caller did not supply
    MissingReferencedTransaction(String),
    /// The nonce counter ran out before a hash below the target was found
    PuzzleExhausted { attempts: u64 },
    /// Underlying key-value store failures
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Block validation errors
    InvalidBlock(String),
    /// Transaction validation errors
    Transaction(String),
    /// Mining errors other than exhaustion (e.g. cancellation)
    Mining(String),
    /// Wallet lookup errors
    Wallet(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::NotFound(what) => write!(f, "Not found: {what}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::MissingReferencedTransaction(txid) => {
                write!(f, "Referenced transaction not supplied: {txid}")
            }
            BlockchainError::PuzzleExhausted { attempts } => {
                write!(f, "Proof-of-work exhausted after {attempts} attempts")
            }
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl BlockchainError {
    /// True for the conditions that leave nothing sensible to retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BlockchainError::Database(_) | BlockchainError::PuzzleExhausted { .. }
        )
    }
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => e.into(),
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BlockchainError::Database("io".to_string()).is_fatal());
        assert!(BlockchainError::PuzzleExhausted { attempts: 1 }.is_fatal());
        assert!(!BlockchainError::NotFound("block".to_string()).is_fatal());
        assert!(!BlockchainError::InsufficientFunds {
            required: 10,
            available: 5
        }
        .is_fatal());
    }

    #[test]
    fn test_transaction_error_unwraps_abort() {
        let err: BlockchainError = sled::transaction::TransactionError::Abort(
            BlockchainError::InvalidBlock("bad".to_string()),
        )
        .into();
        assert_eq!(err, BlockchainError::InvalidBlock("bad".to_string()));
    }

    #[test]
    fn test_display_messages() {
        let err = BlockchainError::InsufficientFunds {
            required: 100,
            available: 40,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 100, available 40"
        );
    }
}
