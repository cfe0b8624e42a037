//! Data storage and persistence
//!
//! The UTXO index is kept in its own sled tree next to the block store.

pub mod utxo_set;

pub use utxo_set::UTXOSet;
