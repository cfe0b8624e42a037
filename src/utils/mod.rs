//! Utility functions and helpers
//!
//! Hashing, signatures, Base58 and the bincode record codec used by every
//! persisted type.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, double_sha256_digest,
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, new_key_pair,
    public_key_from_pkcs8, ripemd160_digest, sha256_digest, P256_SCALAR_LEN,
};

pub use serialization::{deserialize, serialize};
