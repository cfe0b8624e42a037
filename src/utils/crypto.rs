use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Byte width of one P-256 scalar or coordinate.
pub const P256_SCALAR_LEN: usize = 32;

// SEC1 tag for an uncompressed point, stripped from stored public keys
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Unix time in seconds.
pub fn current_timestamp() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    i64::try_from(secs).map_err(|_| BlockchainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn double_sha256_digest(data: &[u8]) -> Vec<u8> {
    sha256_digest(sha256_digest(data).as_slice())
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Public key of a PKCS#8 key pair as the fixed-width `x ++ y` coordinates.
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let point = key_pair.public_key().as_ref();
    match point.split_first() {
        Some((&UNCOMPRESSED_POINT_TAG, coordinates))
            if coordinates.len() == 2 * P256_SCALAR_LEN =>
        {
            Ok(coordinates.to_vec())
        }
        _ => Err(BlockchainError::Crypto(
            "Unexpected public key encoding".to_string(),
        )),
    }
}

/// Signs `message` and returns the fixed-width `r ++ s` signature.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Checks an `r ++ s` signature against an `x ++ y` public key.
///
/// Both encodings must be exactly two scalars wide; anything else is rejected
/// before the halves are taken apart.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    if public_key.len() != 2 * P256_SCALAR_LEN || signature.len() != 2 * P256_SCALAR_LEN {
        return false;
    }
    let (x, y) = public_key.split_at(P256_SCALAR_LEN);
    let (r, s) = signature.split_at(P256_SCALAR_LEN);

    let mut point = Vec::with_capacity(1 + 2 * P256_SCALAR_LEN);
    point.push(UNCOMPRESSED_POINT_TAG);
    point.extend_from_slice(x);
    point.extend_from_slice(y);

    let mut fixed_signature = Vec::with_capacity(2 * P256_SCALAR_LEN);
    fixed_signature.extend_from_slice(r);
    fixed_signature.extend_from_slice(s);

    let peer_public_key = ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point);
    peer_public_key
        .verify(message, fixed_signature.as_slice())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = public_key_from_pkcs8(&pkcs8).unwrap();
        assert_eq!(public_key.len(), 64);

        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, b"message").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(ecdsa_p256_sha256_sign_verify(
            &public_key,
            &signature,
            b"message"
        ));
        assert!(!ecdsa_p256_sha256_sign_verify(
            &public_key,
            &signature,
            b"other message"
        ));
    }

    #[test]
    fn test_verify_rejects_odd_length_encodings() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = public_key_from_pkcs8(&pkcs8).unwrap();
        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, b"message").unwrap();

        assert!(!ecdsa_p256_sha256_sign_verify(
            &public_key,
            &signature[..63],
            b"message"
        ));
        assert!(!ecdsa_p256_sha256_sign_verify(
            &public_key[1..],
            &signature,
            b"message"
        ));
    }

    #[test]
    fn test_double_sha256_differs_from_single() {
        let single = sha256_digest(b"abc");
        let double = double_sha256_digest(b"abc");
        assert_eq!(double, sha256_digest(&single));
        assert_ne!(single, double);
    }

    #[test]
    fn test_base58_round_trip() {
        let data = vec![0u8, 1, 2, 3, 255];
        let encoded = base58_encode(&data);
        assert_eq!(base58_decode(&encoded).unwrap(), data);
        assert!(base58_decode("0OIl").is_err());
    }
}
