//! Keccak-256 hashing and hash-to-scalar reduction.

use crate::keys::SecretKey;
use curve25519_dalek::scalar::Scalar;
use sha3::{Digest, Keccak256};

/// Size of the fast hash in bytes.
pub const HASH_SIZE: usize = 32;

/// 32-byte Keccak hash.
pub type Hash = [u8; HASH_SIZE];

/// The CryptoNote fast hash: plain Keccak-256 of the input.
pub fn fast_hash(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Hash the input and reduce it into the Ed25519 scalar field.
pub fn hash_to_scalar(data: &[u8]) -> SecretKey {
    SecretKey(hash_scalar(data).to_bytes())
}

pub(crate) fn hash_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(fast_hash(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_hash_empty_vector() {
        // Keccak-256 of the empty string.
        assert_eq!(
            hex::encode(fast_hash(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_hash_to_scalar_is_canonical() {
        let s = hash_to_scalar(b"some data");
        let reduced = Scalar::from_bytes_mod_order(s.0);
        assert_eq!(reduced.to_bytes(), s.0);
    }

    #[test]
    fn test_hash_to_scalar_domain_separation() {
        assert_ne!(hash_to_scalar(b"a"), hash_to_scalar(b"b"));
    }
}
