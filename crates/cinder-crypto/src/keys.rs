//! Ed25519 key types and basic keypair operations.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use std::fmt;

/// Compressed Ed25519 point identifying an address component or a
/// transaction key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PublicKey(pub [u8; 32]);

/// Ed25519 scalar. An all-zero value means "absent" (tracking wallets).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SecretKey(pub [u8; 32]);

/// Shared-secret point produced by ECDH between a transaction key and a
/// view key, kept in compressed form.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDerivation(pub [u8; 32]);

/// A public/secret key pair. The secret half may be zero for view-only
/// material.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct KeyPair {
    /// Public half.
    pub public_key: PublicKey,
    /// Secret half, zero when unknown.
    pub secret_key: SecretKey,
}

impl PublicKey {
    /// Whether the key is the all-zero placeholder.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl SecretKey {
    /// Whether the scalar is the all-zero "absent" placeholder.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl fmt::Debug for KeyDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyDerivation(<redacted>)")
    }
}

pub(crate) fn decompress(key: &PublicKey) -> Option<EdwardsPoint> {
    CompressedEdwardsY(key.0).decompress()
}

pub(crate) fn compress(point: &EdwardsPoint) -> PublicKey {
    PublicKey(point.compress().to_bytes())
}

pub(crate) fn scalar_of(key: &SecretKey) -> Option<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(key.0))
}

/// Generate a fresh random keypair.
pub fn random_keypair() -> KeyPair {
    let bytes: [u8; 64] = crate::random_bytes();
    let secret = Scalar::from_bytes_mod_order_wide(&bytes);
    KeyPair {
        public_key: compress(&EdwardsPoint::mul_base(&secret)),
        secret_key: SecretKey(secret.to_bytes()),
    }
}

/// Compute the public key of a secret scalar. Fails for non-canonical
/// scalar encodings.
pub fn secret_key_to_public_key(secret_key: &SecretKey) -> Option<PublicKey> {
    let scalar = scalar_of(secret_key)?;
    Some(compress(&EdwardsPoint::mul_base(&scalar)))
}

/// Whether the secret scalar generates exactly this public key.
pub fn keys_match(secret_key: &SecretKey, public_key: &PublicKey) -> bool {
    secret_key_to_public_key(secret_key).as_ref() == Some(public_key)
}

/// Whether the bytes decode to a point on the curve.
pub fn key_isvalid(public_key: &PublicKey) -> bool {
    decompress(public_key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_keypair_matches() {
        let pair = random_keypair();
        assert!(keys_match(&pair.secret_key, &pair.public_key));
        assert!(key_isvalid(&pair.public_key));
    }

    #[test]
    fn test_random_keypairs_differ() {
        assert_ne!(random_keypair().public_key, random_keypair().public_key);
    }

    #[test]
    fn test_secret_to_public_is_deterministic() {
        let pair = random_keypair();
        let a = secret_key_to_public_key(&pair.secret_key);
        let b = secret_key_to_public_key(&pair.secret_key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_mismatched_keys() {
        let a = random_keypair();
        let b = random_keypair();
        assert!(!keys_match(&a.secret_key, &b.public_key));
    }

    #[test]
    fn test_noncanonical_scalar_rejected() {
        // l + 1 is not a canonical scalar encoding.
        let sk = SecretKey([0xff; 32]);
        assert!(secret_key_to_public_key(&sk).is_none());
    }
}
