//! Linkable (simple address) output key derivation.
//!
//! The classic CryptoNote ECDH scheme: the sender mixes a one-time
//! transaction key with the recipient's view key, and each output key is
//! the recipient's spend key offset by a scalar hashed from that shared
//! secret and the output index.

use crate::hash::hash_scalar;
use crate::keys::{compress, decompress, scalar_of, KeyDerivation, PublicKey, SecretKey};
use curve25519_dalek::edwards::EdwardsPoint;

/// Diffie-Hellman between a transaction public key and a view secret key,
/// with cofactor clearing. `None` when either side is malformed (the
/// transaction key is attacker-controlled and unvalidated by daemons).
pub fn generate_key_derivation(
    tx_public_key: &PublicKey,
    view_secret_key: &SecretKey,
) -> Option<KeyDerivation> {
    let point = decompress(tx_public_key)?;
    let scalar = scalar_of(view_secret_key)?;
    let shared = (scalar * point).mul_by_cofactor();
    Some(KeyDerivation(shared.compress().to_bytes()))
}

fn derivation_to_scalar(
    derivation: &KeyDerivation,
    output_index: u64,
) -> curve25519_dalek::scalar::Scalar {
    let mut data = Vec::with_capacity(32 + 10);
    data.extend_from_slice(&derivation.0);
    write_varint(&mut data, output_index);
    hash_scalar(&data)
}

/// Sender side: `H_s(derivation ‖ index)·G + spend_public`.
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    spend_public_key: &PublicKey,
) -> Option<PublicKey> {
    let base = decompress(spend_public_key)?;
    let offset = derivation_to_scalar(derivation, output_index);
    Some(compress(&(EdwardsPoint::mul_base(&offset) + base)))
}

/// Receiver side: recover the spend public key an output was addressed to.
pub fn underive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    output_public_key: &PublicKey,
) -> Option<PublicKey> {
    let output = decompress(output_public_key)?;
    let offset = derivation_to_scalar(derivation, output_index);
    Some(compress(&(output - EdwardsPoint::mul_base(&offset))))
}

/// Secret key of an output addressed to `spend_secret_key`'s record.
pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: u64,
    spend_secret_key: &SecretKey,
) -> Option<SecretKey> {
    let base = scalar_of(spend_secret_key)?;
    let offset = derivation_to_scalar(derivation, output_index);
    Some(SecretKey((offset + base).to_bytes()))
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{keys_match, random_keypair, secret_key_to_public_key};

    #[test]
    fn test_ecdh_is_symmetric() {
        let view = random_keypair();
        let tx = random_keypair();
        let sender = generate_key_derivation(&view.public_key, &tx.secret_key).unwrap();
        let receiver = generate_key_derivation(&tx.public_key, &view.secret_key).unwrap();
        assert_eq!(sender, receiver);
    }

    #[test]
    fn test_underive_inverts_derive() {
        let view = random_keypair();
        let spend = random_keypair();
        let tx = random_keypair();
        let kd = generate_key_derivation(&view.public_key, &tx.secret_key).unwrap();

        for index in [0u64, 1, 127, 128, 1_000_000] {
            let output = derive_public_key(&kd, index, &spend.public_key).unwrap();
            let candidate = underive_public_key(&kd, index, &output).unwrap();
            assert_eq!(candidate, spend.public_key);
        }
    }

    #[test]
    fn test_derived_secret_matches_derived_public() {
        let view = random_keypair();
        let spend = random_keypair();
        let tx = random_keypair();
        let kd = generate_key_derivation(&view.public_key, &tx.secret_key).unwrap();

        let output_public = derive_public_key(&kd, 3, &spend.public_key).unwrap();
        let output_secret = derive_secret_key(&kd, 3, &spend.secret_key).unwrap();
        assert!(keys_match(&output_secret, &output_public));
        assert_eq!(
            secret_key_to_public_key(&output_secret).unwrap(),
            output_public
        );
    }

    #[test]
    fn test_index_separates_outputs() {
        let view = random_keypair();
        let spend = random_keypair();
        let tx = random_keypair();
        let kd = generate_key_derivation(&view.public_key, &tx.secret_key).unwrap();
        let a = derive_public_key(&kd, 0, &spend.public_key).unwrap();
        let b = derive_public_key(&kd, 1, &spend.public_key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_tx_key_rejected() {
        let view = random_keypair();
        // Not a curve point with overwhelming probability.
        let bogus = PublicKey([0x15; 32]);
        if crate::keys::key_isvalid(&bogus) {
            return; // astronomically unlikely; nothing to assert
        }
        assert!(generate_key_derivation(&bogus, &view.secret_key).is_none());
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0);
        assert_eq!(buf, [0]);
        buf.clear();
        write_varint(&mut buf, 127);
        assert_eq!(buf, [0x7f]);
        buf.clear();
        write_varint(&mut buf, 128);
        assert_eq!(buf, [0x80, 0x01]);
        buf.clear();
        write_varint(&mut buf, 300);
        assert_eq!(buf, [0xac, 0x02]);
    }
}
