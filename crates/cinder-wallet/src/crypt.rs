//! Master-key handling and container-level encryption primitives.
//!
//! The master key is stretched from the password with Argon2id and held
//! zeroized. Small variable-size values (database parameters, labels,
//! queued transactions) go through `encrypt_blob`, which pads to a power
//! of two so row sizes leak nothing about content length. Domain-tagged
//! hashes derive sub-secrets and opaque database row keys.

use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, ParamsBuilder, Version};
use cinder_crypto::{chacha20, fast_hash, random_bytes, Hash};
use zeroize::Zeroizing;

/// Argon2id parameters: 64 MiB memory, 3 iterations, 4 lanes.
const ARGON2_PARAMS: (u32, u32, u32) = (65536, 3, 4);

/// Fixed KDF salt of the flat container, whose file format predates
/// per-wallet salts.
pub const FLAT_CONTAINER_KDF_SALT: &[u8] = b"cinder-flat-wallet";

/// Minimum size of an encrypted blob; blobs grow in powers of two.
const BLOB_MIN_SIZE: usize = 256;
/// Blob overhead: 32-byte IV plus the 4-byte length prefix.
const BLOB_EXTRA_SIZE: usize = 32 + 4;

/// Container master key derived from the password.
#[derive(Clone)]
pub struct MasterKey {
    key: Zeroizing<[u8; 32]>,
}

impl MasterKey {
    /// Stretch a password into a master key. Pure in `(salt, password)`.
    pub fn from_password(salt: &[u8], password: &str) -> Result<Self> {
        let params = ParamsBuilder::new()
            .m_cost(ARGON2_PARAMS.0)
            .t_cost(ARGON2_PARAMS.1)
            .p_cost(ARGON2_PARAMS.2)
            .output_len(32)
            .build()
            .map_err(|e| Error::Decrypt(format!("KDF parameters rejected: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut *key)
            .map_err(|e| Error::Decrypt(format!("Key derivation failed: {e}")))?;
        Ok(Self { key })
    }

    /// Wrap raw key bytes (used when re-checking a freshly saved file).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(bytes),
        }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Encrypt a value into a length-hiding blob.
    ///
    /// Layout: `iv:32B ‖ chacha20(H(key ‖ iv), len_le32 ‖ value ‖ pad)`,
    /// padded so the whole blob is a power of two of at least 256 bytes.
    pub fn encrypt_blob(&self, plain: &[u8]) -> Vec<u8> {
        let mut total = 1usize;
        while total < plain.len() + BLOB_EXTRA_SIZE || total < BLOB_MIN_SIZE {
            total *= 2;
        }
        let mut padded = vec![0u8; total - 32];
        padded[..4].copy_from_slice(&(plain.len() as u32).to_le_bytes());
        padded[4..4 + plain.len()].copy_from_slice(plain);

        let iv: [u8; 32] = random_bytes();
        let blob_key = self.blob_key(&iv);
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&chacha20(&blob_key, &[0u8; 8], &padded));
        out
    }

    /// Decrypt a blob produced by [`MasterKey::encrypt_blob`].
    pub fn decrypt_blob(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < BLOB_EXTRA_SIZE {
            return Err(Error::Decrypt("Encrypted value is too short".into()));
        }
        let mut iv = [0u8; 32];
        iv.copy_from_slice(&blob[..32]);
        let blob_key = self.blob_key(&iv);
        let padded = chacha20(&blob_key, &[0u8; 8], &blob[32..]);

        let len = u32::from_le_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
        if len > padded.len() - 4 {
            return Err(Error::Decrypt("Encrypted value length is corrupt".into()));
        }
        Ok(padded[4..4 + len].to_vec())
    }

    /// Deterministic opaque row key: `H(key ‖ domain ‖ plain ‖ key)`.
    ///
    /// Rows stay equality-searchable without exposing plaintext keys, and
    /// the trailing key copy keeps the hash from being extendable.
    pub fn derive_row_key(&self, domain: &str, plain: &[u8]) -> Hash {
        let mut data = Vec::with_capacity(32 + domain.len() + plain.len() + 32);
        data.extend_from_slice(self.as_bytes());
        data.extend_from_slice(domain.as_bytes());
        data.extend_from_slice(plain);
        data.extend_from_slice(self.as_bytes());
        fast_hash(&data)
    }

    fn blob_key(&self, iv: &[u8; 32]) -> [u8; 32] {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(self.as_bytes());
        data.extend_from_slice(iv);
        fast_hash(&data)
    }
}

/// Domain-separated sub-secret: `H(seed ‖ tag)`.
pub fn derive_from_seed(seed: &Hash, tag: &str) -> Hash {
    let mut data = Vec::with_capacity(32 + tag.len());
    data.extend_from_slice(seed);
    data.extend_from_slice(tag.as_bytes());
    fast_hash(&data)
}

/// Reversed-order variant, `H(tag ‖ seed)`, kept for binary compatibility
/// with the flat container's historical derivations.
pub fn derive_from_seed_legacy(seed: &Hash, tag: &str) -> Hash {
    let mut data = Vec::with_capacity(tag.len() + 32);
    data.extend_from_slice(tag.as_bytes());
    data.extend_from_slice(seed);
    fast_hash(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::from_bytes([0x42; 32])
    }

    #[test]
    fn test_kdf_is_deterministic() {
        let salt = [5u8; 32];
        let a = MasterKey::from_password(&salt, "correct horse").unwrap();
        let b = MasterKey::from_password(&salt, "correct horse").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_kdf_separates_salts_and_passwords() {
        let a = MasterKey::from_password(&[1u8; 32], "pw").unwrap();
        let b = MasterKey::from_password(&[2u8; 32], "pw").unwrap();
        let c = MasterKey::from_password(&[1u8; 32], "pw2").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_blob_round_trip() {
        let key = test_key();
        for len in [0usize, 1, 31, 219, 220, 221, 1000, 5000] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let blob = key.encrypt_blob(&plain);
            assert_eq!(key.decrypt_blob(&blob).unwrap(), plain);
        }
    }

    #[test]
    fn test_blob_size_is_power_of_two() {
        let key = test_key();
        for len in [0usize, 1, 219, 220, 221, 300, 4096] {
            let blob = key.encrypt_blob(&vec![7u8; len]);
            assert!(blob.len() >= BLOB_MIN_SIZE);
            assert!(blob.len().is_power_of_two(), "len {} -> {}", len, blob.len());
        }
    }

    #[test]
    fn test_blob_hides_equal_plaintexts() {
        let key = test_key();
        // Fresh IV per blob: same plaintext, different ciphertext.
        assert_ne!(key.encrypt_blob(b"same"), key.encrypt_blob(b"same"));
    }

    #[test]
    fn test_corrupt_length_rejected() {
        let key = test_key();
        let mut blob = key.encrypt_blob(b"value");
        // Flip bits in the encrypted length prefix until it overflows.
        blob[32] ^= 0xff;
        blob[33] ^= 0xff;
        blob[34] ^= 0xff;
        blob[35] ^= 0xff;
        assert!(key.decrypt_blob(&blob).is_err());
    }

    #[test]
    fn test_row_keys_are_domain_separated() {
        let key = test_key();
        let a = key.derive_row_key("db_labels", b"addr");
        let b = key.derive_row_key("db_parameters", b"addr");
        assert_ne!(a, b);
        assert_eq!(a, key.derive_row_key("db_labels", b"addr"));
    }

    #[test]
    fn test_seed_derivation_orders_differ() {
        let seed = [9u8; 32];
        assert_ne!(
            derive_from_seed(&seed, "tx_derivation"),
            derive_from_seed_legacy(&seed, "tx_derivation")
        );
    }
}
