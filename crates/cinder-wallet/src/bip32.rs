//! BIP-32 key chain over secp256k1.
//!
//! The HD container only ever walks one fixed path from the BIP-39 seed
//! (`m/44'/768'/address_type'/0/0`), so this is the minimal extended-key
//! machinery: HMAC-SHA512 master-key generation and child derivation,
//! hardened and normal. The chain endpoint's private key is hashed into
//! the Ed25519 world by the caller; nothing secp256k1 leaks past here.

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use secp256k1::{PublicKey as SecpPublicKey, Secp256k1, SecretKey as SecpSecretKey};
use sha2::Sha512;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// Bit marking a hardened child index.
pub const HARDENED: u32 = 0x8000_0000;

const BIP39_PBKDF2_ROUNDS: u32 = 2048;

/// One node of the BIP-32 derivation chain.
#[derive(Clone)]
pub struct Bip32Key {
    secret: SecpSecretKey,
    chain_code: Zeroizing<[u8; 32]>,
}

impl Bip32Key {
    /// Build the master node from a mnemonic and mnemonic password.
    ///
    /// The seed stretch is PBKDF2-HMAC-SHA512 over the raw phrase, so it
    /// accepts the CRC-tagged mnemonics this wallet generates as well as
    /// standard ones; word/checksum validation happens before this call.
    pub fn create_master_key(mnemonic: &str, mnemonic_password: &str) -> Result<Self> {
        let seed = bip39_seed(mnemonic, mnemonic_password);
        Self::from_seed(&seed[..])
    }

    fn from_seed(seed: &[u8]) -> Result<Self> {
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .map_err(|e| Error::MnemonicCrc(format!("HMAC init failed: {e}")))?;
        mac.update(seed);
        let digest = mac.finalize().into_bytes();
        Self::from_split(&digest)
    }

    /// Derive one child. Indexes with the [`HARDENED`] bit set use the
    /// private parent; others use the serialized public key.
    pub fn derive_key(&self, index: u32) -> Result<Self> {
        let mut data = Vec::with_capacity(37);
        if index & HARDENED != 0 {
            data.push(0);
            data.extend_from_slice(&self.secret.secret_bytes());
        } else {
            let secp = Secp256k1::new();
            let public = SecpPublicKey::from_secret_key(&secp, &self.secret);
            data.extend_from_slice(&public.serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let mut mac = HmacSha512::new_from_slice(&self.chain_code[..])
            .map_err(|e| Error::MnemonicCrc(format!("HMAC init failed: {e}")))?;
        mac.update(&data);
        let digest = mac.finalize().into_bytes();

        let tweak = secp256k1::Scalar::from_be_bytes(left_half(&digest))
            .map_err(|_| Error::MnemonicCrc("Derived key is out of range".into()))?;
        let secret = self
            .secret
            .add_tweak(&tweak)
            .map_err(|_| Error::MnemonicCrc("Derived key is out of range".into()))?;
        let mut chain_code = Zeroizing::new([0u8; 32]);
        chain_code.copy_from_slice(&digest[32..]);
        Ok(Self { secret, chain_code })
    }

    /// Private key bytes of this node.
    pub fn private_key(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    fn from_split(digest: &[u8]) -> Result<Self> {
        let secret = SecpSecretKey::from_slice(&digest[..32])
            .map_err(|_| Error::MnemonicCrc("Master key is out of range".into()))?;
        let mut chain_code = Zeroizing::new([0u8; 32]);
        chain_code.copy_from_slice(&digest[32..64]);
        Ok(Self { secret, chain_code })
    }
}

fn left_half(digest: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

fn bip39_seed(mnemonic: &str, password: &str) -> Zeroizing<[u8; 64]> {
    let mut seed = Zeroizing::new([0u8; 64]);
    let salt = format!("mnemonic{password}");
    pbkdf2_hmac::<Sha512>(
        mnemonic.as_bytes(),
        salt.as_bytes(),
        BIP39_PBKDF2_ROUNDS,
        &mut *seed,
    );
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_vector_1() {
        // BIP-32 test vector 1: seed 000102030405060708090a0b0c0d0e0f.
        let seed: Vec<u8> = (0u8..16).collect();
        let master = Bip32Key::from_seed(&seed).unwrap();
        assert_eq!(
            hex::encode(master.private_key()),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            hex::encode(&master.chain_code[..]),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );
    }

    #[test]
    fn test_chain_is_deterministic() {
        let a = Bip32Key::create_master_key("legal winner thank year wave", "pass").unwrap();
        let b = Bip32Key::create_master_key("legal winner thank year wave", "pass").unwrap();
        let ka = a.derive_key(44 | HARDENED).unwrap().derive_key(0).unwrap();
        let kb = b.derive_key(44 | HARDENED).unwrap().derive_key(0).unwrap();
        assert_eq!(ka.private_key(), kb.private_key());
    }

    #[test]
    fn test_mnemonic_password_changes_seed() {
        let a = Bip32Key::create_master_key("legal winner thank year wave", "").unwrap();
        let b = Bip32Key::create_master_key("legal winner thank year wave", "x").unwrap();
        assert_ne!(a.private_key(), b.private_key());
    }

    #[test]
    fn test_hardened_and_normal_children_differ() {
        let master = Bip32Key::create_master_key("legal winner thank year wave", "").unwrap();
        let hardened = master.derive_key(HARDENED).unwrap();
        let normal = master.derive_key(0).unwrap();
        assert_ne!(hardened.private_key(), normal.private_key());
    }
}
