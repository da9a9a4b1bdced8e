//! CryptoNote curve primitives for the Cinder wallet
//!
//! Ed25519 key handling, ECDH output derivation for linkable (simple)
//! addresses, the unlinkable address scheme, hierarchical spend-key
//! generation, and the ChaCha stream wrappers used by both container
//! formats. Everything here is deterministic curve math; no file or
//! network state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chacha;
pub mod derivation;
pub mod hash;
pub mod keys;
pub mod unlinkable;

pub use chacha::{chacha8, chacha20};
pub use derivation::{
    derive_public_key, derive_secret_key, generate_key_derivation, underive_public_key,
};
pub use hash::{fast_hash, hash_to_scalar, Hash, HASH_SIZE};
pub use keys::{
    key_isvalid, keys_match, random_keypair, secret_key_to_public_key, KeyDerivation, KeyPair,
    PublicKey, SecretKey,
};
pub use unlinkable::{
    generate_address_s_v, generate_hd_spendkeys, unlinkable_derive_output,
    unlinkable_derive_secret_key, unlinkable_underive_public_key,
};

/// Fill a fixed-size buffer with OS randomness.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut out = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}
