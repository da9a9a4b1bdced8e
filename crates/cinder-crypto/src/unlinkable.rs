//! Unlinkable address scheme and hierarchical spend-key generation.
//!
//! An unlinkable address is the pair `(S, S_v = v·S)` where `S` is the
//! record spend key and `v` the wallet view scalar. The sender picks a
//! random `r` per output, publishes `Q = r·S` as the encrypted output
//! secret and hides the destination behind
//! `P = S + H_s(8·r·S_v ‖ inputs_hash ‖ index)·G`. The receiver recovers
//! `8·r·S_v` as `8·v·Q`, so detection needs only the view scalar while
//! spending needs the record secret. Auditable addresses use the same
//! math plus an output flag the wallet must match.

use crate::derivation::write_varint;
use crate::hash::{hash_scalar, Hash};
use crate::keys::{compress, decompress, scalar_of, KeyPair, PublicKey, SecretKey};
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;

/// Second half of an unlinkable address: the spend key encrypted to the
/// view scalar, `v·S`.
pub fn generate_address_s_v(
    spend_public_key: &PublicKey,
    view_secret_key: &SecretKey,
) -> Option<PublicKey> {
    let s = decompress(spend_public_key)?;
    let v = scalar_of(view_secret_key)?;
    Some(compress(&(v * s)))
}

fn output_secret_scalar(shared: &EdwardsPoint, tx_inputs_hash: &Hash, output_index: u64) -> Scalar {
    let mut data = Vec::with_capacity(32 + 32 + 10);
    data.extend_from_slice(&shared.mul_by_cofactor().compress().to_bytes());
    data.extend_from_slice(tx_inputs_hash);
    write_varint(&mut data, output_index);
    hash_scalar(&data)
}

/// Sender side: build the one-time output key and encrypted secret for an
/// unlinkable address `(S, S_v)`.
pub fn unlinkable_derive_output(
    address_s: &PublicKey,
    address_s_v: &PublicKey,
    tx_inputs_hash: &Hash,
    output_index: u64,
) -> Option<(PublicKey, PublicKey)> {
    let s = decompress(address_s)?;
    let sv = decompress(address_s_v)?;
    let r = Scalar::from_bytes_mod_order_wide(&crate::random_bytes::<64>());
    let encrypted_secret = compress(&(r * s));
    let sigma = output_secret_scalar(&(r * sv), tx_inputs_hash, output_index);
    let output_public_key = compress(&(s + EdwardsPoint::mul_base(&sigma)));
    Some((output_public_key, encrypted_secret))
}

/// Receiver side: strip the per-output blinding from an output key,
/// returning the spend-key candidate and the blinding scalar needed to
/// spend it.
pub fn unlinkable_underive_public_key(
    view_secret_key: &SecretKey,
    tx_inputs_hash: &Hash,
    output_index: u64,
    output_public_key: &PublicKey,
    encrypted_secret: &PublicKey,
) -> Option<(PublicKey, SecretKey)> {
    let v = scalar_of(view_secret_key)?;
    let p = decompress(output_public_key)?;
    let q = decompress(encrypted_secret)?;
    let sigma = output_secret_scalar(&(v * q), tx_inputs_hash, output_index);
    let spend_candidate = compress(&(p - EdwardsPoint::mul_base(&sigma)));
    Some((spend_candidate, SecretKey(sigma.to_bytes())))
}

/// Secret key of an unlinkable output: record secret plus the blinding
/// scalar recovered during underivation.
pub fn unlinkable_derive_secret_key(
    spend_secret_key: &SecretKey,
    secret_scalar: &SecretKey,
) -> Option<SecretKey> {
    let s = scalar_of(spend_secret_key)?;
    let sigma = scalar_of(secret_scalar)?;
    Some(SecretKey((s + sigma).to_bytes()))
}

/// Derive `count` spend keypairs starting at index `start` from a spend
/// key base. Record `i` uses the offset `d_i = H_s(view_seed ‖ i_le)`:
/// its public key is `base_public + d_i·G` and its secret `base_secret +
/// d_i`. When the base secret is zero (view-only wallets) the derived
/// secrets stay zero while the public keys come out identical, which is
/// what lets tracking wallets recognize the same addresses.
pub fn generate_hd_spendkeys(
    base: &KeyPair,
    view_seed: &PublicKey,
    start: u64,
    count: usize,
) -> Option<Vec<KeyPair>> {
    let base_point = decompress(&base.public_key)?;
    let base_scalar = if base.secret_key.is_zero() {
        None
    } else {
        Some(scalar_of(&base.secret_key)?)
    };
    let mut result = Vec::with_capacity(count);
    for i in 0..count as u64 {
        let mut data = Vec::with_capacity(32 + 8);
        data.extend_from_slice(&view_seed.0);
        data.extend_from_slice(&(start + i).to_le_bytes());
        let offset = hash_scalar(&data);
        let public_key = compress(&(base_point + EdwardsPoint::mul_base(&offset)));
        let secret_key = match base_scalar {
            Some(s) => SecretKey((s + offset).to_bytes()),
            None => SecretKey::default(),
        };
        result.push(KeyPair {
            public_key,
            secret_key,
        });
    }
    Some(result)
}
