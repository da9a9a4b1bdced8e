//! ChaCha stream wrappers used by the wallet containers.
//!
//! Container records carry an 8-byte IV on disk; it is expanded into the
//! 96-bit nonce the cipher expects by zero-padding. ChaCha8 encrypts the
//! small fixed-size records, ChaCha20 the variable-size database blobs.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, ChaCha8};

/// Key size of both stream ciphers.
pub const CHACHA_KEY_SIZE: usize = 32;
/// On-disk IV size for encrypted records and blobs.
pub const CHACHA_IV_SIZE: usize = 8;

fn nonce(iv: &[u8; CHACHA_IV_SIZE]) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[..CHACHA_IV_SIZE].copy_from_slice(iv);
    n
}

/// ChaCha8 keystream XOR. Symmetric: applying twice restores the input.
pub fn chacha8(key: &[u8; CHACHA_KEY_SIZE], iv: &[u8; CHACHA_IV_SIZE], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut cipher = ChaCha8::new(key.into(), (&nonce(iv)).into());
    cipher.apply_keystream(&mut out);
    out
}

/// ChaCha20 keystream XOR. Symmetric: applying twice restores the input.
pub fn chacha20(key: &[u8; CHACHA_KEY_SIZE], iv: &[u8; CHACHA_IV_SIZE], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut cipher = ChaCha20::new(key.into(), (&nonce(iv)).into());
    cipher.apply_keystream(&mut out);
    out
}
