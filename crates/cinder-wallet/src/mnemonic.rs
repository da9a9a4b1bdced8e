//! Mnemonic generation and validation.
//!
//! Wallet mnemonics are BIP-39 English words, but the final three words
//! are chosen so the IEEE CRC32 of the whole space-joined phrase equals a
//! 32-bit version tag instead of the standard BIP-39 checksum. Standard
//! BIP-39 phrases (imports from other wallets) are accepted too.
//!
//! The generator exploits that the table-driven CRC update is affine over
//! GF(2): pushing a byte `b` from state `S` gives
//! `step_zero(S) ^ T[b]`, so each word contributes a precomputable
//! adjustment plus a state-independent walk of zero steps. Inverting the
//! zero step is possible because the table's high bytes form a
//! permutation, which lets us tabulate, for every candidate last word,
//! the unique state that finishes at the version tag.

use crate::error::{Error, Result};
use bip39::{Language, Mnemonic};
use rand::Rng;
use std::collections::HashMap;

/// CRC32 version tag embedded in every mnemonic this wallet generates.
pub const MNEMONIC_VERSION: u32 = 0xC1DE_0001;

/// Bits of wordlist index per mnemonic word.
const BITS_PER_WORD: usize = 11;

const CRC32_POLY: u32 = 0xEDB8_8320;

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_reverse_index() -> [u8; 256] {
    let mut rev = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        rev[(CRC32_TABLE[i] >> 24) as usize] = i as u8;
        i += 1;
    }
    rev
}

const CRC32_REVERSE_INDEX: [u8; 256] = build_reverse_index();

fn crc32_step(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize]
}

fn crc32_step_zero(crc: u32) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[(crc & 0xff) as usize]
}

fn crc32_reverse_step_zero(crc: u32) -> u32 {
    let i = CRC32_REVERSE_INDEX[(crc >> 24) as usize] as u32;
    ((crc ^ CRC32_TABLE[i as usize]) << 8) | i
}

fn advance_zeros(mut crc: u32, steps: usize) -> u32 {
    for _ in 0..steps {
        crc = crc32_step_zero(crc);
    }
    crc
}

/// State-independent CRC contribution of a word's bytes.
fn word_adjustment(word: &str) -> u32 {
    word.bytes().fold(0, crc32_step)
}

fn space_step(crc: u32) -> u32 {
    crc32_step_zero(crc) ^ CRC32_TABLE[b' ' as usize]
}

fn word_list() -> &'static [&'static str] {
    Language::English.words_by_prefix("")
}

/// Generate a mnemonic of `⌈bits/11⌉ + 3` English words whose CRC32
/// equals `version`.
///
/// The prefix is sampled from OS entropy; the inner search walks every
/// (middle, middle) word pair and looks the closing word up in the
/// per-word finishing-state table. With 2048³ triples against a 32-bit
/// target a random prefix closes after roughly one or two attempts.
pub fn generate_mnemonic(bits: usize, version: u32) -> String {
    let words = word_list();
    let adjustments: Vec<u32> = words.iter().map(|w| word_adjustment(w)).collect();
    let max_len = words.iter().map(|w| w.len()).max().unwrap_or(8);
    let min_len = words.iter().map(|w| w.len()).min().unwrap_or(3);

    // For each candidate last word, the state just before its bytes that
    // ends the phrase at `version` (CRC finalization inverts all bits).
    let mut last_word: HashMap<u32, usize> = HashMap::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        let mut state = !version ^ adjustments[i];
        for _ in 0..word.len() {
            state = crc32_reverse_step_zero(state);
        }
        last_word.insert(state, i);
    }

    let words_in_prefix = (bits - 1) / BITS_PER_WORD + 1;
    let mut rng = rand::thread_rng();
    loop {
        let mut ids = Vec::with_capacity(words_in_prefix + 3);
        let mut crc = 0xFFFF_FFFFu32;
        for k in 0..words_in_prefix {
            let j = rng.gen_range(0..words.len());
            if k > 0 {
                crc = space_step(crc);
            }
            crc = advance_zeros(crc, words[j].len()) ^ adjustments[j];
            ids.push(j);
        }

        let s1_base = space_step(crc);
        let mut zeros1 = vec![0u32; max_len + 1];
        for len in min_len..=max_len {
            zeros1[len] = advance_zeros(s1_base, len);
        }
        for (i1, w1) in words.iter().enumerate() {
            let s2_base = space_step(zeros1[w1.len()] ^ adjustments[i1]);
            let mut zeros2 = vec![0u32; max_len + 1];
            for len in min_len..=max_len {
                zeros2[len] = advance_zeros(s2_base, len);
            }
            for (i2, w2) in words.iter().enumerate() {
                let finish = space_step(zeros2[w2.len()] ^ adjustments[i2]);
                if let Some(&i3) = last_word.get(&finish) {
                    ids.push(i1);
                    ids.push(i2);
                    ids.push(i3);
                    let phrase = ids
                        .iter()
                        .map(|&id| words[id])
                        .collect::<Vec<_>>()
                        .join(" ");
                    debug_assert_eq!(crc32fast::hash(phrase.as_bytes()), version);
                    return phrase;
                }
            }
        }
    }
}

/// Generate a wallet mnemonic carrying this coin's version tag.
pub fn generate_wallet_mnemonic(bits: usize) -> String {
    generate_mnemonic(bits, MNEMONIC_VERSION)
}

/// Validate a mnemonic and return its normalized (single-spaced) form.
///
/// Every word must come from the English list, and the phrase must carry
/// either this coin's CRC32 version tag or a valid standard BIP-39
/// checksum.
pub fn check_mnemonic(phrase: &str) -> Result<String> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() < 12 {
        return Err(Error::MnemonicCrc("Mnemonic is too short".into()));
    }
    let list = word_list();
    for word in &words {
        if list.binary_search(word).is_err() {
            return Err(Error::MnemonicCrc(format!("Unknown mnemonic word '{word}'")));
        }
    }
    let normalized = words.join(" ");
    if crc32fast::hash(normalized.as_bytes()) == MNEMONIC_VERSION {
        return Ok(normalized);
    }
    if Mnemonic::parse_in_normalized(Language::English, &normalized).is_ok() {
        return Ok(normalized);
    }
    Err(Error::MnemonicCrc("Mnemonic checksum mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIP39_VECTOR_12: &str = "abandon abandon abandon abandon abandon abandon abandon \
                                   abandon abandon abandon abandon about";

    #[test]
    fn test_step_zero_inverts() {
        for crc in [0u32, 1, 0xFFFF_FFFF, 0x1234_5678, 0xDEAD_BEEF] {
            assert_eq!(crc32_reverse_step_zero(crc32_step_zero(crc)), crc);
        }
    }

    #[test]
    fn test_affine_model_matches_crc32fast() {
        // Walk the affine decomposition over a real phrase and compare
        // with the reference implementation.
        let phrase = "gravity machine north sort system";
        let mut crc = 0xFFFF_FFFFu32;
        for (k, word) in phrase.split(' ').enumerate() {
            if k > 0 {
                crc = space_step(crc);
            }
            crc = advance_zeros(crc, word.len()) ^ word_adjustment(word);
        }
        assert_eq!(!crc, crc32fast::hash(phrase.as_bytes()));
    }

    #[test]
    fn test_generated_mnemonic_carries_version() {
        for version in [0u32, 1, MNEMONIC_VERSION, 0x1DA4_B1CE, 0xDEAD_BEEF] {
            let phrase = generate_mnemonic(128, version);
            assert_eq!(crc32fast::hash(phrase.as_bytes()), version);
            assert_eq!(phrase.split(' ').count(), 12 + 3);
        }
    }

    #[test]
    fn test_generated_mnemonic_validates() {
        let phrase = generate_wallet_mnemonic(128);
        assert_eq!(check_mnemonic(&phrase).unwrap(), phrase);
    }

    #[test]
    fn test_standard_bip39_accepted() {
        assert!(check_mnemonic(BIP39_VECTOR_12).is_ok());
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let sloppy = BIP39_VECTOR_12.replace(' ', "  ");
        assert_eq!(check_mnemonic(&sloppy).unwrap(), BIP39_VECTOR_12);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        // Valid words, but neither a BIP-39 checksum nor our version tag.
        let phrase = ["abandon"; 12].join(" ");
        assert!(check_mnemonic(&phrase).is_err());
    }

    #[test]
    fn test_unknown_word_rejected() {
        let phrase = format!("{} zzzz", BIP39_VECTOR_12);
        assert!(check_mnemonic(&phrase).is_err());
    }

    #[test]
    fn test_short_phrase_rejected() {
        assert!(check_mnemonic("abandon about").is_err());
    }
}
