//! Reader for the pre-V2 flat container serialization.
//!
//! V1 files are a single ChaCha8 envelope under the same master key:
//! `version:u8 ‖ iv:8B ‖ chacha8(key, iv, view_pub:32 ‖ view_sec:32 ‖
//! count:u64le ‖ count × (pk:32 ‖ sk:32 ‖ ts:u64le))`. The flat engine
//! rewrites any such file in the V2 layout right after a successful load.

use crate::crypt::MasterKey;
use crate::error::{Error, Result};
use crate::types::WalletRecord;
use cinder_crypto::{chacha8, keys_match, PublicKey, SecretKey};

const HEADER_SIZE: usize = 1 + 8;
const KEYS_SIZE: usize = 32 + 32 + 8;
const RECORD_SIZE: usize = 32 + 32 + 8;

/// Parse a whole legacy file body.
pub(crate) fn load_legacy_wallet(
    data: &[u8],
    wallet_key: &MasterKey,
) -> Result<(PublicKey, SecretKey, Vec<WalletRecord>)> {
    if data.len() < HEADER_SIZE + KEYS_SIZE {
        return Err(Error::Decrypt("Legacy wallet file is truncated".into()));
    }
    let mut iv = [0u8; 8];
    iv.copy_from_slice(&data[1..9]);
    let plain = chacha8(wallet_key.as_bytes(), &iv, &data[HEADER_SIZE..]);

    let view_public_key = PublicKey(read_32(&plain, 0));
    let view_secret_key = SecretKey(read_32(&plain, 32));
    if !keys_match(&view_secret_key, &view_public_key) {
        return Err(Error::Decrypt(
            "Restored view public key doesn't correspond to secret key".into(),
        ));
    }

    let count = u64::from_le_bytes(
        plain[64..72]
            .try_into()
            .map_err(|_| Error::Decrypt("Legacy wallet file is truncated".into()))?,
    ) as usize;
    if plain.len() < KEYS_SIZE + count * RECORD_SIZE {
        return Err(Error::Decrypt("Legacy record table is truncated".into()));
    }

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let offset = KEYS_SIZE + i * RECORD_SIZE;
        let ts_bytes: [u8; 8] = plain[offset + 64..offset + 72]
            .try_into()
            .map_err(|_| Error::Decrypt("Legacy record table is truncated".into()))?;
        records.push(WalletRecord {
            spend_public_key: PublicKey(read_32(&plain, offset)),
            spend_secret_key: SecretKey(read_32(&plain, offset + 32)),
            creation_timestamp: u64::from_le_bytes(ts_bytes),
        });
    }
    Ok((view_public_key, view_secret_key, records))
}

fn read_32(data: &[u8], offset: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[offset..offset + 32]);
    out
}

/// Assemble legacy file bytes; test fixtures only.
#[cfg(test)]
pub(crate) fn write_legacy_wallet(
    version: u8,
    view_public_key: &PublicKey,
    view_secret_key: &SecretKey,
    records: &[WalletRecord],
    wallet_key: &MasterKey,
) -> Vec<u8> {
    let mut plain = Vec::with_capacity(KEYS_SIZE + records.len() * RECORD_SIZE);
    plain.extend_from_slice(&view_public_key.0);
    plain.extend_from_slice(&view_secret_key.0);
    plain.extend_from_slice(&(records.len() as u64).to_le_bytes());
    for record in records {
        plain.extend_from_slice(&record.spend_public_key.0);
        plain.extend_from_slice(&record.spend_secret_key.0);
        plain.extend_from_slice(&record.creation_timestamp.to_le_bytes());
    }
    let iv: [u8; 8] = cinder_crypto::random_bytes();
    let mut out = Vec::with_capacity(HEADER_SIZE + plain.len());
    out.push(version);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&chacha8(wallet_key.as_bytes(), &iv, &plain));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_crypto::random_keypair;

    #[test]
    fn test_legacy_round_trip() {
        let key = MasterKey::from_bytes([3u8; 32]);
        let view = random_keypair();
        let spend = random_keypair();
        let records = vec![WalletRecord {
            spend_public_key: spend.public_key,
            spend_secret_key: spend.secret_key,
            creation_timestamp: 1234,
        }];
        let bytes = write_legacy_wallet(1, &view.public_key, &view.secret_key, &records, &key);
        let (vp, vs, loaded) = load_legacy_wallet(&bytes, &key).unwrap();
        assert_eq!(vp, view.public_key);
        assert_eq!(vs, view.secret_key);
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = MasterKey::from_bytes([3u8; 32]);
        let view = random_keypair();
        let bytes = write_legacy_wallet(1, &view.public_key, &view.secret_key, &[], &key);
        let wrong = MasterKey::from_bytes([4u8; 32]);
        assert!(load_legacy_wallet(&bytes, &wrong).is_err());
    }
}
