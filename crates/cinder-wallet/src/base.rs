//! State shared by both container engines.

use crate::error::{Error, Result};
use crate::types::{Timestamp, WalletRecord};
use cinder_crypto::{keys_match, PublicKey, SecretKey};
use cinder_params::NetworkType;
use std::collections::HashMap;
use std::path::PathBuf;

/// Number of records key-checked at each end of the container on load.
/// Full checks run only on export; sampling keeps load O(1) in work per
/// record for multi-million-record wallets.
pub(crate) const CHECK_KEYS_COUNT: usize = 128;

/// In-memory state common to the flat and HD engines.
pub(crate) struct WalletBase {
    pub view_public_key: PublicKey,
    pub view_secret_key: SecretKey,
    pub wallet_records: Vec<WalletRecord>,
    pub records_map: HashMap<PublicKey, usize>,
    pub oldest_timestamp: Timestamp,
    pub path: PathBuf,
    pub network: NetworkType,
}

impl WalletBase {
    pub fn new(path: PathBuf, network: NetworkType) -> Self {
        Self {
            view_public_key: PublicKey::default(),
            view_secret_key: SecretKey::default(),
            wallet_records: Vec::new(),
            records_map: HashMap::new(),
            oldest_timestamp: 0,
            path,
            network,
        }
    }

    /// Append a record and index it by spend public key.
    pub fn push_record(&mut self, record: WalletRecord) {
        self.records_map
            .insert(record.spend_public_key, self.wallet_records.len());
        self.wallet_records.push(record);
    }

    /// Enforce tracking uniformity and sample spend-key consistency over
    /// freshly decrypted records.
    pub fn validate_records(records: &[WalletRecord]) -> Result<()> {
        let mut tracking_mode = false;
        for (i, record) in records.iter().enumerate() {
            if i == 0 {
                tracking_mode = record.is_tracking();
            } else if tracking_mode != record.is_tracking() {
                return Err(Error::Decrypt(
                    "All addresses must be either tracking or not".into(),
                ));
            }
            if i < CHECK_KEYS_COUNT || i >= records.len().saturating_sub(CHECK_KEYS_COUNT) {
                Self::validate_record_keys(record)?;
            }
        }
        Ok(())
    }

    /// Key-consistency check for a single record.
    pub fn validate_record_keys(record: &WalletRecord) -> Result<()> {
        if record.is_tracking() {
            if !cinder_crypto::key_isvalid(&record.spend_public_key) {
                return Err(Error::Decrypt("Public spend key is incorrect".into()));
            }
        } else if !keys_match(&record.spend_secret_key, &record.spend_public_key) {
            return Err(Error::Decrypt(
                "Restored spend public key doesn't correspond to secret key".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_crypto::random_keypair;

    fn record(tracking: bool) -> WalletRecord {
        let pair = random_keypair();
        WalletRecord {
            spend_public_key: pair.public_key,
            spend_secret_key: if tracking {
                SecretKey::default()
            } else {
                pair.secret_key
            },
            creation_timestamp: 0,
        }
    }

    #[test]
    fn test_uniform_records_pass() {
        let records = vec![record(false), record(false)];
        assert!(WalletBase::validate_records(&records).is_ok());
        let tracking = vec![record(true), record(true)];
        assert!(WalletBase::validate_records(&tracking).is_ok());
    }

    #[test]
    fn test_mixed_records_rejected() {
        let records = vec![record(false), record(true)];
        assert!(WalletBase::validate_records(&records).is_err());
    }

    #[test]
    fn test_mismatched_spend_key_rejected() {
        let mut bad = record(false);
        bad.spend_secret_key = random_keypair().secret_key;
        assert!(WalletBase::validate_records(&[bad]).is_err());
    }
}
