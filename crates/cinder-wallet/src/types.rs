//! Wallet records, addresses, and scanner-facing output types.

use cinder_crypto::{KeyPair, PublicKey, SecretKey};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Address-type byte of a regular unlinkable HD wallet.
pub const ADDRESS_TYPE_UNLINKABLE: u8 = 1;
/// Address-type byte of an auditable unlinkable HD wallet.
pub const ADDRESS_TYPE_AUDITABLE: u8 = 2;

/// One spend keypair owned by a container, plus the time the chain first
/// needs to be scanned for it. A zero secret key marks a tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletRecord {
    /// Spend public key, unique within a container.
    pub spend_public_key: PublicKey,
    /// Spend secret key; all-zero for tracking records.
    pub spend_secret_key: SecretKey,
    /// Earliest time an output could have been sent to this record.
    pub creation_timestamp: Timestamp,
}

impl WalletRecord {
    /// Whether this record can only watch, not spend.
    pub fn is_tracking(&self) -> bool {
        self.spend_secret_key.is_zero()
    }
}

/// The two address shapes the containers produce. Each engine accepts
/// only its own shape in `get_record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountAddress {
    /// Legacy linkable address: plain spend and view public keys.
    Simple {
        /// Record spend public key.
        spend_public_key: PublicKey,
        /// Container view public key.
        view_public_key: PublicKey,
    },
    /// HD unlinkable address.
    Unlinkable {
        /// Record spend public key.
        s: PublicKey,
        /// Spend key encrypted to the view scalar (`v·S`).
        sv: PublicKey,
        /// Whether outputs to this address must carry the auditable flag.
        is_auditable: bool,
    },
}

/// One key output of a transaction as seen by the chain scanner.
#[derive(Debug, Clone, Copy)]
pub struct KeyOutput {
    /// Output amount in atomic units.
    pub amount: u64,
    /// One-time output public key.
    pub public_key: PublicKey,
    /// Sender-published encrypted output secret (unlinkable scheme only).
    pub encrypted_secret: PublicKey,
    /// Auditable-output flag.
    pub is_auditable: bool,
}

/// A recognized output together with everything needed to spend it.
#[derive(Debug, Clone, Copy)]
pub struct DetectedOutput {
    /// Output amount in atomic units.
    pub amount: u64,
    /// Address the output was sent to.
    pub address: AccountAddress,
    /// One-time output keypair; secret half is zero for tracking wallets.
    pub output_keypair: KeyPair,
}

pub(crate) fn now_unix_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_flag() {
        let mut record = WalletRecord {
            spend_public_key: PublicKey([1; 32]),
            spend_secret_key: SecretKey::default(),
            creation_timestamp: 0,
        };
        assert!(record.is_tracking());
        record.spend_secret_key = SecretKey([2; 32]);
        assert!(!record.is_tracking());
    }
}
