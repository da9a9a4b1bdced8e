//! Encrypted on-disk wallet containers for Cinder
//!
//! Two container formats share one contract: the flat fixed-layout file
//! holding independent (possibly imported) keypairs behind simple
//! linkable addresses, and the SQLite-backed HD container deriving every
//! spend keypair from a BIP-39 mnemonic behind unlinkable addresses.
//! `open_wallet` probes the file and instantiates the right engine; the
//! surrounding chain scanner talks to either through the same output
//! handler and `detect_our_output` entry points.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod base;
mod legacy;

pub mod bip32;
pub mod crypt;
pub mod error;
pub mod flat;
pub mod hd;
pub mod mnemonic;
pub mod types;

pub use crypt::{derive_from_seed, derive_from_seed_legacy, MasterKey, FLAT_CONTAINER_KDF_SALT};
pub use error::{Error, Result};
pub use flat::{FlatWallet, SERIALIZATION_VERSION_V2};
pub use hd::{HdWallet, GENERATE_AHEAD, WALLET_VERSION};
pub use mnemonic::{check_mnemonic, generate_mnemonic, generate_wallet_mnemonic, MNEMONIC_VERSION};
pub use types::{
    AccountAddress, DetectedOutput, KeyOutput, Timestamp, WalletRecord, ADDRESS_TYPE_AUDITABLE,
    ADDRESS_TYPE_UNLINKABLE,
};

pub use cinder_crypto::{Hash, KeyDerivation, KeyPair, PublicKey, SecretKey};

use cinder_crypto::fast_hash;
use cinder_params::NetworkType;
use std::path::Path;

/// A wallet container of either flavor.
pub enum Wallet {
    /// Flat encrypted container (simple addresses).
    Flat(FlatWallet),
    /// Database-backed HD container (unlinkable addresses).
    Hd(HdWallet),
}

/// Probe the file type and open the matching engine.
pub fn open_wallet(path: &Path, password: &str, network: NetworkType) -> Result<Wallet> {
    if HdWallet::is_sqlite(path) {
        Ok(Wallet::Hd(HdWallet::open(path, password, network)?))
    } else {
        Ok(Wallet::Flat(FlatWallet::open(path, password, network)?))
    }
}

impl Wallet {
    /// The wallet's primary address.
    pub fn get_first_address(&self) -> Result<AccountAddress> {
        self.record_to_address(&self.get_records()[0])
    }

    /// All records, look-ahead included.
    pub fn get_records(&self) -> &[WalletRecord] {
        match self {
            Wallet::Flat(w) => &w.base().wallet_records,
            Wallet::Hd(w) => &w.base().wallet_records,
        }
    }

    /// Number of records handed out to callers (for HD wallets this is
    /// the used count, not the look-ahead window).
    pub fn get_actual_records_count(&self) -> usize {
        match self {
            Wallet::Flat(w) => w.base().wallet_records.len(),
            Wallet::Hd(w) => w.get_used_address_count(),
        }
    }

    /// Container view public key.
    pub fn get_view_public_key(&self) -> &PublicKey {
        match self {
            Wallet::Flat(w) => &w.base().view_public_key,
            Wallet::Hd(w) => &w.base().view_public_key,
        }
    }

    /// Container view secret key.
    pub fn get_view_secret_key(&self) -> &SecretKey {
        match self {
            Wallet::Flat(w) => &w.base().view_secret_key,
            Wallet::Hd(w) => &w.base().view_secret_key,
        }
    }

    /// Lower bound on every record's creation time, 0 when unknown.
    pub fn get_oldest_timestamp(&self) -> Timestamp {
        match self {
            Wallet::Flat(w) => w.base().oldest_timestamp,
            Wallet::Hd(w) => w.base().oldest_timestamp,
        }
    }

    /// Whether the container holds no spend secrets.
    pub fn is_view_only(&self) -> bool {
        match self {
            Wallet::Flat(w) => w.is_view_only(),
            Wallet::Hd(w) => w.is_view_only(),
        }
    }

    /// Whether outgoing address history can be decrypted.
    pub fn can_view_outgoing_addresses(&self) -> bool {
        match self {
            Wallet::Flat(w) => w.can_view_outgoing_addresses(),
            Wallet::Hd(w) => w.can_view_outgoing_addresses(),
        }
    }

    /// Stable cache identifier: hash of the view public key plus a
    /// tracking-capability suffix.
    pub fn get_cache_name(&self) -> String {
        let mut name = hex::encode(fast_hash(&self.get_view_public_key().0));
        if self.is_view_only() {
            if self.can_view_outgoing_addresses() {
                name.push_str("-view-only-voa");
            } else {
                name.push_str("-view-only");
            }
        }
        name
    }

    /// Address of a record, in this container's address shape.
    pub fn record_to_address(&self, record: &WalletRecord) -> Result<AccountAddress> {
        match self {
            Wallet::Flat(w) => Ok(w.record_to_address(record)),
            Wallet::Hd(w) => w.record_to_address(record),
        }
    }

    /// Find the record behind an address; foreign address shapes miss.
    pub fn get_record(&self, address: &AccountAddress) -> Option<WalletRecord> {
        match self {
            Wallet::Flat(w) => w.get_record(address),
            Wallet::Hd(w) => w.get_record(address),
        }
    }

    /// Whether the address belongs to this container.
    pub fn is_our_address(&self, address: &AccountAddress) -> bool {
        self.get_record(address).is_some()
    }

    /// Add records: the flat engine appends (random or imported), the HD
    /// engine advances its used count. Returns the affected records and
    /// whether a lowered timestamp requires rescanning from `ct`.
    pub fn generate_new_addresses(
        &mut self,
        secret_keys: &[SecretKey],
        ct: Timestamp,
        now: Timestamp,
    ) -> Result<(Vec<WalletRecord>, bool)> {
        match self {
            Wallet::Flat(w) => w.generate_new_addresses(secret_keys, ct, now),
            Wallet::Hd(w) => w.generate_new_addresses(secret_keys, ct, now),
        }
    }

    /// Re-encrypt the container under a new password.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        match self {
            Wallet::Flat(w) => w.set_password(password),
            Wallet::Hd(w) => w.set_password(password),
        }
    }

    /// Export to a new container file, optionally view-only.
    pub fn export_wallet(
        &self,
        export_path: &Path,
        new_password: &str,
        view_only: bool,
        view_outgoing_addresses: bool,
    ) -> Result<()> {
        match self {
            Wallet::Flat(w) => {
                w.export_wallet(export_path, new_password, view_only, view_outgoing_addresses)
            }
            Wallet::Hd(w) => {
                w.export_wallet(export_path, new_password, view_only, view_outgoing_addresses)
            }
        }
    }

    /// Export secret material: hex key string for flat containers, the
    /// mnemonic for HD containers.
    pub fn export_keys(&self) -> Result<String> {
        match self {
            Wallet::Flat(w) => {
                if w.is_view_only() {
                    return Err(Error::ViewOnly(
                        "Exporting secret keys not supported by view-only wallet".into(),
                    ));
                }
                Ok(w.export_keys())
            }
            Wallet::Hd(w) => w.export_keys(),
        }
    }

    /// Copy the container (and adjacent folders, for flat wallets).
    pub fn backup(&self, dst_name: &Path, password: &str) -> Result<()> {
        match self {
            Wallet::Flat(w) => w.backup(dst_name, password),
            Wallet::Hd(w) => w.backup(dst_name, password),
        }
    }

    /// Attach a label to an address (HD only).
    pub fn set_label(&mut self, address: &str, label: &str) -> Result<()> {
        match self {
            Wallet::Flat(_) => Err(Error::NotSupported(
                "Linkable wallet file cannot store labels".into(),
            )),
            Wallet::Hd(w) => w.set_label(address, label),
        }
    }

    /// Label of an address, empty when unset or unsupported.
    pub fn get_label(&self, address: &str) -> String {
        match self {
            Wallet::Flat(_) => String::new(),
            Wallet::Hd(w) => w.get_label(address),
        }
    }

    /// Queue a signed transaction for the current network.
    pub fn payment_queue_add(&mut self, tid: &Hash, binary_transaction: &[u8]) -> Result<()> {
        match self {
            Wallet::Flat(w) => {
                w.payment_queue_add(tid, binary_transaction);
                Ok(())
            }
            Wallet::Hd(w) => w.payment_queue_add(tid, binary_transaction),
        }
    }

    /// Queued transactions for the current network.
    pub fn payment_queue_get(&self) -> Result<Vec<Vec<u8>>> {
        match self {
            Wallet::Flat(w) => Ok(w.payment_queue_get()),
            Wallet::Hd(w) => w.payment_queue_get(),
        }
    }

    /// Drop a transaction from the queue.
    pub fn payment_queue_remove(&mut self, tid: &Hash) -> Result<()> {
        match self {
            Wallet::Flat(w) => {
                w.payment_queue_remove(tid);
                Ok(())
            }
            Wallet::Hd(w) => w.payment_queue_remove(tid),
        }
    }

    /// Persist the used-address set of an outgoing transaction.
    pub fn save_history(&mut self, tid: &Hash, used_addresses: &[AccountAddress]) -> Result<bool> {
        match self {
            Wallet::Flat(w) => Ok(w.save_history(tid, used_addresses)),
            Wallet::Hd(w) => {
                w.save_history(tid, used_addresses)?;
                Ok(true)
            }
        }
    }

    /// Load a used-address set; missing history reads empty.
    pub fn load_history(&self, tid: &Hash) -> Vec<AccountAddress> {
        match self {
            Wallet::Flat(w) => w.load_history(tid),
            Wallet::Hd(w) => w.load_history(tid),
        }
    }

    /// Lower the wallet birthday when the first owned output is found.
    pub fn on_first_output_found(&mut self, ts: Timestamp) -> Result<()> {
        match self {
            Wallet::Flat(w) => w.on_first_output_found(ts),
            Wallet::Hd(w) => w.on_first_output_found(ts),
        }
    }

    /// Flush batched mutations; a no-op for the flat container, whose
    /// operations are individually durable.
    pub fn commit(&mut self) -> Result<()> {
        match self {
            Wallet::Flat(_) => Ok(()),
            Wallet::Hd(w) => w.commit(),
        }
    }

    /// Per-output scanning step: produce the spend-key candidate (and,
    /// for HD wallets, the blinding scalar). The `kd` slot caches the
    /// flat engine's per-transaction view derivation.
    pub fn handle_output(
        &self,
        tx_public_key: &PublicKey,
        kd: &mut Option<KeyDerivation>,
        tx_inputs_hash: &Hash,
        output_index: u64,
        output: &KeyOutput,
    ) -> Option<(PublicKey, SecretKey)> {
        match self {
            Wallet::Flat(w) => {
                w.handle_output(tx_public_key, kd, tx_inputs_hash, output_index, output)
            }
            Wallet::Hd(w) => {
                w.handle_output(tx_public_key, kd, tx_inputs_hash, output_index, output)
            }
        }
    }

    /// Claim an output for this wallet. Returns ownership plus the
    /// per-output keypair when spendable; may advance the HD used count.
    pub fn detect_our_output(
        &mut self,
        _tid: &Hash,
        _tx_inputs_hash: &Hash,
        kd: &Option<KeyDerivation>,
        output_index: u64,
        spend_candidate: &PublicKey,
        secret_scalar: &SecretKey,
        output: &KeyOutput,
    ) -> Result<Option<DetectedOutput>> {
        match self {
            Wallet::Flat(w) => {
                Ok(w.detect_our_output(kd, output_index, spend_candidate, output))
            }
            Wallet::Hd(w) => w.detect_our_output(spend_candidate, secret_scalar, output),
        }
    }
}
