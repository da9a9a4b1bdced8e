//! Flat encrypted container ("simple" linkable addresses).
//!
//! A fixed-layout binary file of per-record ChaCha8 envelopes:
//! `version:u8 ‖ next_iv:8B ‖ enc_view_keys:80B ‖ capacity:u64le ‖
//! count:u64le ‖ enc_record[count]`, each encrypted record being
//! `iv:8B ‖ chacha8(key, iv, pk:32 ‖ sk:32 ‖ ts:u64le)`. Appends write
//! records before updating the count header (fsync between), so a torn
//! append is invisible on reload. Structural rewrites go through
//! `save_and_check`: write a sibling temp file, reload and compare it,
//! then atomically rename over the original.

use crate::base::WalletBase;
use crate::crypt::{derive_from_seed_legacy, MasterKey, FLAT_CONTAINER_KDF_SALT};
use crate::error::{Error, Result};
use crate::legacy;
use crate::types::{
    now_unix_timestamp, AccountAddress, DetectedOutput, KeyOutput, Timestamp, WalletRecord,
};
use cinder_crypto::{
    chacha8, derive_public_key, derive_secret_key, fast_hash, generate_key_derivation, keys_match,
    random_bytes, random_keypair, secret_key_to_public_key, underive_public_key, Hash,
    KeyDerivation, KeyPair, PublicKey, SecretKey,
};
use cinder_params::NetworkType;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Current flat container format version.
pub const SERIALIZATION_VERSION_V2: u8 = 6;

const RECORD_IV_SIZE: usize = 8;
const RECORD_PLAIN_SIZE: usize = 32 + 32 + 8;
const ENCRYPTED_RECORD_SIZE: usize = RECORD_IV_SIZE + RECORD_PLAIN_SIZE;
/// `next_iv` plus the encrypted view-key record.
const PREFIX_SIZE: usize = RECORD_IV_SIZE + ENCRYPTED_RECORD_SIZE;
const COUNT_CAPACITY_OFFSET: u64 = 1 + PREFIX_SIZE as u64;

fn wallet_file_size(records: usize) -> u64 {
    (1 + PREFIX_SIZE + 16 + ENCRYPTED_RECORD_SIZE * records) as u64
}

fn encrypt_record(
    key: &MasterKey,
    public_key: &PublicKey,
    secret_key: &SecretKey,
    creation_timestamp: Timestamp,
) -> [u8; ENCRYPTED_RECORD_SIZE] {
    let mut plain = [0u8; RECORD_PLAIN_SIZE];
    plain[..32].copy_from_slice(&public_key.0);
    plain[32..64].copy_from_slice(&secret_key.0);
    plain[64..].copy_from_slice(&creation_timestamp.to_le_bytes());

    let iv: [u8; RECORD_IV_SIZE] = random_bytes();
    let encrypted = chacha8(key.as_bytes(), &iv, &plain);
    let mut out = [0u8; ENCRYPTED_RECORD_SIZE];
    out[..RECORD_IV_SIZE].copy_from_slice(&iv);
    out[RECORD_IV_SIZE..].copy_from_slice(&encrypted);
    out
}

fn decrypt_record(key: &MasterKey, data: &[u8]) -> WalletRecord {
    let mut iv = [0u8; RECORD_IV_SIZE];
    iv.copy_from_slice(&data[..RECORD_IV_SIZE]);
    let plain = chacha8(key.as_bytes(), &iv, &data[RECORD_IV_SIZE..ENCRYPTED_RECORD_SIZE]);

    let mut public_key = [0u8; 32];
    let mut secret_key = [0u8; 32];
    let mut ts = [0u8; 8];
    public_key.copy_from_slice(&plain[..32]);
    secret_key.copy_from_slice(&plain[32..64]);
    ts.copy_from_slice(&plain[64..]);
    WalletRecord {
        spend_public_key: PublicKey(public_key),
        spend_secret_key: SecretKey(secret_key),
        creation_timestamp: Timestamp::from_le_bytes(ts),
    }
}

/// Flat container engine.
pub struct FlatWallet {
    base: WalletBase,
    wallet_key: MasterKey,
    /// `None` while the on-disk bytes are still the legacy format.
    file: Option<File>,
    seed: Hash,
    tx_derivation_seed: Hash,
    history_filename_seed: Hash,
    history_key: Hash,
}

impl FlatWallet {
    /// Create a new container, optionally importing a 256-hex-character
    /// key string (`spend_pub ‖ view_pub ‖ spend_sec ‖ view_sec`).
    pub fn create(
        path: &Path,
        password: &str,
        import_keys: &str,
        creation_timestamp: Timestamp,
        network: NetworkType,
    ) -> Result<Self> {
        let wallet_key = MasterKey::from_password(FLAT_CONTAINER_KDF_SALT, password)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    Error::Exists(path.display().to_string())
                } else {
                    Error::write(e)
                }
            })?;

        let mut base = WalletBase::new(path.to_path_buf(), network);
        let record = if import_keys.is_empty() {
            base.oldest_timestamp = now_unix_timestamp();
            let view = random_keypair();
            base.view_public_key = view.public_key;
            base.view_secret_key = view.secret_key;
            let spend = random_keypair();
            WalletRecord {
                spend_public_key: spend.public_key,
                spend_secret_key: spend.secret_key,
                creation_timestamp: base.oldest_timestamp,
            }
        } else {
            // Callers pass 0 when the key's age is unknown, which scans
            // from genesis.
            let record = Self::parse_import_keys(import_keys, creation_timestamp, &mut base)?;
            base.oldest_timestamp = creation_timestamp;
            record
        };
        base.push_record(record);

        let mut wallet = Self {
            base,
            wallet_key,
            file: Some(file),
            seed: Hash::default(),
            tx_derivation_seed: Hash::default(),
            history_filename_seed: Hash::default(),
            history_key: Hash::default(),
        };
        wallet.save_and_check()?;
        wallet.derive_seeds();
        Ok(wallet)
    }

    /// Open an existing container.
    pub fn open(path: &Path, password: &str, network: NetworkType) -> Result<Self> {
        let wallet_key = MasterKey::from_password(FLAT_CONTAINER_KDF_SALT, password)?;
        Self::load_with_key(path, wallet_key, network)
    }

    fn parse_import_keys(
        import_keys: &str,
        creation_timestamp: Timestamp,
        base: &mut WalletBase,
    ) -> Result<WalletRecord> {
        if import_keys.len() != 256 {
            return Err(Error::Decrypt(
                "Imported keys should be exactly 128 hex bytes".into(),
            ));
        }
        let bytes = hex::decode(import_keys)
            .map_err(|_| Error::Decrypt("Imported keys should contain only hex bytes".into()))?;
        let part = |i: usize| -> [u8; 32] {
            let mut out = [0u8; 32];
            out.copy_from_slice(&bytes[i * 32..(i + 1) * 32]);
            out
        };
        let record = WalletRecord {
            spend_public_key: PublicKey(part(0)),
            spend_secret_key: SecretKey(part(2)),
            creation_timestamp,
        };
        base.view_public_key = PublicKey(part(1));
        base.view_secret_key = SecretKey(part(3));

        if !keys_match(&base.view_secret_key, &base.view_public_key) {
            return Err(Error::Decrypt(
                "Imported secret view key does not match corresponding public key".into(),
            ));
        }
        if !record.is_tracking() && !keys_match(&record.spend_secret_key, &record.spend_public_key)
        {
            return Err(Error::Decrypt(
                "Imported secret spend key does not match corresponding public key".into(),
            ));
        }
        Ok(record)
    }

    fn load_with_key(path: &Path, wallet_key: MasterKey, network: NetworkType) -> Result<Self> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            // Read-only media: open for reading, skip rewrites later.
            Err(_) => OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(Error::read)?,
        };
        let mut version = [0u8; 1];
        file.read_exact(&mut version).map_err(Error::read)?;
        if version[0] > SERIALIZATION_VERSION_V2 {
            return Err(Error::UnknownVersion(format!(
                "version {}",
                version[0]
            )));
        }

        let mut wallet = Self {
            base: WalletBase::new(path.to_path_buf(), network),
            wallet_key,
            file: Some(file),
            seed: Hash::default(),
            tx_derivation_seed: Hash::default(),
            history_filename_seed: Hash::default(),
            history_key: Hash::default(),
        };

        if version[0] < SERIALIZATION_VERSION_V2 {
            wallet.load_legacy_wallet_file()?;
            wallet.file = None;
            // Try to overwrite the legacy bytes with the current format.
            match wallet.save_and_check() {
                Ok(()) => warn!("Overwritten legacy wallet file with new data format"),
                Err(_) => {} // probably read-only media
            }
        } else {
            wallet.load_container_storage()?;
        }
        if wallet.base.wallet_records.is_empty() {
            return Err(Error::Decrypt("Error reading wallet file".into()));
        }
        wallet.derive_seeds();
        Ok(wallet)
    }

    fn load_legacy_wallet_file(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::Read("Wallet file is not open".into()));
        };
        file.seek(SeekFrom::Start(0)).map_err(Error::read)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(Error::read)?;

        let (view_public_key, view_secret_key, records) =
            legacy::load_legacy_wallet(&data, &self.wallet_key)?;
        WalletBase::validate_records(&records)?;
        self.base.view_public_key = view_public_key;
        self.base.view_secret_key = view_secret_key;
        self.base.oldest_timestamp = Timestamp::MAX;
        for record in records {
            self.base.oldest_timestamp =
                self.base.oldest_timestamp.min(record.creation_timestamp);
            self.base.push_record(record);
        }
        Ok(())
    }

    fn load_container_storage(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::Read("Wallet file is not open".into()));
        };
        file.seek(SeekFrom::Start(0)).map_err(Error::read)?;
        let mut header = vec![0u8; 1 + PREFIX_SIZE + 16];
        file.read_exact(&mut header).map_err(Error::read)?;

        let enc_view_keys = &header[1 + RECORD_IV_SIZE..1 + PREFIX_SIZE];
        let capacity = u64::from_le_bytes(
            header[1 + PREFIX_SIZE..1 + PREFIX_SIZE + 8]
                .try_into()
                .map_err(|_| Error::Decrypt("Corrupt count header".into()))?,
        );
        let count = u64::from_le_bytes(
            header[1 + PREFIX_SIZE + 8..]
                .try_into()
                .map_err(|_| Error::Decrypt("Corrupt count header".into()))?,
        );

        let view_record = decrypt_record(&self.wallet_key, enc_view_keys);
        self.base.view_public_key = view_record.spend_public_key;
        self.base.view_secret_key = view_record.spend_secret_key;
        if !keys_match(&self.base.view_secret_key, &self.base.view_public_key) {
            return Err(Error::Decrypt(
                "Restored view public key doesn't correspond to secret key".into(),
            ));
        }

        // Protection against write shredding: trust neither counter past
        // the other, nor past what the file actually holds.
        let file_size = file.metadata().map_err(Error::read)?.len();
        let available = file_size.saturating_sub(wallet_file_size(0)) / ENCRYPTED_RECORD_SIZE as u64;
        let item_count = count.min(capacity).min(available);
        let item_count = usize::try_from(item_count)
            .map_err(|_| Error::Decrypt(format!("Restored item count is too big {item_count}")))?;

        let mut encrypted = vec![0u8; item_count * ENCRYPTED_RECORD_SIZE];
        file.read_exact(&mut encrypted).map_err(Error::read)?;
        let records: Vec<WalletRecord> = encrypted
            .chunks_exact(ENCRYPTED_RECORD_SIZE)
            .map(|chunk| decrypt_record(&self.wallet_key, chunk))
            .collect();
        WalletBase::validate_records(&records)?;

        self.base.oldest_timestamp = Timestamp::MAX;
        for record in records {
            self.base.oldest_timestamp =
                self.base.oldest_timestamp.min(record.creation_timestamp);
            self.base.push_record(record);
        }

        let should_be_size = wallet_file_size(item_count);
        if file_size > should_be_size {
            // Legacy over-allocation or torn tail; read-only media is fine.
            match file.set_len(should_be_size) {
                Ok(()) => warn!(size = should_be_size, "Truncated oversized wallet file"),
                Err(_) => {}
            }
        }
        Ok(())
    }

    fn derive_seeds(&mut self) {
        if self.is_view_only() {
            return;
        }
        let mut seed_data = Vec::with_capacity(64);
        seed_data.extend_from_slice(&self.base.view_secret_key.0);
        seed_data.extend_from_slice(&self.base.wallet_records[0].spend_secret_key.0);
        self.seed = fast_hash(&seed_data);
        self.tx_derivation_seed = derive_from_seed_legacy(&self.seed, "tx_derivation");
        self.history_filename_seed = derive_from_seed_legacy(&self.seed, "history_filename");
        self.history_key = derive_from_seed_legacy(&self.seed, "history");
    }

    fn save(
        &self,
        export_path: &Path,
        wallet_key: &MasterKey,
        view_only: bool,
        create_new: bool,
    ) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let mut file = options.open(export_path).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Error::Exists(export_path.display().to_string())
            } else {
                Error::write(e)
            }
        })?;

        let mut out = Vec::with_capacity(wallet_file_size(self.base.wallet_records.len()) as usize);
        out.push(SERIALIZATION_VERSION_V2);
        out.extend_from_slice(&random_bytes::<RECORD_IV_SIZE>());
        out.extend_from_slice(&encrypt_record(
            wallet_key,
            &self.base.view_public_key,
            &self.base.view_secret_key,
            self.base.oldest_timestamp,
        ));
        let count = (self.base.wallet_records.len() as u64).to_le_bytes();
        out.extend_from_slice(&count); // capacity is always written as count
        out.extend_from_slice(&count);
        for record in &self.base.wallet_records {
            let secret = if view_only {
                SecretKey::default()
            } else {
                record.spend_secret_key
            };
            out.extend_from_slice(&encrypt_record(
                wallet_key,
                &record.spend_public_key,
                &secret,
                record.creation_timestamp,
            ));
        }
        file.write_all(&out).map_err(Error::write)?;
        file.sync_all().map_err(Error::write)?;
        Ok(())
    }

    /// Write a fresh copy next to the container, reload and compare it,
    /// then atomically replace the original.
    pub fn save_and_check(&mut self) -> Result<()> {
        let mut tmp_os = self.base.path.clone().into_os_string();
        tmp_os.push(".tmp");
        let tmp_path = PathBuf::from(tmp_os);

        self.save(&tmp_path, &self.wallet_key, false, false)?;
        let other = Self::load_with_key(&tmp_path, self.wallet_key.clone(), self.base.network)?;
        if !self.state_matches(&other) {
            return Err(Error::Write(
                "Error writing wallet file - records do not match".into(),
            ));
        }
        self.file = None;
        fs::rename(&tmp_path, &self.base.path).map_err(Error::write)?;
        self.file = other.file;
        Ok(())
    }

    fn state_matches(&self, other: &Self) -> bool {
        self.base.view_public_key == other.base.view_public_key
            && self.base.view_secret_key == other.base.view_secret_key
            && self.base.oldest_timestamp == other.base.oldest_timestamp
            && self.base.wallet_records == other.base.wallet_records
    }

    /// Re-encrypt the container under a new password.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        self.wallet_key = MasterKey::from_password(FLAT_CONTAINER_KDF_SALT, password)?;
        self.save_and_check()
    }

    /// Export the container to a new file under a new password,
    /// optionally stripping spend secrets.
    pub fn export_wallet(
        &self,
        export_path: &Path,
        new_password: &str,
        view_only: bool,
        _view_outgoing_addresses: bool,
    ) -> Result<()> {
        // Unlike load-time sampling, exports verify every record.
        for record in &self.base.wallet_records {
            WalletBase::validate_record_keys(record)
                .map_err(|_| Error::Decrypt("Wallet is corrupted - exporting is dangerous".into()))?;
        }
        let new_key = MasterKey::from_password(FLAT_CONTAINER_KDF_SALT, new_password)?;
        self.save(export_path, &new_key, view_only, true)
    }

    /// Export the first record and view keys as 256 hex characters.
    pub fn export_keys(&self) -> String {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.base.wallet_records[0].spend_public_key.0);
        out.extend_from_slice(&self.base.view_public_key.0);
        out.extend_from_slice(&self.base.wallet_records[0].spend_secret_key.0);
        out.extend_from_slice(&self.base.view_secret_key.0);
        hex::encode(out)
    }

    /// Append new records: random keypairs for empty secrets, imported
    /// keypairs otherwise. Returns the affected records and whether a
    /// timestamp was lowered (caller must rescan from `ct`).
    pub fn generate_new_addresses(
        &mut self,
        secret_keys: &[SecretKey],
        ct: Timestamp,
        now: Timestamp,
    ) -> Result<(Vec<WalletRecord>, bool)> {
        if self.is_view_only() {
            return Err(Error::ViewOnly(
                "Generate new addresses impossible for view-only wallet".into(),
            ));
        }
        if self.file.is_none() {
            warn!("Creation of new addresses forces overwrite of legacy format wallet");
            self.save_and_check()?;
        }
        let mut rescan_from_ct = false;
        let mut result = Vec::with_capacity(secret_keys.len());

        let append_pos = wallet_file_size(self.base.wallet_records.len());
        {
            let Some(file) = self.file.as_mut() else {
                return Err(Error::Write("Wallet file is not open".into()));
            };
            file.seek(SeekFrom::Start(append_pos)).map_err(Error::write)?;
        }
        for secret_key in secret_keys {
            let record = if secret_key.is_zero() {
                let mut pair = random_keypair();
                while self.base.records_map.contains_key(&pair.public_key) {
                    pair = random_keypair();
                }
                self.base.oldest_timestamp = self.base.oldest_timestamp.min(now);
                WalletRecord {
                    spend_public_key: pair.public_key,
                    spend_secret_key: pair.secret_key,
                    creation_timestamp: now,
                }
            } else {
                let public_key = secret_key_to_public_key(secret_key).ok_or_else(|| {
                    Error::Decrypt(format!(
                        "Imported keypair is invalid - sk={}",
                        hex::encode(secret_key.0)
                    ))
                })?;
                WalletRecord {
                    spend_public_key: public_key,
                    spend_secret_key: *secret_key,
                    creation_timestamp: ct,
                }
            };

            if let Some(&index) = self.base.records_map.get(&record.spend_public_key) {
                let existing = &mut self.base.wallet_records[index];
                if existing.creation_timestamp > record.creation_timestamp {
                    existing.creation_timestamp = record.creation_timestamp;
                    self.base.oldest_timestamp =
                        self.base.oldest_timestamp.min(record.creation_timestamp);
                    rescan_from_ct = true;
                }
                result.push(self.base.wallet_records[index]);
                continue;
            }

            self.base.push_record(record);
            let encrypted = encrypt_record(
                &self.wallet_key,
                &record.spend_public_key,
                &record.spend_secret_key,
                record.creation_timestamp,
            );
            let Some(file) = self.file.as_mut() else {
                return Err(Error::Write("Wallet file is not open".into()));
            };
            file.write_all(&encrypted).map_err(Error::write)?;
            result.push(record);
        }

        {
            let Some(file) = self.file.as_mut() else {
                return Err(Error::Write("Wallet file is not open".into()));
            };
            file.sync_all().map_err(Error::write)?;
            // Only now make the new records visible.
            file.seek(SeekFrom::Start(COUNT_CAPACITY_OFFSET))
                .map_err(Error::write)?;
            let count = (self.base.wallet_records.len() as u64).to_le_bytes();
            file.write_all(&count).map_err(Error::write)?;
            file.write_all(&count).map_err(Error::write)?;
            file.sync_all().map_err(Error::write)?;
        }

        if rescan_from_ct {
            // Timestamps live inside existing records; interior rewrites
            // go through the checked full save.
            warn!(
                ct,
                "Updating creation timestamp of existing addresses in wallet file"
            );
            self.save_and_check()?;
        }
        Ok((result, rescan_from_ct))
    }

    /// Simple address of a record.
    pub fn record_to_address(&self, record: &WalletRecord) -> AccountAddress {
        AccountAddress::Simple {
            spend_public_key: record.spend_public_key,
            view_public_key: self.base.view_public_key,
        }
    }

    /// Look a simple address up in this container.
    pub fn get_record(&self, address: &AccountAddress) -> Option<WalletRecord> {
        let AccountAddress::Simple {
            spend_public_key,
            view_public_key,
        } = address
        else {
            return None;
        };
        if *view_public_key != self.base.view_public_key {
            return None;
        }
        let index = *self.base.records_map.get(spend_public_key)?;
        Some(self.base.wallet_records[index])
    }

    /// Backfill zero creation timestamps once the first owned output is
    /// seen on mainnet.
    pub fn on_first_output_found(&mut self, ts: Timestamp) -> Result<()> {
        if self.base.network != NetworkType::Mainnet {
            return Ok(()); // legacy format has no place for other nets
        }
        if ts == 0 || self.base.oldest_timestamp != 0 {
            return Ok(());
        }
        self.base.oldest_timestamp = ts;
        for record in &mut self.base.wallet_records {
            if record.creation_timestamp == 0 {
                record.creation_timestamp = ts;
            }
        }
        warn!(ts, "Updating creation timestamp in wallet file");
        self.save_and_check()
    }

    /// Copy the container plus its history and payment-queue folders.
    pub fn backup(&self, dst_name: &Path, password: &str) -> Result<()> {
        // Same per-network suffixes as the live folders, so opening the
        // backup on this network finds them.
        let dst_history = path_with_suffix(
            dst_name,
            &format!(".history{}", self.base.network.file_suffix()),
        );
        let dst_payments = path_with_suffix(
            dst_name,
            &format!(".payments{}", self.base.network.file_suffix()),
        );
        fs::create_dir_all(&dst_payments).map_err(Error::write)?;
        fs::create_dir_all(&dst_history).map_err(Error::write)?;
        self.export_wallet(dst_name, password, false, false)?;
        copy_folder(&self.payment_queue_folder(), &dst_payments)?;
        copy_folder(&self.history_folder(), &dst_history)?;
        Ok(())
    }

    fn history_folder(&self) -> PathBuf {
        path_with_suffix(
            &self.base.path,
            &format!(".history{}", self.base.network.file_suffix()),
        )
    }

    fn payment_queue_folder(&self) -> PathBuf {
        path_with_suffix(
            &self.base.path,
            &format!(".payments{}", self.base.network.file_suffix()),
        )
    }

    /// Persist the used-address set of an outgoing transaction, encrypted
    /// under the history key and filed under an obfuscated name.
    pub fn save_history(&self, tid: &Hash, used_addresses: &[AccountAddress]) -> bool {
        let folder = self.history_folder();
        if fs::create_dir_all(&folder).is_err() {
            return false;
        }
        if used_addresses.is_empty() {
            return true; // saved empty history
        }
        let mut data = Vec::with_capacity(used_addresses.len() * 64);
        for address in used_addresses {
            if let AccountAddress::Simple {
                spend_public_key,
                view_public_key,
            } = address
            {
                data.extend_from_slice(&view_public_key.0);
                data.extend_from_slice(&spend_public_key.0);
            }
        }
        let iv: [u8; RECORD_IV_SIZE] = random_bytes();
        let mut blob = Vec::with_capacity(RECORD_IV_SIZE + data.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&chacha8(&self.history_key, &iv, &data));

        let file = folder.join(format!("{}.txh", hex::encode(self.history_filename(tid))));
        atomic_save_file(&file, &blob, &folder.join("_tmp.txh"))
    }

    /// Load a previously saved used-address set; missing or malformed
    /// history reads as empty.
    pub fn load_history(&self, tid: &Hash) -> Vec<AccountAddress> {
        let folder = self.history_folder();
        let file = folder.join(format!("{}.txh", hex::encode(self.history_filename(tid))));
        let Ok(blob) = fs::read(&file) else {
            return Vec::new();
        };
        if blob.len() < RECORD_IV_SIZE || (blob.len() - RECORD_IV_SIZE) % 64 != 0 {
            return Vec::new();
        }
        let mut iv = [0u8; RECORD_IV_SIZE];
        iv.copy_from_slice(&blob[..RECORD_IV_SIZE]);
        let data = chacha8(&self.history_key, &iv, &blob[RECORD_IV_SIZE..]);
        data.chunks_exact(64)
            .map(|chunk| {
                let mut view = [0u8; 32];
                let mut spend = [0u8; 32];
                view.copy_from_slice(&chunk[..32]);
                spend.copy_from_slice(&chunk[32..]);
                AccountAddress::Simple {
                    spend_public_key: PublicKey(spend),
                    view_public_key: PublicKey(view),
                }
            })
            .collect()
    }

    fn history_filename(&self, tid: &Hash) -> Hash {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(tid);
        data.extend_from_slice(&self.history_filename_seed);
        fast_hash(&data)
    }

    /// Queue a signed transaction as an adjacent file.
    pub fn payment_queue_add(&self, tid: &Hash, binary_transaction: &[u8]) {
        let folder = self.payment_queue_folder();
        let _ = fs::create_dir_all(&folder);
        let file = folder.join(format!("{}.tx", hex::encode(tid)));
        if !atomic_save_file(&file, binary_transaction, &folder.join("tmp.tx")) {
            warn!(tid = %hex::encode(tid), "Failed to save transaction to payment queue");
        } else {
            info!(tid = %hex::encode(tid), "Saved transaction to payment queue");
        }
    }

    /// All queued transactions.
    pub fn payment_queue_get(&self) -> Vec<Vec<u8>> {
        let folder = self.payment_queue_folder();
        let _ = fs::remove_file(folder.join("tmp.tx"));
        let Ok(entries) = fs::read_dir(&folder) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        for entry in entries.flatten() {
            if let Ok(body) = fs::read(entry.path()) {
                result.push(body);
            }
        }
        result
    }

    /// Drop a transaction from the queue.
    pub fn payment_queue_remove(&self, tid: &Hash) {
        let folder = self.payment_queue_folder();
        let file = folder.join(format!("{}.tx", hex::encode(tid)));
        if fs::remove_file(&file).is_err() {
            warn!(tid = %hex::encode(tid), "Failed to remove transaction from payment queue");
        } else {
            info!(tid = %hex::encode(tid), "Removed transaction from payment queue");
        }
        let _ = fs::remove_dir(&folder); // when it becomes empty
    }

    /// Per-output scanning step. Computes (and caches per transaction)
    /// the view-key derivation, then underives the spend-key candidate.
    pub fn handle_output(
        &self,
        tx_public_key: &PublicKey,
        kd: &mut Option<KeyDerivation>,
        _tx_inputs_hash: &Hash,
        output_index: u64,
        output: &KeyOutput,
    ) -> Option<(PublicKey, SecretKey)> {
        if kd.is_none() {
            // tx_public_key is not checked by daemons, so it can be
            // invalid; an empty derivation simply never matches.
            *kd = Some(
                generate_key_derivation(tx_public_key, &self.base.view_secret_key)
                    .unwrap_or_default(),
            );
        }
        let derivation = kd.as_ref()?;
        let candidate = underive_public_key(derivation, output_index, &output.public_key)?;
        Some((candidate, SecretKey::default()))
    }

    /// Claim an output whose spend-key candidate hit the record index.
    pub fn detect_our_output(
        &self,
        kd: &Option<KeyDerivation>,
        output_index: u64,
        spend_candidate: &PublicKey,
        output: &KeyOutput,
    ) -> Option<DetectedOutput> {
        let index = *self.base.records_map.get(spend_candidate)?;
        let record = self.base.wallet_records[index];
        let address = self.record_to_address(&record);
        let mut output_keypair = KeyPair::default();
        if !record.is_tracking() {
            let derivation = kd.as_ref()?; // tx_public_key was invalid
            output_keypair.public_key =
                derive_public_key(derivation, output_index, spend_candidate)?;
            output_keypair.secret_key =
                derive_secret_key(derivation, output_index, &record.spend_secret_key)?;
            if output_keypair.public_key != output.public_key {
                return None;
            }
        }
        Some(DetectedOutput {
            amount: output.amount,
            address,
            output_keypair,
        })
    }

    /// All records of the container.
    pub fn get_records(&self) -> &[WalletRecord] {
        &self.base.wallet_records
    }

    /// Container view public key.
    pub fn get_view_public_key(&self) -> &PublicKey {
        &self.base.view_public_key
    }

    /// Lower bound on every record's creation time, 0 when unknown.
    pub fn get_oldest_timestamp(&self) -> Timestamp {
        self.base.oldest_timestamp
    }

    /// Whether every record is tracking-only.
    pub fn is_view_only(&self) -> bool {
        self.base.wallet_records[0].is_tracking()
    }

    /// Whether outgoing address history can be decrypted.
    pub fn can_view_outgoing_addresses(&self) -> bool {
        self.tx_derivation_seed != Hash::default()
    }

    /// Opaque per-wallet seed consumed by the transaction builder.
    pub fn get_tx_derivation_seed(&self) -> &Hash {
        &self.tx_derivation_seed
    }

    pub(crate) fn base(&self) -> &WalletBase {
        &self.base
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.to_path_buf().into_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn atomic_save_file(path: &Path, data: &[u8], tmp_path: &Path) -> bool {
    let write = || -> std::io::Result<()> {
        let mut file = File::create(tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(tmp_path, path)
    };
    write().is_ok()
}

fn copy_folder(src: &Path, dst: &Path) -> Result<()> {
    let Ok(entries) = fs::read_dir(src) else {
        return Ok(()); // nothing queued yet
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        fs::copy(entry.path(), dst.join(name)).map_err(Error::write)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_envelope_round_trip() {
        let key = MasterKey::from_bytes([1u8; 32]);
        let pair = random_keypair();
        let encrypted = encrypt_record(&key, &pair.public_key, &pair.secret_key, 777);
        let record = decrypt_record(&key, &encrypted);
        assert_eq!(record.spend_public_key, pair.public_key);
        assert_eq!(record.spend_secret_key, pair.secret_key);
        assert_eq!(record.creation_timestamp, 777);
    }

    #[test]
    fn test_wallet_file_size_layout() {
        assert_eq!(wallet_file_size(0), 105);
        assert_eq!(wallet_file_size(1), 105 + 80);
        assert_eq!(COUNT_CAPACITY_OFFSET, 89);
    }

    #[test]
    fn test_legacy_file_is_upgraded_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.wallet");
        let key = MasterKey::from_password(FLAT_CONTAINER_KDF_SALT, "pw").unwrap();
        let view = random_keypair();
        let spend = random_keypair();
        let records = vec![WalletRecord {
            spend_public_key: spend.public_key,
            spend_secret_key: spend.secret_key,
            creation_timestamp: 42,
        }];
        let bytes =
            legacy::write_legacy_wallet(1, &view.public_key, &view.secret_key, &records, &key);
        fs::write(&path, &bytes).unwrap();

        let wallet = FlatWallet::open(&path, "pw", NetworkType::Mainnet).unwrap();
        assert_eq!(wallet.base().wallet_records, records);

        // The file on disk is now the current format.
        let upgraded = fs::read(&path).unwrap();
        assert_eq!(upgraded[0], SERIALIZATION_VERSION_V2);
        assert_eq!(upgraded.len() as u64, wallet_file_size(1));

        let reopened = FlatWallet::open(&path, "pw", NetworkType::Mainnet).unwrap();
        assert_eq!(reopened.base().wallet_records, records);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.wallet");
        fs::write(&path, [SERIALIZATION_VERSION_V2 + 1; 200]).unwrap();
        match FlatWallet::open(&path, "pw", NetworkType::Mainnet) {
            Err(Error::UnknownVersion(_)) => {}
            other => panic!("expected UnknownVersion, got {:?}", other.err()),
        }
    }
}
