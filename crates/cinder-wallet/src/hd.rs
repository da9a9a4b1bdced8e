//! Database-backed HD container (unlinkable addresses).
//!
//! All spend keypairs derive deterministically from a mnemonic through a
//! BIP-32 chain, so the database persists no per-record key material at
//! all: just an encrypted key/value table for parameters, a label table,
//! and the payment queue. Values are length-hiding encrypted blobs and
//! lookup columns hold keyed hashes, so an attacker with the file learns
//! only row counts and sizes. The engine keeps one write transaction
//! open at all times; `commit` closes and reopens it.

use crate::base::WalletBase;
use crate::bip32::{Bip32Key, HARDENED};
use crate::crypt::{derive_from_seed, MasterKey};
use crate::error::{Error, Result};
use crate::mnemonic;
use crate::types::{
    AccountAddress, DetectedOutput, KeyOutput, Timestamp, WalletRecord, ADDRESS_TYPE_AUDITABLE,
    ADDRESS_TYPE_UNLINKABLE,
};
use cinder_crypto::{
    fast_hash, generate_address_s_v, generate_hd_spendkeys, hash_to_scalar, key_isvalid,
    random_bytes, secret_key_to_public_key, unlinkable_derive_secret_key,
    unlinkable_underive_public_key, Hash, KeyDerivation, KeyPair, PublicKey, SecretKey,
};
use cinder_params::{NetworkType, BIP44_COIN_TYPE, COIN_NAME};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Version string stored in (and required of) every HD wallet file.
pub const WALLET_VERSION: &str = "CryptoNoteWallet1";

/// Size of the pre-derived record window past the used address count.
pub const GENERATE_AHEAD: usize = 20_000;

/// Below this gap the look-ahead is filled on the calling thread.
const PARALLEL_THRESHOLD: usize = 1000;

const ADDRESS_COUNT_KEY: &str = "total_address_count";
const CREATION_TIMESTAMP_KEY: &str = "creation_timestamp";

const SCHEMA: &str = "\
CREATE TABLE unencrypted(key BLOB PRIMARY KEY COLLATE BINARY NOT NULL, value BLOB NOT NULL) WITHOUT ROWID;
CREATE TABLE parameters(key_hash BLOB PRIMARY KEY COLLATE BINARY NOT NULL, key BLOB NOT NULL, value BLOB NOT NULL) WITHOUT ROWID;
CREATE TABLE labels(address_hash BLOB PRIMARY KEY NOT NULL, address BLOB NOT NULL, label BLOB NOT NULL) WITHOUT ROWID;
CREATE TABLE payment_queue(tid_hash BLOB COLLATE BINARY NOT NULL, net_hash BLOB COLLATE BINARY NOT NULL, tid BLOB NOT NULL, net BLOB NOT NULL, binary_transaction BLOB NOT NULL, PRIMARY KEY (tid_hash, net_hash)) WITHOUT ROWID;
";

/// HD container engine.
pub struct HdWallet {
    base: WalletBase,
    db: Connection,
    wallet_key: MasterKey,
    address_type: u8,
    spend_key_base: KeyPair,
    used_address_count: usize,
    labels: BTreeMap<String, String>,
    seed: Hash,
    tx_derivation_seed: Hash,
}

impl HdWallet {
    /// Container type probe: a file is an HD wallet iff SQLite can open
    /// and query it read-only.
    pub fn is_sqlite(path: &Path) -> bool {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let Ok(conn) = Connection::open_with_flags(path, flags) else {
            return false;
        };
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .is_ok()
    }

    /// Create a new HD wallet from a validated mnemonic. An empty
    /// mnemonic creates an empty shell, which only `export_wallet` uses
    /// as its destination.
    pub fn create(
        path: &Path,
        password: &str,
        mnemonic_phrase: &str,
        address_type: u8,
        creation_timestamp: Timestamp,
        mnemonic_password: &str,
        network: NetworkType,
    ) -> Result<Self> {
        let mut wallet = Self::create_uninitialized(path, password, network)?;
        if mnemonic_phrase.is_empty() {
            return Ok(wallet);
        }
        if address_type != ADDRESS_TYPE_UNLINKABLE && address_type != ADDRESS_TYPE_AUDITABLE {
            return Err(Error::Decrypt("Wallet address type unknown".into()));
        }
        let normalized = mnemonic::check_mnemonic(mnemonic_phrase)?;

        wallet.put("version", WALLET_VERSION.as_bytes(), true)?;
        wallet.put("coinname", COIN_NAME.as_bytes(), true)?;
        wallet.put("address-type", &[address_type], true)?;
        wallet.put("mnemonic", normalized.as_bytes(), true)?;
        // Written even when empty so the row count stays password-independent.
        wallet.put("mnemonic-password", mnemonic_password.as_bytes(), true)?;
        wallet.put(ADDRESS_COUNT_KEY, &0u64.to_le_bytes(), true)?;

        wallet.on_first_output_found(creation_timestamp)?;
        wallet.load()?;
        wallet.commit()?;
        Ok(wallet)
    }

    /// Open an existing HD wallet.
    pub fn open(path: &Path, password: &str, network: NetworkType) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let db = Connection::open_with_flags(path, flags)
            .map_err(|e| Error::Read(format!("Cannot open wallet file: {e}")))?;
        db.execute_batch("BEGIN")?;
        let salt = Self::get_salt(&db)?;
        let wallet_key = MasterKey::from_password(&salt, password)?;

        let mut wallet = Self {
            base: WalletBase::new(path.to_path_buf(), network),
            db,
            wallet_key,
            address_type: ADDRESS_TYPE_UNLINKABLE,
            spend_key_base: KeyPair::default(),
            used_address_count: 0,
            labels: BTreeMap::new(),
            seed: Hash::default(),
            tx_derivation_seed: Hash::default(),
        };
        match wallet.load() {
            Ok(()) => Ok(wallet),
            Err(err @ Error::MnemonicCrc(_)) => Err(err),
            Err(err) => Err(Error::Decrypt(format!(
                "Wallet file invalid or wrong password ({err})"
            ))),
        }
    }

    fn create_uninitialized(path: &Path, password: &str, network: NetworkType) -> Result<Self> {
        if fs::metadata(path).is_ok() {
            return Err(Error::Exists(path.display().to_string()));
        }
        let db = Connection::open(path)?;
        db.execute_batch(SCHEMA)?;
        db.execute_batch("BEGIN")?;
        let salt: [u8; 32] = random_bytes();
        Self::put_salt(&db, &salt)?;
        let wallet_key = MasterKey::from_password(&salt, password)?;
        Ok(Self {
            base: WalletBase::new(path.to_path_buf(), network),
            db,
            wallet_key,
            address_type: ADDRESS_TYPE_UNLINKABLE,
            spend_key_base: KeyPair::default(),
            used_address_count: 0,
            labels: BTreeMap::new(),
            seed: Hash::default(),
            tx_derivation_seed: Hash::default(),
        })
    }

    fn load(&mut self) -> Result<()> {
        let version = self.get_string("version")?.unwrap_or_default();
        if version != WALLET_VERSION {
            return Err(Error::Decrypt(format!("Wallet version unknown - {version}")));
        }
        let coinname = self.get_string("coinname")?.unwrap_or_default();
        if coinname != COIN_NAME {
            return Err(Error::Decrypt(format!(
                "Wallet is for different coin - {coinname}"
            )));
        }
        let address_type = self
            .get("address-type")?
            .ok_or_else(|| Error::Decrypt("Wallet corrupted, no address type".into()))?;
        if address_type.len() != 1 {
            return Err(Error::Decrypt("Wallet corrupted, no address type".into()));
        }
        self.address_type = address_type[0];
        if self.address_type != ADDRESS_TYPE_UNLINKABLE
            && self.address_type != ADDRESS_TYPE_AUDITABLE
        {
            return Err(Error::Decrypt("Wallet address type unknown".into()));
        }

        if let Some(mnemonic_phrase) = self.get_string("mnemonic")? {
            let mnemonic_password = self.get_string("mnemonic-password")?.ok_or_else(|| {
                Error::Decrypt("Wallet corrupted, no mnemonic password".into())
            })?;
            let normalized = mnemonic::check_mnemonic(&mnemonic_phrase)?;
            let master = Bip32Key::create_master_key(&normalized, &mnemonic_password)?;
            let node = master
                .derive_key(44 | HARDENED)?
                .derive_key(BIP44_COIN_TYPE | HARDENED)?
                .derive_key(self.address_type as u32 | HARDENED)?
                .derive_key(0)?
                .derive_key(0)?;
            self.seed = fast_hash(&node.private_key());
            self.tx_derivation_seed = derive_from_seed(&self.seed, "tx_derivation");

            let mut base_data = self.seed.to_vec();
            base_data.extend_from_slice(b"spend_key_base");
            self.spend_key_base.secret_key = hash_to_scalar(&base_data);
            self.spend_key_base.public_key =
                secret_key_to_public_key(&self.spend_key_base.secret_key).ok_or_else(|| {
                    Error::Decrypt("Wallet corrupted - spend key base is invalid".into())
                })?;
        } else {
            // View-only wallet: the base public key is stored directly.
            let base_public = self.get("spend_key_base_public_key")?.ok_or_else(|| {
                Error::Decrypt("Wallet corrupted - no spend key base".into())
            })?;
            let base_public: [u8; 32] = base_public.try_into().map_err(|_| {
                Error::Decrypt("Wallet corrupted - spend key base is invalid".into())
            })?;
            self.spend_key_base.public_key = PublicKey(base_public);
            if !key_isvalid(&self.spend_key_base.public_key) {
                return Err(Error::Decrypt(
                    "Wallet corrupted - spend key base is invalid".into(),
                ));
            }
            if let Some(seed) = self.get("tx_derivation_seed")? {
                if seed.len() == 32 {
                    self.tx_derivation_seed.copy_from_slice(&seed);
                }
            }
        }

        let mut view_data = self.spend_key_base.public_key.0.to_vec();
        view_data.extend_from_slice(b"view_key");
        self.base.view_secret_key = hash_to_scalar(&view_data);
        self.base.view_public_key = secret_key_to_public_key(&self.base.view_secret_key)
            .ok_or_else(|| Error::Decrypt("Wallet corrupted - view key is invalid".into()))?;

        self.used_address_count = match self.get(ADDRESS_COUNT_KEY)? {
            Some(bytes) => u64::from_le_bytes(
                bytes
                    .try_into()
                    .map_err(|_| Error::Decrypt("Wallet corrupted - bad address count".into()))?,
            ) as usize,
            None => 0,
        };
        let ts_key = format!(
            "{CREATION_TIMESTAMP_KEY}{}",
            self.base.network.file_suffix()
        );
        self.base.oldest_timestamp = match self.get(&ts_key)? {
            Some(bytes) => u64::from_le_bytes(
                bytes
                    .try_into()
                    .map_err(|_| Error::Decrypt("Wallet corrupted - bad timestamp".into()))?,
            ),
            None => 0,
        };

        self.generate_ahead()?;
        self.load_labels()
    }

    fn load_labels(&mut self) -> Result<()> {
        let mut stmt = self.db.prepare("SELECT address, label FROM labels")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (address_enc, label_enc) = row?;
            let address = self.wallet_key.decrypt_blob(&address_enc)?;
            let label = self.wallet_key.decrypt_blob(&label_enc)?;
            let address = String::from_utf8(address)
                .map_err(|_| Error::Decrypt("Wallet corrupted - label address".into()))?;
            let label = String::from_utf8(label)
                .map_err(|_| Error::Decrypt("Wallet corrupted - label text".into()))?;
            self.labels.insert(address, label);
        }
        Ok(())
    }

    fn derive_records(base: &KeyPair, start: u64, count: usize) -> Vec<WalletRecord> {
        let view_seed = base.public_key;
        generate_hd_spendkeys(base, &view_seed, start, count)
            .map(|pairs| {
                pairs
                    .into_iter()
                    .map(|pair| WalletRecord {
                        spend_public_key: pair.public_key,
                        spend_secret_key: pair.secret_key,
                        // Pre-derived records never trigger a rescan when
                        // they are later marked used.
                        creation_timestamp: Timestamp::MAX,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Refill the look-ahead window so `records ≥ used + GENERATE_AHEAD`.
    fn generate_ahead(&mut self) -> Result<()> {
        let target = self.used_address_count + GENERATE_AHEAD;
        if self.base.wallet_records.len() >= target {
            return Ok(());
        }
        let delta = target - self.base.wallet_records.len();
        let start = self.base.wallet_records.len() as u64;
        let records = if delta < PARALLEL_THRESHOLD {
            Self::derive_records(&self.spend_key_base, start, delta)
        } else {
            // Pure fan-out: each worker fills its own pre-assigned slice,
            // nothing is shared, results are appended in order.
            let threads = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            tracing::debug!(delta, threads, "Refilling address look-ahead window");
            let mut results: Vec<Vec<WalletRecord>> = vec![Vec::new(); threads];
            let spend_key_base = self.spend_key_base;
            std::thread::scope(|scope| {
                for (i, slot) in results.iter_mut().enumerate() {
                    let lo = delta * i / threads;
                    let hi = delta * (i + 1) / threads;
                    scope.spawn(move || {
                        *slot = Self::derive_records(&spend_key_base, start + lo as u64, hi - lo);
                    });
                }
            });
            results.concat()
        };
        if records.len() != delta {
            return Err(Error::Decrypt(
                "Wallet corrupted - spend key base is invalid".into(),
            ));
        }
        self.base.wallet_records.reserve(records.len());
        for record in records {
            self.base.push_record(record);
        }
        Ok(())
    }

    fn put_salt(db: &Connection, salt: &[u8]) -> Result<()> {
        db.execute(
            "REPLACE INTO unencrypted (key, value) VALUES ('salt', ?1)",
            params![salt],
        )?;
        Ok(())
    }

    fn get_salt(db: &Connection) -> Result<Vec<u8>> {
        db.query_row(
            "SELECT value FROM unencrypted WHERE key = 'salt'",
            [],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::Decrypt("Wallet corrupted - no salt".into()))
    }

    fn put(&self, key: &str, value: &[u8], nooverwrite: bool) -> Result<()> {
        let key_hash = self.wallet_key.derive_row_key("db_parameters", key.as_bytes());
        let enc_key = self.wallet_key.encrypt_blob(key.as_bytes());
        let enc_value = self.wallet_key.encrypt_blob(value);
        let sql = if nooverwrite {
            "INSERT INTO parameters (key_hash, key, value) VALUES (?1, ?2, ?3)"
        } else {
            "REPLACE INTO parameters (key_hash, key, value) VALUES (?1, ?2, ?3)"
        };
        self.db
            .execute(sql, params![&key_hash[..], enc_key, enc_value])?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key_hash = self.wallet_key.derive_row_key("db_parameters", key.as_bytes());
        let row: Option<Vec<u8>> = self
            .db
            .query_row(
                "SELECT value FROM parameters WHERE key_hash = ?1",
                params![&key_hash[..]],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(value) => Ok(Some(self.wallet_key.decrypt_blob(&value)?)),
            None => Ok(None),
        }
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|_| {
                Error::Decrypt(format!("Wallet corrupted - parameter '{key}'"))
            })?)),
            None => Ok(None),
        }
    }

    /// Every decrypted `(key, value)` parameter row.
    pub fn parameters_get(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut stmt = self.db.prepare("SELECT key, value FROM parameters")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (key_enc, value_enc) = row?;
            let key = String::from_utf8(self.wallet_key.decrypt_blob(&key_enc)?)
                .map_err(|_| Error::Decrypt("Wallet corrupted - parameter key".into()))?;
            result.push((key, self.wallet_key.decrypt_blob(&value_enc)?));
        }
        Ok(result)
    }

    /// End the long-running write transaction and begin a fresh one.
    pub fn commit(&mut self) -> Result<()> {
        self.db.execute_batch("COMMIT; BEGIN")?;
        Ok(())
    }

    /// Advance the used-address counter, refill the look-ahead window and
    /// return the newly used records. Imported secrets are rejected: HD
    /// containers are deterministic-only.
    pub fn generate_new_addresses(
        &mut self,
        secret_keys: &[SecretKey],
        _ct: Timestamp,
        _now: Timestamp,
    ) -> Result<(Vec<WalletRecord>, bool)> {
        for secret_key in secret_keys {
            if !secret_key.is_zero() {
                return Err(Error::NotSupported(
                    "Generating non-deterministic addresses not supported by HD wallet".into(),
                ));
            }
        }
        if secret_keys.is_empty() {
            return Ok((Vec::new(), false));
        }
        let was_used = self.used_address_count;
        self.used_address_count += secret_keys.len();
        self.generate_ahead()?;
        let result = self.base.wallet_records[was_used..self.used_address_count].to_vec();
        self.put(
            ADDRESS_COUNT_KEY,
            &(self.used_address_count as u64).to_le_bytes(),
            false,
        )?;
        self.commit()?;
        Ok((result, false))
    }

    /// Mark all records below `count` as used; called when the scanner
    /// sees an output to a look-ahead record.
    pub fn create_look_ahead_records(&mut self, count: usize) -> Result<()> {
        if count <= self.used_address_count {
            return Ok(());
        }
        self.used_address_count = count;
        self.generate_ahead()?;
        self.put(
            ADDRESS_COUNT_KEY,
            &(self.used_address_count as u64).to_le_bytes(),
            false,
        )?;
        self.commit()
    }

    /// Unlinkable address of a record.
    pub fn record_to_address(&self, record: &WalletRecord) -> Result<AccountAddress> {
        let sv = generate_address_s_v(&record.spend_public_key, &self.base.view_secret_key)
            .ok_or_else(|| Error::Decrypt("Wallet corrupted - record key is invalid".into()))?;
        Ok(AccountAddress::Unlinkable {
            s: record.spend_public_key,
            sv,
            is_auditable: self.is_auditable(),
        })
    }

    /// Look an unlinkable address up among the used records.
    pub fn get_record(&self, address: &AccountAddress) -> Option<WalletRecord> {
        let AccountAddress::Unlinkable { s, is_auditable, .. } = address else {
            return None;
        };
        if *is_auditable != self.is_auditable() {
            return None;
        }
        let index = *self.base.records_map.get(s)?;
        if index >= self.used_address_count {
            return None;
        }
        let record = self.base.wallet_records[index];
        match self.record_to_address(&record) {
            Ok(derived) if derived == *address => Some(record),
            _ => None,
        }
    }

    /// Re-encrypt everything under a fresh salt and a new password.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        let parameters = self.parameters_get()?;
        let queue = self.payment_queue_get2()?;

        self.db.execute("DELETE FROM payment_queue", [])?;
        self.db.execute("DELETE FROM parameters", [])?;
        self.db.execute("DELETE FROM labels", [])?;

        let salt: [u8; 32] = random_bytes();
        Self::put_salt(&self.db, &salt)?;
        self.wallet_key = MasterKey::from_password(&salt, password)?;

        for (key, value) in &parameters {
            self.put(key, value, true)?;
        }
        let labels = self.labels.clone();
        for (address, label) in &labels {
            self.set_label(address, label)?;
        }
        for (tid, net, transaction) in &queue {
            self.payment_queue_add_to_net(tid, net, transaction)?;
        }
        self.commit()
    }

    /// Build a copy of this wallet at `export_path` under a new password,
    /// optionally stripping all spending material.
    pub fn export_wallet(
        &self,
        export_path: &Path,
        new_password: &str,
        view_only: bool,
        view_outgoing_addresses: bool,
    ) -> Result<()> {
        let mut other = Self::create_uninitialized(export_path, new_password, self.base.network)?;
        if !self.is_view_only() && view_only {
            other.put(
                "spend_key_base_public_key",
                &self.spend_key_base.public_key.0,
                true,
            )?;
            if view_outgoing_addresses {
                other.put("tx_derivation_seed", &self.tx_derivation_seed, true)?;
            }
            for (key, value) in self.parameters_get()? {
                if key != "mnemonic" && key != "mnemonic-password" {
                    other.put(&key, &value, true)?;
                }
            }
            for (address, label) in &self.labels {
                other.set_label(address, label)?;
            }
        } else {
            for (key, value) in self.parameters_get()? {
                other.put(&key, &value, true)?;
            }
            for (address, label) in &self.labels {
                other.set_label(address, label)?;
            }
            for (tid, net, transaction) in self.payment_queue_get2()? {
                other.payment_queue_add_to_net(&tid, &net, &transaction)?;
            }
        }
        other.commit()
    }

    /// The stored mnemonic; view-only wallets have none to export.
    pub fn export_keys(&self) -> Result<String> {
        self.get_string("mnemonic")?.ok_or_else(|| {
            Error::ViewOnly("Exporting keys (mnemonic) not supported by view-only HD wallet".into())
        })
    }

    /// Record the per-network wallet birthday once the first owned output
    /// is seen.
    pub fn on_first_output_found(&mut self, ts: Timestamp) -> Result<()> {
        if self.base.oldest_timestamp != 0 || ts == 0 {
            return Ok(());
        }
        let ts_key = format!(
            "{CREATION_TIMESTAMP_KEY}{}",
            self.base.network.file_suffix()
        );
        self.put(&ts_key, &ts.to_le_bytes(), false)?;
        self.base.oldest_timestamp = ts;
        self.commit()
    }

    /// Attach a label to an address; an empty label deletes it.
    pub fn set_label(&mut self, address: &str, label: &str) -> Result<()> {
        let address_hash = self
            .wallet_key
            .derive_row_key("db_labels", address.as_bytes());
        if label.is_empty() {
            self.labels.remove(address);
            self.db.execute(
                "DELETE FROM labels WHERE address_hash = ?1",
                params![&address_hash[..]],
            )?;
        } else {
            self.labels.insert(address.to_owned(), label.to_owned());
            let enc_address = self.wallet_key.encrypt_blob(address.as_bytes());
            let enc_label = self.wallet_key.encrypt_blob(label.as_bytes());
            self.db.execute(
                "REPLACE INTO labels (address_hash, address, label) VALUES (?1, ?2, ?3)",
                params![&address_hash[..], enc_address, enc_label],
            )?;
        }
        self.commit()
    }

    /// Label of an address, empty when unset.
    pub fn get_label(&self, address: &str) -> String {
        self.labels.get(address).cloned().unwrap_or_default()
    }

    /// Queue a signed transaction for the current network.
    pub fn payment_queue_add(&mut self, tid: &Hash, binary_transaction: &[u8]) -> Result<()> {
        let net = self.base.network.name().to_owned();
        self.payment_queue_add_to_net(tid, &net, binary_transaction)
    }

    fn payment_queue_add_to_net(
        &self,
        tid: &Hash,
        net: &str,
        binary_transaction: &[u8],
    ) -> Result<()> {
        let tid_hash = self.wallet_key.derive_row_key("db_payment_queue_tid", tid);
        let net_hash = self
            .wallet_key
            .derive_row_key("db_payment_queue_net", net.as_bytes());
        let enc_tid = self.wallet_key.encrypt_blob(tid);
        let enc_net = self.wallet_key.encrypt_blob(net.as_bytes());
        let enc_value = self.wallet_key.encrypt_blob(binary_transaction);
        self.db.execute(
            "REPLACE INTO payment_queue (tid_hash, net_hash, tid, net, binary_transaction) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&tid_hash[..], &net_hash[..], enc_tid, enc_net, enc_value],
        )?;
        Ok(())
    }

    /// Queued transactions for the current network.
    pub fn payment_queue_get(&self) -> Result<Vec<Vec<u8>>> {
        let current_net = self.base.network.name();
        Ok(self
            .payment_queue_get2()?
            .into_iter()
            .filter(|(_, net, _)| net == current_net)
            .map(|(_, _, transaction)| transaction)
            .collect())
    }

    /// Queued transactions for all networks, decrypted.
    pub fn payment_queue_get2(&self) -> Result<Vec<(Hash, String, Vec<u8>)>> {
        let mut stmt = self
            .db
            .prepare("SELECT tid, net, binary_transaction FROM payment_queue")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (tid_enc, net_enc, tx_enc) = row?;
            let tid: Hash = self
                .wallet_key
                .decrypt_blob(&tid_enc)?
                .try_into()
                .map_err(|_| Error::Decrypt("Wallet corrupted - queued tid".into()))?;
            let net = String::from_utf8(self.wallet_key.decrypt_blob(&net_enc)?)
                .map_err(|_| Error::Decrypt("Wallet corrupted - queued net".into()))?;
            result.push((tid, net, self.wallet_key.decrypt_blob(&tx_enc)?));
        }
        Ok(result)
    }

    /// Drop a transaction from the current network's queue.
    pub fn payment_queue_remove(&mut self, tid: &Hash) -> Result<()> {
        let tid_hash = self.wallet_key.derive_row_key("db_payment_queue_tid", tid);
        let net_hash = self
            .wallet_key
            .derive_row_key("db_payment_queue_net", self.base.network.name().as_bytes());
        self.db.execute(
            "DELETE FROM payment_queue WHERE net_hash = ?1 AND tid_hash = ?2",
            params![&net_hash[..], &tid_hash[..]],
        )?;
        if tid[0] == b'x' {
            // Flush hint from the caller; other removals stay batched.
            self.commit()?;
        }
        Ok(())
    }

    /// Persist the used-address set of an outgoing transaction inside the
    /// database, keyed by transaction id.
    pub fn save_history(&mut self, tid: &Hash, used_addresses: &[AccountAddress]) -> Result<()> {
        let mut data = Vec::with_capacity(used_addresses.len() * 64);
        for address in used_addresses {
            if let AccountAddress::Unlinkable { s, sv, .. } = address {
                data.extend_from_slice(&s.0);
                data.extend_from_slice(&sv.0);
            }
        }
        self.put(&format!("history_{}", hex::encode(tid)), &data, false)?;
        self.commit()
    }

    /// Load a used-address set; missing or malformed history reads empty.
    pub fn load_history(&self, tid: &Hash) -> Vec<AccountAddress> {
        let Ok(Some(data)) = self.get(&format!("history_{}", hex::encode(tid))) else {
            return Vec::new();
        };
        if data.len() % 64 != 0 {
            return Vec::new();
        }
        data.chunks_exact(64)
            .map(|chunk| {
                let mut s = [0u8; 32];
                let mut sv = [0u8; 32];
                s.copy_from_slice(&chunk[..32]);
                sv.copy_from_slice(&chunk[32..]);
                AccountAddress::Unlinkable {
                    s: PublicKey(s),
                    sv: PublicKey(sv),
                    is_auditable: self.is_auditable(),
                }
            })
            .collect()
    }

    /// Backup is a full export under the same password rules.
    pub fn backup(&self, dst_name: &Path, password: &str) -> Result<()> {
        self.export_wallet(dst_name, password, false, false)
    }

    /// Per-output scanning step: underive the spend-key candidate and the
    /// blinding scalar from the view key alone.
    pub fn handle_output(
        &self,
        _tx_public_key: &PublicKey,
        _kd: &mut Option<KeyDerivation>,
        tx_inputs_hash: &Hash,
        output_index: u64,
        output: &KeyOutput,
    ) -> Option<(PublicKey, SecretKey)> {
        unlinkable_underive_public_key(
            &self.base.view_secret_key,
            tx_inputs_hash,
            output_index,
            &output.public_key,
            &output.encrypted_secret,
        )
    }

    /// Claim an output whose spend-key candidate hit the record index.
    /// A hit on a look-ahead record advances the used-address count.
    pub fn detect_our_output(
        &mut self,
        spend_candidate: &PublicKey,
        secret_scalar: &SecretKey,
        output: &KeyOutput,
    ) -> Result<Option<DetectedOutput>> {
        let Some(&index) = self.base.records_map.get(spend_candidate) else {
            return Ok(None);
        };
        let record = self.base.wallet_records[index];
        self.create_look_ahead_records(index + 1)?;

        let address = self.record_to_address(&record)?;
        if self.is_auditable() != output.is_auditable {
            return Ok(None);
        }
        let mut output_keypair = KeyPair::default();
        if !record.is_tracking() {
            let Some(secret_key) =
                unlinkable_derive_secret_key(&record.spend_secret_key, secret_scalar)
            else {
                return Ok(None);
            };
            let Some(public_key) = secret_key_to_public_key(&secret_key) else {
                return Ok(None);
            };
            if public_key != output.public_key {
                return Ok(None);
            }
            output_keypair = KeyPair {
                public_key,
                secret_key,
            };
        }
        Ok(Some(DetectedOutput {
            amount: output.amount,
            address,
            output_keypair,
        }))
    }

    /// All records, look-ahead included.
    pub fn get_records(&self) -> &[WalletRecord] {
        &self.base.wallet_records
    }

    /// Container view public key.
    pub fn get_view_public_key(&self) -> &PublicKey {
        &self.base.view_public_key
    }

    /// Per-network wallet birthday, 0 when unknown.
    pub fn get_oldest_timestamp(&self) -> Timestamp {
        self.base.oldest_timestamp
    }

    /// Whether this wallet lacks the mnemonic and spend secrets.
    pub fn is_view_only(&self) -> bool {
        self.spend_key_base.secret_key.is_zero()
    }

    /// Whether this wallet's addresses carry the auditable flag.
    pub fn is_auditable(&self) -> bool {
        self.address_type == ADDRESS_TYPE_AUDITABLE
    }

    /// Whether outgoing address history can be decrypted.
    pub fn can_view_outgoing_addresses(&self) -> bool {
        self.tx_derivation_seed != Hash::default()
    }

    /// Opaque per-wallet seed consumed by the transaction builder.
    pub fn get_tx_derivation_seed(&self) -> &Hash {
        &self.tx_derivation_seed
    }

    /// Number of addresses handed out so far.
    pub fn get_used_address_count(&self) -> usize {
        self.used_address_count
    }

    pub(crate) fn base(&self) -> &WalletBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_crypto::random_keypair;
    use tempfile::TempDir;

    #[test]
    fn test_is_sqlite_rejects_flat_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-db");
        fs::write(&path, [6u8; 300]).unwrap();
        assert!(!HdWallet::is_sqlite(&path));
        assert!(!HdWallet::is_sqlite(&dir.path().join("missing")));
    }

    #[test]
    fn test_derive_records_are_deterministic() {
        let base = random_keypair();
        let a = HdWallet::derive_records(&base, 0, 64);
        let b = HdWallet::derive_records(&base, 0, 64);
        assert_eq!(a, b);
        assert!(a.iter().all(|r| r.creation_timestamp == Timestamp::MAX));

        // Split derivation matches bulk derivation.
        let head = HdWallet::derive_records(&base, 0, 32);
        let tail = HdWallet::derive_records(&base, 32, 32);
        assert_eq!(&a[..32], &head[..]);
        assert_eq!(&a[32..], &tail[..]);
    }
}
