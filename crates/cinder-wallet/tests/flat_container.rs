//! End-to-end coverage of the flat container engine.

use cinder_crypto::{hash_to_scalar, secret_key_to_public_key, KeyPair, SecretKey};
use cinder_params::NetworkType;
use cinder_wallet::flat::FlatWallet;
use cinder_wallet::{open_wallet, AccountAddress, Error, Wallet};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const NET: NetworkType = NetworkType::Mainnet;

fn keypair_from(seed: &[u8]) -> KeyPair {
    let secret_key = hash_to_scalar(seed);
    KeyPair {
        public_key: secret_key_to_public_key(&secret_key).unwrap(),
        secret_key,
    }
}

fn import_string(spend: &KeyPair, view: &KeyPair) -> String {
    format!(
        "{}{}{}{}",
        hex::encode(spend.public_key.0),
        hex::encode(view.public_key.0),
        hex::encode(spend.secret_key.0),
        hex::encode(view.secret_key.0)
    )
}

fn open_flat(path: &Path, password: &str) -> Wallet {
    let wallet = open_wallet(path, password, NET).unwrap();
    assert!(matches!(wallet, Wallet::Flat(_)));
    wallet
}

#[test]
fn test_import_known_keys_and_first_address() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imported.wallet");
    let spend = keypair_from(b"flat import vector spend");
    let view = keypair_from(b"flat import vector view");
    let import = import_string(&spend, &view);

    let wallet = FlatWallet::create(&path, "pw", &import, 0, NET).unwrap();
    assert_eq!(wallet.export_keys(), import);

    let wallet = open_flat(&path, "pw");
    // Unknown key age: scan from genesis.
    assert_eq!(wallet.get_oldest_timestamp(), 0);
    assert_eq!(wallet.export_keys().unwrap(), import);
    match wallet.get_first_address().unwrap() {
        AccountAddress::Simple {
            spend_public_key,
            view_public_key,
        } => {
            assert_eq!(spend_public_key, spend.public_key);
            assert_eq!(view_public_key, view.public_key);
        }
        other => panic!("flat wallet produced a foreign address shape: {other:?}"),
    }
}

#[test]
fn test_import_rejects_malformed_key_strings() {
    let dir = TempDir::new().unwrap();
    let spend = keypair_from(b"bad import spend");
    let view = keypair_from(b"bad import view");

    let short = "ab".repeat(100);
    assert!(matches!(
        FlatWallet::create(&dir.path().join("a"), "pw", &short, 0, NET),
        Err(Error::Decrypt(_))
    ));

    let mut swapped = import_string(&spend, &view);
    // Replace the view secret with the spend secret: valid hex, wrong key.
    swapped.replace_range(192..256, &hex::encode(spend.secret_key.0));
    assert!(matches!(
        FlatWallet::create(&dir.path().join("b"), "pw", &swapped, 0, NET),
        Err(Error::Decrypt(_))
    ));
}

#[test]
fn test_many_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("many.wallet");
    let mut wallet = FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    let (added, rescan) = wallet
        .generate_new_addresses(&vec![SecretKey::default(); 4999], 0, 1_700_000_000)
        .unwrap();
    assert_eq!(added.len(), 4999);
    assert!(!rescan);

    let reopened = open_flat(&path, "pw");
    let records = reopened.get_records();
    assert_eq!(records.len(), 5000);
    for record in records {
        let address = reopened.record_to_address(record).unwrap();
        assert_eq!(reopened.get_record(&address), Some(*record));
    }
}

#[test]
fn test_wrong_password_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locked.wallet");
    FlatWallet::create(&path, "right", "", 0, NET).unwrap();
    assert!(matches!(
        FlatWallet::open(&path, "wrong", NET),
        Err(Error::Decrypt(_))
    ));
}

#[test]
fn test_torn_append_loads_as_prefix() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("torn.wallet");
    let mut wallet = FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    wallet
        .generate_new_addresses(&vec![SecretKey::default(); 9], 0, 1_700_000_000)
        .unwrap();
    let intended: Vec<_> = open_flat(&path, "pw").get_records().to_vec();
    assert_eq!(intended.len(), 10);
    let full = fs::read(&path).unwrap();

    // Chop the file mid-record at several points past the count header;
    // every cut must load as a clean prefix of the intended records.
    for (cut, expect) in [(105 + 80 * 10 - 1, 9), (105 + 80 * 4 + 37, 4), (105 + 80, 1)] {
        let torn_path = dir.path().join(format!("torn-{cut}.wallet"));
        fs::write(&torn_path, &full[..cut]).unwrap();
        let torn = open_flat(&torn_path, "pw");
        assert_eq!(torn.get_records(), &intended[..expect], "cut at {cut}");
    }
}

#[test]
fn test_reimport_lowers_timestamp_and_requests_rescan() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monotone.wallet");
    let mut wallet = FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    let original = wallet.get_records()[0];

    let (result, rescan) = wallet
        .generate_new_addresses(&[original.spend_secret_key], 7, 1_700_000_000)
        .unwrap();
    assert!(rescan);
    assert_eq!(result[0].creation_timestamp, 7);

    // A later timestamp leaves the record alone.
    let (result, rescan) = wallet
        .generate_new_addresses(&[original.spend_secret_key], 1_000_000, 1_700_000_000)
        .unwrap();
    assert!(!rescan);
    assert_eq!(result[0].creation_timestamp, 7);

    let reopened = open_flat(&path, "pw");
    assert_eq!(reopened.get_oldest_timestamp(), 7);
    assert_eq!(reopened.get_records()[0].creation_timestamp, 7);
}

#[test]
fn test_password_change_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repass.wallet");
    let mut wallet = FlatWallet::create(&path, "old", "", 0, NET).unwrap();
    let records = wallet.get_records().to_vec();
    wallet.set_password("new").unwrap();
    wallet.set_password("new").unwrap();
    drop(wallet);

    assert!(FlatWallet::open(&path, "old", NET).is_err());
    let reopened = open_flat(&path, "new");
    assert_eq!(reopened.get_records(), &records[..]);
}

#[test]
fn test_view_only_export() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("full.wallet");
    let export_path = dir.path().join("tracking.wallet");
    let wallet = FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    wallet
        .export_wallet(&export_path, "watcher", true, false)
        .unwrap();

    let tracking = open_flat(&export_path, "watcher");
    assert!(tracking.is_view_only());
    assert_eq!(
        tracking.get_view_public_key(),
        open_flat(&path, "pw").get_view_public_key()
    );
    assert!(tracking.get_records().iter().all(|r| r.is_tracking()));
    assert!(tracking.export_keys().is_err());
    // And a view-only wallet cannot mint addresses.
    let mut tracking = tracking;
    assert!(matches!(
        tracking.generate_new_addresses(&[SecretKey::default()], 0, 0),
        Err(Error::ViewOnly(_))
    ));
}

#[test]
fn test_labels_rejected_by_flat_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nolabel.wallet");
    FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    let mut wallet = open_flat(&path, "pw");
    assert!(matches!(
        wallet.set_label("addr", "label"),
        Err(Error::NotSupported(_))
    ));
}

#[test]
fn test_payment_queue_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.wallet");
    FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    let mut wallet = open_flat(&path, "pw");

    let tid_a = cinder_crypto::fast_hash(b"tx a");
    let tid_b = cinder_crypto::fast_hash(b"tx b");
    wallet.payment_queue_add(&tid_a, b"binary tx a").unwrap();
    wallet.payment_queue_add(&tid_b, b"binary tx b").unwrap();

    let mut queued = wallet.payment_queue_get().unwrap();
    queued.sort();
    assert_eq!(queued, vec![b"binary tx a".to_vec(), b"binary tx b".to_vec()]);

    wallet.payment_queue_remove(&tid_a).unwrap();
    assert_eq!(wallet.payment_queue_get().unwrap(), vec![b"binary tx b".to_vec()]);
}

#[test]
fn test_backup_keeps_adjacent_folders_reachable_off_mainnet() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("src.wallet");
    let backup_path = dir.path().join("backup.wallet");
    let net = NetworkType::Testnet;
    let wallet = FlatWallet::create(&path, "pw", "", 0, net).unwrap();

    let tid = cinder_crypto::fast_hash(b"queued tx");
    wallet.payment_queue_add(&tid, b"queued body");
    let hist_tid = cinder_crypto::fast_hash(b"sent tx");
    let used = vec![wallet.record_to_address(&wallet.get_records()[0])];
    assert!(wallet.save_history(&hist_tid, &used));

    wallet.backup(&backup_path, "backup-pw").unwrap();

    // A reopen of the backup on the same network must find the copied
    // queue and history folders.
    let restored = FlatWallet::open(&backup_path, "backup-pw", net).unwrap();
    assert_eq!(restored.payment_queue_get(), vec![b"queued body".to_vec()]);
    assert_eq!(restored.load_history(&hist_tid), used);
}

#[test]
fn test_history_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.wallet");
    FlatWallet::create(&path, "pw", "", 0, NET).unwrap();
    let mut wallet = open_flat(&path, "pw");

    let tid = cinder_crypto::fast_hash(b"outgoing tx");
    let used = vec![AccountAddress::Simple {
        spend_public_key: keypair_from(b"peer spend").public_key,
        view_public_key: keypair_from(b"peer view").public_key,
    }];
    assert!(wallet.save_history(&tid, &used).unwrap());
    assert_eq!(wallet.load_history(&tid), used);
    assert!(wallet
        .load_history(&cinder_crypto::fast_hash(b"unknown tx"))
        .is_empty());
}
