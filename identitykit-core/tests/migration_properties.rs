mod common;

use std::{collections::HashMap, sync::Arc};

use common::{encrypted_store, entry_key, tamper, Device};
use identitykit_core::{
    migration::{reencrypt, IdentityTransform},
    platform::{MemoryNameValueStore, NameValueStore},
    EncryptionType, ReencryptionParams, Reencrypter, StorageSettings,
};

/// Ten entries encrypted by `device`'s app helper, with entries 3 and 7
/// corrupted so they fail to decrypt.
fn store_with_two_corrupt_entries(device: &Device) -> Arc<MemoryNameValueStore> {
    let store = encrypted_store(&device.app_helper(), 10);
    for index in [3, 7] {
        let value = store.get(entry_key(index)).expect("get").expect("entry");
        store.put(entry_key(index), tamper(&value, 20)).expect("put");
    }
    store
}

#[test]
fn test_identity_migration_is_a_no_op() {
    let store = MemoryNameValueStore::with_entries([
        ("a", "plain"),
        ("b", "cE1bm90LWEtcmVhbC1ibG9i"),
        ("c", "{\"json\":true}"),
    ]);
    let before = store.get_all().expect("get_all");

    let result = reencrypt(
        &store,
        &IdentityTransform,
        &IdentityTransform,
        ReencryptionParams::default(),
    )
    .expect("migration");

    assert_eq!(result.total_records, 3);
    assert_eq!(result.failed_records, 0);
    assert!(result.failures_by_type.is_empty());
    assert_eq!(store.get_all().expect("get_all"), before);
}

#[test]
fn test_partial_failure_erases_only_failed_entries() {
    let device = Device::new();
    let store = store_with_two_corrupt_entries(&device);
    let helper = device.app_helper();

    let result = reencrypt(
        store.as_ref(),
        &helper,
        &helper,
        ReencryptionParams {
            erase_entry_on_error: true,
            ..ReencryptionParams::default()
        },
    )
    .expect("migration");

    assert_eq!(result.total_records, 10);
    assert_eq!(result.failed_records, 2);
    assert_eq!(result.failures_by_type.values().sum::<u64>(), 2);

    let remaining = store.get_all().expect("get_all");
    assert_eq!(remaining.len(), 8);
    assert!(!remaining.contains_key(&entry_key(3)));
    assert!(!remaining.contains_key(&entry_key(7)));
    for (key, value) in remaining {
        let index: usize = key["entry-".len()..].parse().expect("index");
        assert_eq!(helper.decrypt(&value).expect("decrypt"), format!("token-{index}"));
    }
}

#[test]
fn test_erase_all_empties_store_at_first_failure() {
    let device = Device::new();
    let store = store_with_two_corrupt_entries(&device);
    let helper = device.app_helper();

    let result = reencrypt(
        store.as_ref(),
        &helper,
        &helper,
        ReencryptionParams {
            erase_all_on_error: true,
            ..ReencryptionParams::default()
        },
    )
    .expect("migration");

    assert!(store.get_all().expect("get_all").is_empty());
    assert_eq!(result.total_records, 10);
    assert_eq!(result.failed_records, 1);
}

#[test]
fn test_migration_to_user_defined_key() {
    let device = Device::new();
    let from = device.app_helper();
    let store = encrypted_store(&from, 4);
    let to = device.helper(StorageSettings::new(common::APP_PACKAGE).with_user_defined_key(vec![8; 32]));

    let result = Reencrypter::new()
        .reencrypt(store.as_ref(), &to, &from, ReencryptionParams::default())
        .expect("migration");
    assert_eq!(result.failed_records, 0);

    for (_, value) in store.get_all().expect("get_all") {
        assert_eq!(to.encryption_type(&value).expect("classify"), EncryptionType::UserDefined);
    }
}

#[tokio::test]
async fn test_background_migration_reports_failures() {
    let device = Device::new();
    let store = store_with_two_corrupt_entries(&device);
    let helper = Arc::new(device.app_helper());

    let result = Reencrypter::new()
        .reencrypt_async(
            store.clone(),
            helper.clone(),
            helper,
            ReencryptionParams::default(),
        )
        .await
        .expect("migration");

    assert_eq!(result.failed_records, 2);
    let mut by_kind: HashMap<String, u64> = HashMap::new();
    for (signature, count) in result.failures_by_type {
        let kind = signature.split("::").next().unwrap_or_default().to_string();
        *by_kind.entry(kind).or_insert(0) += count;
    }
    assert_eq!(by_kind.get("Integrity"), Some(&2));
    // Failed entries keep their original values.
    assert_eq!(store.get_all().expect("get_all").len(), 10);
}
