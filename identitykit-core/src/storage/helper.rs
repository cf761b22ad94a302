//! The versioned encryption engine.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use subtle::ConstantTimeEq;

use super::{
    blob::EncryptedBlob,
    cipher::{self, SecretKey},
    key_version::{EncryptionType, KeyType, KeyVersion},
    keys::{SoftwareKeyLoader, StaticKeys, WrappedKeyLoader},
    record::KeyRecord,
};
use crate::{
    config::StorageSettings,
    defaults::{AUTHENTICATOR_PACKAGE, COMPANY_PORTAL_PACKAGE},
    error::{StorageError, StorageResult},
    platform::{AtomicBlobStore, PlatformKeystore},
};

/// Encrypts and decrypts cache values with the best key available to this
/// process, while staying able to decrypt values written under any key that
/// is still retrievable.
///
/// Encryption key order:
///
/// 1. the user-defined key from settings;
/// 2. the legacy broker key registered for this app's package, unless
///    `encrypt_with_keystore_key` is set;
/// 3. the keystore-wrapped key, when the keystore is usable;
/// 4. the software-derived key.
///
/// `StorageHelper` is `Send + Sync`; key caches are internally synchronized.
#[cfg_attr(feature = "ffi", derive(uniffi::Object))]
pub struct StorageHelper {
    package_name: String,
    encrypt_with_keystore_key: bool,
    keystore_usable: bool,
    static_keys: StaticKeys,
    wrapped: WrappedKeyLoader,
    software: SoftwareKeyLoader,
    blob_store: Arc<dyn AtomicBlobStore>,
    record_file: String,
}

impl StorageHelper {
    /// Builds a helper and checks whether the platform key changed since the
    /// last time a helper was built on this device.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid.
    pub fn new(
        settings: StorageSettings,
        keystore: Arc<dyn PlatformKeystore>,
        blob_store: Arc<dyn AtomicBlobStore>,
    ) -> StorageResult<Self> {
        settings.validate()?;
        let static_keys = StaticKeys::from_settings(&settings)?;
        let keystore_usable =
            keystore.is_available() && settings.api_level >= settings.min_keystore_api_level;
        if !keystore_usable {
            tracing::info!(
                api_level = settings.api_level,
                min_api_level = settings.min_keystore_api_level,
                "keystore not usable, software-derived key will be used"
            );
        }

        let helper = Self {
            package_name: settings.package_name.clone(),
            encrypt_with_keystore_key: settings.encrypt_with_keystore_key,
            keystore_usable,
            static_keys,
            wrapped: WrappedKeyLoader::new(
                keystore,
                Arc::clone(&blob_store),
                settings.keystore_alias.clone(),
                settings.key_file_name.clone(),
            ),
            software: SoftwareKeyLoader::new(
                Arc::clone(&blob_store),
                &settings.key_file_name,
                settings.package_name,
            ),
            blob_store,
            record_file: format!("{}.meta", settings.key_file_name),
        };
        helper.check_key_rotation();
        Ok(helper)
    }

    /// Encrypts `plaintext` with the current preferred key.
    ///
    /// Generates and persists the platform key on first use.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidInput`] if `plaintext` is empty.
    /// - Keystore or blob store errors if the key cannot be loaded or created.
    pub fn encrypt(&self, plaintext: &str) -> StorageResult<String> {
        if plaintext.is_empty() {
            return Err(StorageError::InvalidInput(
                "plaintext must not be empty".to_string(),
            ));
        }
        let (key_type, key) = self.encryption_key()?;
        let blob = cipher::seal(&key, key_type.key_version(), plaintext.as_bytes())?;
        tracing::trace!(key_type = %key_type, "encrypted value");
        Ok(blob.encode())
    }

    /// Decrypts a value produced by [`StorageHelper::encrypt`] under any key
    /// still available to this process.
    ///
    /// Values without the encrypted-value prefix are returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidInput`] if `value` is empty.
    /// - [`StorageError::Malformed`] if the value is prefixed but not decodable.
    /// - [`StorageError::Integrity`] if the marker is unknown or the value
    ///   fails authentication under every available candidate key.
    /// - [`StorageError::KeyUnavailable`] if no candidate key for the marker
    ///   exists on this device.
    pub fn decrypt(&self, value: &str) -> StorageResult<String> {
        if value.is_empty() {
            return Err(StorageError::InvalidInput("value must not be empty".to_string()));
        }
        if !EncryptedBlob::is_encrypted(value) {
            tracing::warn!("value is not encrypted, returning it unchanged");
            return Ok(value.to_string());
        }

        let blob = EncryptedBlob::decode(value)?;
        let mut attempted = 0usize;
        for key_type in self.decryption_candidates(blob.key_version) {
            let key = match self.load_key(&key_type) {
                Ok(Some(key)) => key,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key_type = %key_type, error = %err, "candidate key could not be loaded");
                    continue;
                }
            };
            attempted += 1;
            match cipher::open(&key, &blob) {
                Ok(plaintext) => {
                    return String::from_utf8(plaintext.to_vec()).map_err(|_| {
                        StorageError::Integrity("decrypted value is not UTF-8".to_string())
                    });
                }
                Err(err) => {
                    tracing::debug!(key_type = %key_type, error = %err, "candidate key rejected");
                }
            }
        }

        if attempted == 0 {
            Err(StorageError::KeyUnavailable(format!(
                "no key material for key version {}",
                blob.key_version
            )))
        } else {
            Err(StorageError::Integrity(format!(
                "value failed authentication under {attempted} candidate key(s)"
            )))
        }
    }

    /// Classifies `value` without decrypting it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Malformed`] or [`StorageError::Integrity`] for
    /// prefixed values that cannot be parsed.
    pub fn encryption_type(&self, value: &str) -> StorageResult<EncryptionType> {
        if !EncryptedBlob::is_encrypted(value) {
            return Ok(EncryptionType::Unencrypted);
        }
        Ok(EncryptedBlob::decode(value)?.key_version.into())
    }

    /// The key [`StorageHelper::encrypt`] would use, without loading it.
    #[must_use]
    pub fn key_type_for_encryption(&self) -> KeyType {
        if self.static_keys.user_defined.is_some() {
            return KeyType::UserDefinedKey;
        }
        if !self.encrypt_with_keystore_key
            && self.static_keys.broker.contains_key(&self.package_name)
        {
            return KeyType::LegacyBrokerKey {
                package_name: self.package_name.clone(),
            };
        }
        if self.keystore_usable {
            KeyType::KeystoreWrappedKey
        } else {
            KeyType::SoftwareDerivedKey
        }
    }

    /// Deletes the platform-managed key material. The next `encrypt` call
    /// generates a fresh key; values written under the old key become
    /// [`StorageError::KeyUnavailable`].
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore or blob store refuses the deletion.
    pub fn reset_key_pair(&self) -> StorageResult<()> {
        tracing::warn!(keystore = self.keystore_usable, "resetting platform storage key");
        if self.keystore_usable {
            self.wrapped.reset()?;
        } else {
            self.software.reset()?;
        }
        self.blob_store.delete(self.record_file.clone())
    }

    /// Thumbprint of the platform key, if one exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the key exists but cannot be loaded.
    pub fn current_thumbprint(&self) -> StorageResult<Option<String>> {
        Ok(self.load_platform_key()?.map(|(_, key)| key.thumbprint()))
    }

    fn encryption_key(&self) -> StorageResult<(KeyType, SecretKey)> {
        let key_type = self.key_type_for_encryption();
        let key = match &key_type {
            KeyType::UserDefinedKey | KeyType::LegacyBrokerKey { .. } => self
                .load_key(&key_type)?
                .ok_or_else(|| StorageError::KeyUnavailable(key_type.to_string()))?,
            KeyType::KeystoreWrappedKey => {
                let (key, created) = self.wrapped.load_or_generate()?;
                if created {
                    self.remember_key(KeyVersion::KeystoreWrapped, &key);
                }
                key
            }
            KeyType::SoftwareDerivedKey => {
                let (key, created) = self.software.load_or_generate()?;
                if created {
                    self.remember_key(KeyVersion::SoftwareDerived, &key);
                }
                key
            }
        };
        Ok((key_type, key))
    }

    /// Keys to try, in order, for a blob carrying `version`.
    fn decryption_candidates(&self, version: KeyVersion) -> Vec<KeyType> {
        match version {
            KeyVersion::UserDefined if self.static_keys.user_defined.is_some() => {
                vec![KeyType::UserDefinedKey]
            }
            KeyVersion::UserDefined => self
                .legacy_package_order()
                .into_iter()
                .map(|package_name| KeyType::LegacyBrokerKey { package_name })
                .collect(),
            KeyVersion::KeystoreWrapped => vec![KeyType::KeystoreWrappedKey],
            KeyVersion::SoftwareDerived => vec![KeyType::SoftwareDerivedKey],
        }
    }

    /// Own package first, then Authenticator, then Company Portal, then any
    /// other registered package in name order.
    fn legacy_package_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let preferred = [
            self.package_name.as_str(),
            AUTHENTICATOR_PACKAGE,
            COMPANY_PORTAL_PACKAGE,
        ];
        for package in preferred
            .into_iter()
            .chain(self.static_keys.broker.keys().map(String::as_str))
        {
            if self.static_keys.broker.contains_key(package) && !order.iter().any(|p| p == package) {
                order.push(package.to_string());
            }
        }
        order
    }

    fn load_key(&self, key_type: &KeyType) -> StorageResult<Option<SecretKey>> {
        match key_type {
            KeyType::UserDefinedKey => Ok(self.static_keys.user_defined.clone()),
            KeyType::LegacyBrokerKey { package_name } => {
                Ok(self.static_keys.broker.get(package_name).cloned())
            }
            KeyType::KeystoreWrappedKey => self.wrapped.load(),
            KeyType::SoftwareDerivedKey => self.software.load(),
        }
    }

    fn load_platform_key(&self) -> StorageResult<Option<(KeyVersion, SecretKey)>> {
        if self.keystore_usable {
            Ok(self
                .wrapped
                .load()?
                .map(|key| (KeyVersion::KeystoreWrapped, key)))
        } else {
            Ok(self
                .software
                .load()?
                .map(|key| (KeyVersion::SoftwareDerived, key)))
        }
    }

    /// Compares the platform key against the persisted key record and logs
    /// when it changed underneath us (e.g. an OS upgrade invalidated the
    /// keystore and a new key was generated by another process).
    fn check_key_rotation(&self) {
        let (version, key) = match self.load_platform_key() {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "could not load platform key for rotation check");
                return;
            }
        };
        let current = key.thumbprint();

        let previous = match self.blob_store.read(self.record_file.clone()) {
            Ok(Some(bytes)) => KeyRecord::deserialize(&bytes)
                .map_err(|err| tracing::warn!(error = %err, "discarding unreadable key record"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "could not read key record");
                return;
            }
        };

        match previous {
            Some(record)
                if bool::from(record.thumbprint.as_bytes().ct_eq(current.as_bytes())) =>
            {
                tracing::debug!(thumbprint = %current, "platform key unchanged");
            }
            Some(record) => {
                tracing::warn!(
                    previous = %record.thumbprint,
                    current = %current,
                    "platform storage key changed since last run; values written under the previous key are unreadable"
                );
                self.remember_key(version, &key);
            }
            None => self.remember_key(version, &key),
        }
    }

    fn remember_key(&self, version: KeyVersion, key: &SecretKey) {
        let record = KeyRecord::new(version.to_string(), key.thumbprint(), unix_now());
        let written = record
            .serialize()
            .and_then(|bytes| self.blob_store.write_atomic(self.record_file.clone(), bytes));
        if let Err(err) = written {
            tracing::warn!(error = %err, "failed to persist key record");
        }
    }
}

impl std::fmt::Debug for StorageHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHelper")
            .field("package_name", &self.package_name)
            .field("keystore_usable", &self.keystore_usable)
            .field("key_type_for_encryption", &self.key_type_for_encryption())
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;
    use crate::platform::{MemoryBlobStore, MemoryKeystore};

    struct Fixture {
        keystore: Arc<MemoryKeystore>,
        blob_store: Arc<MemoryBlobStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                keystore: Arc::new(MemoryKeystore::new()),
                blob_store: Arc::new(MemoryBlobStore::new()),
            }
        }

        fn helper(&self, settings: StorageSettings) -> StorageHelper {
            StorageHelper::new(settings, self.keystore.clone(), self.blob_store.clone())
                .expect("helper")
        }
    }

    #[test]
    fn test_round_trip_with_keystore_key() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        assert_eq!(helper.key_type_for_encryption(), KeyType::KeystoreWrappedKey);

        let blob = helper.encrypt("access-token").expect("encrypt");
        assert_eq!(
            helper.encryption_type(&blob).expect("classify"),
            EncryptionType::KeystoreWrapped
        );
        assert_eq!(helper.decrypt(&blob).expect("decrypt"), "access-token");
    }

    #[test]
    fn test_empty_plaintext_rejected() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        match helper.encrypt("") {
            Err(StorageError::InvalidInput(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_unencrypted_value_passes_through() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        assert_eq!(helper.decrypt("legacy-plain").expect("decrypt"), "legacy-plain");
        assert_eq!(
            helper.encryption_type("legacy-plain").expect("classify"),
            EncryptionType::Unencrypted
        );
    }

    #[test]
    fn test_user_defined_key_wins() {
        let fixture = Fixture::new();
        let helper = fixture.helper(
            StorageSettings::new(AUTHENTICATOR_PACKAGE)
                .with_user_defined_key(vec![3; 32])
                .with_broker_secret_key(AUTHENTICATOR_PACKAGE, vec![4; 32]),
        );
        assert_eq!(helper.key_type_for_encryption(), KeyType::UserDefinedKey);
        let blob = helper.encrypt("x").expect("encrypt");
        assert_eq!(
            helper.encryption_type(&blob).expect("classify"),
            EncryptionType::UserDefined
        );
        // Nothing was generated in the keystore.
        assert!(!fixture.keystore.contains_alias("AdalKey".to_string()).expect("query"));
    }

    #[test]
    fn test_broker_uses_own_legacy_key_unless_told_otherwise() {
        let fixture = Fixture::new();
        let settings = StorageSettings::new(COMPANY_PORTAL_PACKAGE)
            .with_broker_secret_key(COMPANY_PORTAL_PACKAGE, vec![5; 32]);
        let helper = fixture.helper(settings.clone());
        assert_eq!(
            helper.key_type_for_encryption(),
            KeyType::LegacyBrokerKey {
                package_name: COMPANY_PORTAL_PACKAGE.to_string()
            }
        );

        let mut keystore_settings = settings;
        keystore_settings.encrypt_with_keystore_key = true;
        let helper = fixture.helper(keystore_settings);
        assert_eq!(helper.key_type_for_encryption(), KeyType::KeystoreWrappedKey);
    }

    #[test]
    fn test_legacy_blob_from_companion_app_decrypts() {
        let fixture = Fixture::new();
        let shared = StorageSettings::new(AUTHENTICATOR_PACKAGE)
            .with_broker_secret_key(AUTHENTICATOR_PACKAGE, vec![6; 32])
            .with_broker_secret_key(COMPANY_PORTAL_PACKAGE, vec![7; 16]);
        let authenticator = fixture.helper(shared.clone());
        let blob = authenticator.encrypt("shared-rt").expect("encrypt");

        let mut portal_settings = shared;
        portal_settings.package_name = COMPANY_PORTAL_PACKAGE.to_string();
        let portal = fixture.helper(portal_settings);
        assert_eq!(portal.decrypt(&blob).expect("decrypt"), "shared-rt");
    }

    #[test]
    fn test_legacy_order_prefers_own_package() {
        let fixture = Fixture::new();
        let helper = fixture.helper(
            StorageSettings::new(COMPANY_PORTAL_PACKAGE)
                .with_broker_secret_key(AUTHENTICATOR_PACKAGE, vec![1; 32])
                .with_broker_secret_key(COMPANY_PORTAL_PACKAGE, vec![2; 32])
                .with_broker_secret_key("com.microsoft.appmanager", vec![3; 32]),
        );
        assert_eq!(
            helper.legacy_package_order(),
            vec![
                COMPANY_PORTAL_PACKAGE.to_string(),
                AUTHENTICATOR_PACKAGE.to_string(),
                "com.microsoft.appmanager".to_string(),
            ]
        );
    }

    #[test]
    fn test_software_key_below_min_api_level() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app").with_api_level(17));
        assert_eq!(helper.key_type_for_encryption(), KeyType::SoftwareDerivedKey);
        let blob = helper.encrypt("x").expect("encrypt");
        assert_eq!(
            helper.encryption_type(&blob).expect("classify"),
            EncryptionType::SoftwareDerived
        );
        assert_eq!(helper.decrypt(&blob).expect("decrypt"), "x");
    }

    #[test]
    fn test_unavailable_keystore_falls_back_to_software_key() {
        let fixture = Fixture::new();
        fixture.keystore.set_available(false);
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        assert_eq!(helper.key_type_for_encryption(), KeyType::SoftwareDerivedKey);
    }

    #[test]
    fn test_reset_makes_old_values_key_unavailable() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        let blob = helper.encrypt("before-reset").expect("encrypt");

        helper.reset_key_pair().expect("reset");
        match helper.decrypt(&blob) {
            Err(StorageError::KeyUnavailable(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }

        let fresh = helper.encrypt("after-reset").expect("encrypt");
        assert_eq!(helper.decrypt(&fresh).expect("decrypt"), "after-reset");
        // The regenerated key is different, so the old blob now fails authentication.
        match helper.decrypt(&blob) {
            Err(StorageError::Integrity(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_rotation_rewrites_key_record() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        helper.encrypt("x").expect("encrypt");
        let first = helper.current_thumbprint().expect("thumbprint").expect("present");

        // Simulate another process regenerating the key.
        let other = fixture.helper(StorageSettings::new("com.contoso.app"));
        other.reset_key_pair().expect("reset");
        other.encrypt("y").expect("encrypt");
        let second = other.current_thumbprint().expect("thumbprint").expect("present");
        assert_ne!(first, second);

        fixture.helper(StorageSettings::new("com.contoso.app"));
        let bytes = fixture
            .blob_store
            .read("adalks.meta".to_string())
            .expect("read")
            .expect("record");
        let record = KeyRecord::deserialize(&bytes).expect("record");
        assert_eq!(record.thumbprint, second);
        assert_eq!(record.key_version, "A001");
    }

    #[test]
    fn test_encrypted_text_layout() {
        let fixture = Fixture::new();
        let helper = fixture.helper(StorageSettings::new("com.contoso.app"));
        let blob = helper.encrypt("abc").expect("encrypt");
        assert!(blob.starts_with("cE1"));
        let bytes = STANDARD.decode(&blob[3..]).expect("base64");
        assert_eq!(&bytes[..4], b"A001");
        // marker + one block + iv + mac
        assert_eq!(bytes.len(), 4 + 16 + 16 + 32);
    }
}
