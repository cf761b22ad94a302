//! `UniFFI` surface. Foreign callers get JSON-configured constructors and
//! thin wrappers over the native API.

use std::sync::{Arc, OnceLock};

use crate::{
    config::StorageSettings,
    error::{StorageError, StorageResult},
    logger::{LogDispatcher, Logger},
    migration::{self, MigrationResult, ReencryptionParams},
    platform::{AtomicBlobStore, NameValueStore, PlatformKeystore},
    storage::{EncryptionType, KeyType, StorageHelper},
};

/// Foreign callers hold no handle to the subscriber, and a tracing global
/// default can be set only once per process, so the dispatcher behind it
/// lives here and later loggers are added to it.
static DISPATCHER: OnceLock<Arc<LogDispatcher>> = OnceLock::new();

#[uniffi::export]
impl StorageHelper {
    /// Builds a helper from a JSON-encoded `StorageSettings` document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if the document cannot be
    /// parsed, or any error from [`StorageHelper::new`].
    #[uniffi::constructor]
    pub fn from_json(
        settings: &str,
        keystore: Arc<dyn PlatformKeystore>,
        blob_store: Arc<dyn AtomicBlobStore>,
    ) -> StorageResult<Self> {
        let settings: StorageSettings = serde_json::from_str(settings)
            .map_err(|err| StorageError::InvalidConfig(err.to_string()))?;
        Self::new(settings, keystore, blob_store)
    }

    /// See [`StorageHelper::encrypt`].
    ///
    /// # Errors
    ///
    /// See [`StorageHelper::encrypt`].
    pub fn encrypt_value(&self, plaintext: &str) -> StorageResult<String> {
        self.encrypt(plaintext)
    }

    /// See [`StorageHelper::decrypt`].
    ///
    /// # Errors
    ///
    /// See [`StorageHelper::decrypt`].
    pub fn decrypt_value(&self, value: &str) -> StorageResult<String> {
        self.decrypt(value)
    }

    /// See [`StorageHelper::encryption_type`].
    ///
    /// # Errors
    ///
    /// See [`StorageHelper::encryption_type`].
    pub fn classify(&self, value: &str) -> StorageResult<EncryptionType> {
        self.encryption_type(value)
    }

    /// See [`StorageHelper::key_type_for_encryption`].
    pub fn preferred_key_type(&self) -> KeyType {
        self.key_type_for_encryption()
    }

    /// See [`StorageHelper::reset_key_pair`].
    ///
    /// # Errors
    ///
    /// See [`StorageHelper::reset_key_pair`].
    pub fn reset_keys(&self) -> StorageResult<()> {
        self.reset_key_pair()
    }
}

/// Re-encrypts every entry of `store` from `from`'s keys to `to`'s
/// preferred key. Blocks until done.
///
/// # Errors
///
/// Returns an error if the store cannot be read. Per-entry failures are
/// reported in the result.
#[uniffi::export]
pub fn reencrypt_store(
    store: Arc<dyn NameValueStore>,
    from: Arc<StorageHelper>,
    to: Arc<StorageHelper>,
    params: ReencryptionParams,
) -> StorageResult<MigrationResult> {
    migration::reencrypt(store.as_ref(), to.as_ref(), from.as_ref(), params)
}

/// Routes library logs to `logger`. The first call installs the global
/// subscriber; later calls add sinks to it.
#[uniffi::export]
pub fn install_logger(logger: Arc<dyn Logger>, directives: &str) {
    attach_logger(&DISPATCHER, logger, directives);
}

fn attach_logger(
    cell: &OnceLock<Arc<LogDispatcher>>,
    logger: Arc<dyn Logger>,
    directives: &str,
) {
    let mut created = false;
    let dispatcher = cell.get_or_init(|| {
        created = true;
        Arc::new(LogDispatcher::with_sink(logger.clone()))
    });
    if !created {
        dispatcher.add_sink(logger);
        return;
    }
    if let Err(err) = dispatcher.install(directives) {
        tracing::warn!(error = %err, "identitykit logger not installed");
    }
}
