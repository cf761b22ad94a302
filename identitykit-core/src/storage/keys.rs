//! Loading, generation and invalidation of storage keys.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::cipher::SecretKey;
use crate::{
    config::StorageSettings,
    error::{StorageError, StorageResult},
    platform::{AtomicBlobStore, PlatformKeystore},
};

const SOFTWARE_KEY_SALT: &[u8] = b"identitykit:software-storage-key";
const SEED_LEN: usize = 32;

/// Keys that come straight from settings and never change at runtime.
pub(crate) struct StaticKeys {
    pub(crate) user_defined: Option<SecretKey>,
    pub(crate) broker: BTreeMap<String, SecretKey>,
}

impl StaticKeys {
    pub(crate) fn from_settings(settings: &StorageSettings) -> StorageResult<Self> {
        let user_defined = settings
            .user_defined_key
            .clone()
            .map(SecretKey::from_bytes)
            .transpose()?;
        let broker = settings
            .broker_secret_keys
            .iter()
            .map(|(package, key)| {
                SecretKey::from_bytes(key.clone()).map(|key| (package.clone(), key))
            })
            .collect::<StorageResult<BTreeMap<_, _>>>()?;
        Ok(Self {
            user_defined,
            broker,
        })
    }
}

/// A random storage key persisted wrapped by the platform keystore.
///
/// The key file holds exactly the bytes returned by
/// [`PlatformKeystore::wrap_key`]. The unwrapped key is cached in memory until
/// either the key pair or the key file disappears.
pub(crate) struct WrappedKeyLoader {
    keystore: Arc<dyn PlatformKeystore>,
    blob_store: Arc<dyn AtomicBlobStore>,
    alias: String,
    key_file: String,
    cached: Mutex<Option<SecretKey>>,
}

impl WrappedKeyLoader {
    pub(crate) fn new(
        keystore: Arc<dyn PlatformKeystore>,
        blob_store: Arc<dyn AtomicBlobStore>,
        alias: String,
        key_file: String,
    ) -> Self {
        Self {
            keystore,
            blob_store,
            alias,
            key_file,
            cached: Mutex::new(None),
        }
    }

    fn cache(&self) -> StorageResult<MutexGuard<'_, Option<SecretKey>>> {
        self.cached
            .lock()
            .map_err(|_| StorageError::Keystore("key cache mutex poisoned".to_string()))
    }

    /// Returns the key if both the key pair and the key file exist.
    ///
    /// A key file that no longer unwraps is deleted together with the key
    /// pair, and the unwrap error is returned. The next
    /// [`WrappedKeyLoader::load_or_generate`] then starts from scratch.
    pub(crate) fn load(&self) -> StorageResult<Option<SecretKey>> {
        let mut cached = self.cache()?;
        self.load_locked(&mut cached)
    }

    /// Returns the key, generating and persisting a new one if none exists.
    /// The flag is `true` when a key was generated.
    pub(crate) fn load_or_generate(&self) -> StorageResult<(SecretKey, bool)> {
        let mut cached = self.cache()?;
        if let Some(key) = self.load_locked(&mut cached)? {
            return Ok((key, false));
        }

        if self.keystore.contains_alias(self.alias.clone())? {
            tracing::debug!(alias = %self.alias, "reusing existing keystore key pair");
        } else {
            tracing::info!(alias = %self.alias, "generating keystore key pair");
            self.keystore.generate_key_pair(self.alias.clone())?;
        }

        let key = SecretKey::generate();
        let wrapped = self
            .keystore
            .wrap_key(self.alias.clone(), key.as_bytes().to_vec())?;
        self.blob_store
            .write_atomic(self.key_file.clone(), wrapped)?;
        tracing::info!(thumbprint = %key.thumbprint(), "generated keystore-wrapped storage key");
        *cached = Some(key.clone());
        Ok((key, true))
    }

    /// Deletes the key file and the key pair.
    pub(crate) fn reset(&self) -> StorageResult<()> {
        let mut cached = self.cache()?;
        self.wipe_locked(&mut cached)
    }

    fn load_locked(&self, cached: &mut Option<SecretKey>) -> StorageResult<Option<SecretKey>> {
        if !self.keystore.contains_alias(self.alias.clone())? {
            if cached.take().is_some() {
                tracing::warn!(alias = %self.alias, "keystore key pair disappeared, dropping cached key");
            }
            // Without the key pair the wrapped key can never be opened again.
            self.blob_store.delete(self.key_file.clone())?;
            return Ok(None);
        }

        let Some(wrapped) = self.blob_store.read(self.key_file.clone())? else {
            if cached.take().is_some() {
                tracing::warn!(key_file = %self.key_file, "key file disappeared, dropping cached key");
            }
            return Ok(None);
        };

        if let Some(key) = cached.as_ref() {
            return Ok(Some(key.clone()));
        }

        let unwrapped = self
            .keystore
            .unwrap_key(self.alias.clone(), wrapped)
            .map(Zeroizing::new)
            .and_then(|bytes| SecretKey::from_bytes(bytes.to_vec()));
        match unwrapped {
            Ok(key) => {
                tracing::debug!(thumbprint = %key.thumbprint(), "loaded keystore-wrapped storage key");
                *cached = Some(key.clone());
                Ok(Some(key))
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to unwrap storage key, wiping key material");
                if let Err(wipe_err) = self.wipe_locked(cached) {
                    tracing::error!(error = %wipe_err, "failed to wipe unusable key material");
                }
                Err(err)
            }
        }
    }

    fn wipe_locked(&self, cached: &mut Option<SecretKey>) -> StorageResult<()> {
        *cached = None;
        self.blob_store.delete(self.key_file.clone())?;
        self.keystore.delete_entry(self.alias.clone())
    }
}

/// A storage key derived with HKDF-SHA256 from a persisted random seed and
/// the app's package name. Used when no keystore is usable.
pub(crate) struct SoftwareKeyLoader {
    blob_store: Arc<dyn AtomicBlobStore>,
    seed_file: String,
    package_name: String,
    cached: Mutex<Option<SecretKey>>,
}

impl SoftwareKeyLoader {
    pub(crate) fn new(
        blob_store: Arc<dyn AtomicBlobStore>,
        key_file: &str,
        package_name: String,
    ) -> Self {
        Self {
            blob_store,
            seed_file: format!("{key_file}.sw"),
            package_name,
            cached: Mutex::new(None),
        }
    }

    fn cache(&self) -> StorageResult<MutexGuard<'_, Option<SecretKey>>> {
        self.cached
            .lock()
            .map_err(|_| StorageError::BlobStore("key cache mutex poisoned".to_string()))
    }

    pub(crate) fn load(&self) -> StorageResult<Option<SecretKey>> {
        let mut cached = self.cache()?;
        self.load_locked(&mut cached)
    }

    pub(crate) fn load_or_generate(&self) -> StorageResult<(SecretKey, bool)> {
        let mut cached = self.cache()?;
        if let Some(key) = self.load_locked(&mut cached)? {
            return Ok((key, false));
        }

        let mut seed = Zeroizing::new(vec![0u8; SEED_LEN]);
        OsRng.fill_bytes(&mut seed);
        self.blob_store
            .write_atomic(self.seed_file.clone(), seed.to_vec())?;
        let key = self.derive(&seed)?;
        tracing::info!(thumbprint = %key.thumbprint(), "generated software-derived storage key");
        *cached = Some(key.clone());
        Ok((key, true))
    }

    pub(crate) fn reset(&self) -> StorageResult<()> {
        let mut cached = self.cache()?;
        *cached = None;
        self.blob_store.delete(self.seed_file.clone())
    }

    fn load_locked(&self, cached: &mut Option<SecretKey>) -> StorageResult<Option<SecretKey>> {
        let Some(seed) = self.blob_store.read(self.seed_file.clone())? else {
            *cached = None;
            return Ok(None);
        };
        let seed = Zeroizing::new(seed);
        if let Some(key) = cached.as_ref() {
            return Ok(Some(key.clone()));
        }
        let key = self.derive(&seed)?;
        *cached = Some(key.clone());
        Ok(Some(key))
    }

    fn derive(&self, seed: &[u8]) -> StorageResult<SecretKey> {
        if seed.len() != SEED_LEN {
            return Err(StorageError::Malformed(format!(
                "software key seed length mismatch: expected {SEED_LEN}, got {}",
                seed.len()
            )));
        }
        let mut okm = Zeroizing::new(vec![0u8; 32]);
        Hkdf::<Sha256>::new(Some(SOFTWARE_KEY_SALT), seed)
            .expand(self.package_name.as_bytes(), &mut okm)
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        SecretKey::from_bytes(okm.to_vec())
    }
}
