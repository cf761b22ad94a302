//! In-memory collaborator implementations.
//!
//! Used by the test suites and by embedders that want a throwaway cache.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use zeroize::Zeroizing;

use super::{aead, AtomicBlobStore, NameValueStore, PlatformKeystore};
use crate::error::{StorageError, StorageResult};

/// Keystore holding its wrapping keys in process memory.
///
/// Availability can be toggled to exercise the software-key fallback, and
/// entries can be dropped to simulate an OS upgrade wiping the keystore.
pub struct MemoryKeystore {
    entries: Mutex<HashMap<String, Zeroizing<[u8; 32]>>>,
    available: AtomicBool,
}

impl MemoryKeystore {
    /// Creates an empty, available keystore.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a keystore that reports itself as unavailable.
    #[must_use]
    pub fn unavailable() -> Self {
        let keystore = Self::new();
        keystore.set_available(false);
        keystore
    }

    /// Switches availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn wrapping_key(&self, alias: &str) -> StorageResult<Zeroizing<[u8; 32]>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Keystore("mutex poisoned".to_string()))?
            .get(alias)
            .cloned()
            .ok_or_else(|| StorageError::Keystore(format!("no key pair under alias {alias}")))
    }
}

impl Default for MemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformKeystore for MemoryKeystore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn contains_alias(&self, alias: String) -> StorageResult<bool> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| StorageError::Keystore("mutex poisoned".to_string()))?
            .contains_key(&alias))
    }

    fn generate_key_pair(&self, alias: String) -> StorageResult<()> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Keystore("mutex poisoned".to_string()))?
            .insert(alias, Zeroizing::new(aead::random_key()));
        Ok(())
    }

    fn wrap_key(&self, alias: String, key: Vec<u8>) -> StorageResult<Vec<u8>> {
        let wrapping_key = self.wrapping_key(&alias)?;
        aead::seal(&wrapping_key, alias.as_bytes(), &key)
    }

    fn unwrap_key(&self, alias: String, wrapped: Vec<u8>) -> StorageResult<Vec<u8>> {
        let wrapping_key = self.wrapping_key(&alias)?;
        aead::open(&wrapping_key, alias.as_bytes(), &wrapped)
    }

    fn delete_entry(&self, alias: String) -> StorageResult<()> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Keystore("mutex poisoned".to_string()))?
            .remove(&alias);
        Ok(())
    }
}

/// Blob store backed by a `HashMap`.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicBlobStore for MemoryBlobStore {
    fn read(&self, name: String) -> StorageResult<Option<Vec<u8>>> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| StorageError::BlobStore("mutex poisoned".to_string()))?;
        Ok(guard.get(&name).cloned())
    }

    fn write_atomic(&self, name: String, bytes: Vec<u8>) -> StorageResult<()> {
        self.blobs
            .lock()
            .map_err(|_| StorageError::BlobStore("mutex poisoned".to_string()))?
            .insert(name, bytes);
        Ok(())
    }

    fn delete(&self, name: String) -> StorageResult<()> {
        self.blobs
            .lock()
            .map_err(|_| StorageError::BlobStore("mutex poisoned".to_string()))?
            .remove(&name);
        Ok(())
    }
}

/// Name-value store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryNameValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryNameValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }

    fn entries(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::NameValueStore("mutex poisoned".to_string()))
    }
}

impl NameValueStore for MemoryNameValueStore {
    fn get(&self, key: String) -> StorageResult<Option<String>> {
        Ok(self.entries()?.get(&key).cloned())
    }

    fn put(&self, key: String, value: String) -> StorageResult<()> {
        self.entries()?.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: String) -> StorageResult<()> {
        self.entries()?.remove(&key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries()?.clear();
        Ok(())
    }

    fn get_all(&self) -> StorageResult<HashMap<String, String>> {
        Ok(self.entries()?.clone())
    }
}
