//! Collaborator interfaces the storage layer depends on.
//!
//! The storage engine never touches the OS directly. Everything it needs is
//! reached through three narrow traits, each of which the host platform
//! implements:
//!
//! - [`PlatformKeystore`]: a named key pair that wraps and unwraps the storage key
//! - [`AtomicBlobStore`]: small files written with atomic-replace semantics
//! - [`NameValueStore`]: a string map holding encrypted cache entries
//!
//! # Platform implementations
//!
//! ## Android (Kotlin)
//! - `PlatformKeystore`: `AndroidKeyStore` RSA key pair
//! - `AtomicBlobStore`: app-private files directory
//! - `NameValueStore`: `SharedPreferences`, one file per store
//!
//! ## Desktop / CLI
//! - [`FileKeystore`]: software key pair files under a private directory
//! - [`FsBlobStore`]: temp-file then rename
//! - [`FileNameValueStore`]: JSON document guarded by a cross-process lock
//!
//! ## Tests
//! - [`memory`]: in-memory versions of all three

use std::collections::HashMap;

use crate::error::StorageResult;

mod aead;
mod fs;
mod lock;
pub mod memory;

pub use fs::{FileKeystore, FileNameValueStore, FsBlobStore};
pub use lock::{StoreLock, StoreLockGuard};
pub use memory::{MemoryBlobStore, MemoryKeystore, MemoryNameValueStore};

/// Platform key management.
///
/// Holds asymmetric (or otherwise non-exportable) wrapping keys identified by
/// alias. The storage layer never sees the wrapping key itself, only the
/// wrapped form of its own symmetric key.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait PlatformKeystore: Send + Sync {
    /// Whether this keystore can be used on the current device.
    ///
    /// When `false`, the storage layer falls back to a software-derived key.
    fn is_available(&self) -> bool;

    /// Whether a wrapping key pair exists under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore cannot be queried.
    fn contains_alias(&self, alias: String) -> StorageResult<bool>;

    /// Creates a wrapping key pair under `alias`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the key pair cannot be generated.
    fn generate_key_pair(&self, alias: String) -> StorageResult<()>;

    /// Wraps `key` with the key pair under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if no key pair exists or wrapping fails.
    fn wrap_key(&self, alias: String, key: Vec<u8>) -> StorageResult<Vec<u8>>;

    /// Unwraps bytes produced by [`PlatformKeystore::wrap_key`].
    ///
    /// # Errors
    ///
    /// Returns an error if no key pair exists or the wrapped bytes do not
    /// authenticate under it.
    fn unwrap_key(&self, alias: String, wrapped: Vec<u8>) -> StorageResult<Vec<u8>>;

    /// Deletes the key pair under `alias`. Deleting a missing alias is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore refuses the deletion.
    fn delete_entry(&self, alias: String) -> StorageResult<()>;
}

/// Atomic blob store for small binary files (e.g. the wrapped key file).
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait AtomicBlobStore: Send + Sync {
    /// Reads the blob `name`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&self, name: String) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob `name` with `bytes`. Readers see either the old or
    /// the new content, never a mix.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_atomic(&self, name: String, bytes: Vec<u8>) -> StorageResult<()>;

    /// Deletes the blob `name`. Deleting a missing blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, name: String) -> StorageResult<()>;
}

/// A named string map, typically holding encrypted blobs.
///
/// Multi-process-safe implementations must make [`NameValueStore::get_all`]
/// return a consistent snapshot while other processes mutate single entries.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait NameValueStore: Send + Sync {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: String) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put(&self, key: String, value: String) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn remove(&self, key: String) -> StorageResult<()>;

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn clear(&self) -> StorageResult<()>;

    /// Returns a snapshot of every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_all(&self) -> StorageResult<HashMap<String, String>>;
}
