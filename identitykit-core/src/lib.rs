//! `identitykit-core` is the storage and broker-IPC core of an identity
//! client.
//!
//! It has three parts:
//!
//! - [`storage`]: authenticated encryption of token-cache values under a
//!   versioned key. Every encrypted value records which key produced it, so
//!   values written by older app versions, by another broker app, or before a
//!   key rotation stay readable.
//! - [`migration`]: bulk re-encryption of a whole name-value store from one
//!   key to another, with per-entry failure handling.
//! - [`ipc`]: transport selection and fallback for requests to the broker app.
//!
//! Platform services (keystore, file storage, name-value stores, binder,
//! content resolver, `AccountManager`) are traits the embedder implements.
//! Portable implementations backed by the filesystem or by memory live in
//! [`platform`].
//!
//! With the `ffi` feature the storage helper, collaborator traits and logger
//! are exported through `UniFFI`.

pub mod config;
pub mod defaults;
pub mod diagnostics;
pub mod error;
pub mod ipc;
pub mod logger;
pub mod migration;
pub mod platform;
pub mod storage;

#[cfg(feature = "ffi")]
mod ffi;

pub use config::{IdentityKitConfig, IpcSettings, StorageSettings};
pub use error::{StorageError, StorageResult};
pub use migration::{MigrationResult, ReencryptionParams, Reencrypter};
pub use storage::{EncryptionType, KeyType, StorageHelper};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("identitykit_core");
