//! Error types for the encrypted storage layer and the migration orchestrator.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the storage layer.
///
/// The variant name is stable and is used as the first half of the failure
/// signature aggregated by [`crate::migration::MigrationResult`].
#[derive(Debug, Error, strum::IntoStaticStr)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum StorageError {
    /// The caller supplied an input that can never be processed (e.g. empty plaintext).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authenticated decryption failed. The blob was tampered with or was
    /// produced under a key that is no longer the one on record.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// The blob names a key version whose material is not present on this device.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// The blob is not in the expected text or binary layout.
    #[error("malformed blob: {0}")]
    Malformed(String),

    /// Cipher failures other than MAC verification.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Errors coming from the platform keystore.
    #[error("keystore error: {0}")]
    Keystore(String),

    /// Errors coming from the blob store.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Errors coming from a name-value store.
    #[error("name-value store error: {0}")]
    NameValueStore(String),

    /// Errors coming from the cross-process store lock.
    #[error("store lock error: {0}")]
    Lock(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Settings could not be loaded or failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Unsupported key record version.
    #[error("unsupported key record version: {0}")]
    UnsupportedRecordVersion(u32),

    /// The background re-encryption worker is no longer accepting jobs.
    #[error("re-encryption worker unavailable")]
    WorkerUnavailable,

    /// Unexpected `UniFFI` callback error.
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl StorageError {
    /// Stable name of the error variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Signature used to aggregate identical failures: `"<Kind>::<message>"`.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}::{self}", self.kind())
    }
}

#[cfg(feature = "ffi")]
impl From<uniffi::UnexpectedUniFFICallbackError> for StorageError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}
