//! Versioned authenticated encryption of cache values.
//!
//! Every encrypted value records which kind of key produced it, so a value
//! written years ago under a legacy key stays readable after the app moves
//! to a keystore-backed one. See [`StorageHelper`] for the key selection rules
//! and [`blob`] for the text layout.

pub mod blob;
mod cipher;
mod helper;
mod key_version;
mod keys;
mod record;

pub use blob::EncryptedBlob;
pub use cipher::SecretKey;
pub use helper::StorageHelper;
pub use key_version::{EncryptionType, KeyType, KeyVersion};
