//! Key-version markers and the classification enums derived from them.

/// Which key produced a blob, as recorded in the blob's 4-byte marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum KeyVersion {
    /// `U001`: a raw key supplied by the app or shared between broker apps.
    #[strum(serialize = "U001")]
    UserDefined,
    /// `A001`: a random key wrapped by the platform keystore.
    #[strum(serialize = "A001")]
    KeystoreWrapped,
    /// `S001`: a key derived in software when no keystore is usable.
    #[strum(serialize = "S001")]
    SoftwareDerived,
}

impl KeyVersion {
    /// Length of the marker at the start of every decoded blob.
    pub const MARKER_LEN: usize = 4;

    /// The marker bytes written ahead of the ciphertext.
    #[must_use]
    pub const fn marker(self) -> &'static [u8; Self::MARKER_LEN] {
        match self {
            Self::UserDefined => b"U001",
            Self::KeystoreWrapped => b"A001",
            Self::SoftwareDerived => b"S001",
        }
    }

    /// Parses a marker, returning `None` for unknown markers.
    #[must_use]
    pub fn from_marker(marker: &[u8]) -> Option<Self> {
        match marker {
            b"U001" => Some(Self::UserDefined),
            b"A001" => Some(Self::KeystoreWrapped),
            b"S001" => Some(Self::SoftwareDerived),
            _ => None,
        }
    }
}

/// Classification of a stored value, as returned by
/// [`crate::storage::StorageHelper::encryption_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum EncryptionType {
    /// Encrypted with a user-defined or legacy broker key.
    UserDefined,
    /// Encrypted with the keystore-wrapped key.
    KeystoreWrapped,
    /// Encrypted with the software-derived key.
    SoftwareDerived,
    /// Not an encrypted blob.
    Unencrypted,
}

impl From<KeyVersion> for EncryptionType {
    fn from(version: KeyVersion) -> Self {
        match version {
            KeyVersion::UserDefined => Self::UserDefined,
            KeyVersion::KeystoreWrapped => Self::KeystoreWrapped,
            KeyVersion::SoftwareDerived => Self::SoftwareDerived,
        }
    }
}

/// A concrete key the helper can encrypt or decrypt with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum KeyType {
    /// The key supplied through `StorageSettings::user_defined_key`.
    UserDefinedKey,
    /// A legacy key shared by first-party broker apps, by owning package.
    LegacyBrokerKey {
        /// Package name the key was registered under.
        package_name: String,
    },
    /// The keystore-wrapped key held in the key file.
    KeystoreWrappedKey,
    /// The software-derived fallback key.
    SoftwareDerivedKey,
}

impl KeyType {
    /// The marker written into blobs produced with this key.
    #[must_use]
    pub const fn key_version(&self) -> KeyVersion {
        match self {
            Self::UserDefinedKey | Self::LegacyBrokerKey { .. } => KeyVersion::UserDefined,
            Self::KeystoreWrappedKey => KeyVersion::KeystoreWrapped,
            Self::SoftwareDerivedKey => KeyVersion::SoftwareDerived,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserDefinedKey => f.write_str("user-defined"),
            Self::LegacyBrokerKey { package_name } => write!(f, "legacy-broker({package_name})"),
            Self::KeystoreWrappedKey => f.write_str("keystore-wrapped"),
            Self::SoftwareDerivedKey => f.write_str("software-derived"),
        }
    }
}
