//! Settings for the storage and IPC layers.
//!
//! Settings are plain values handed to constructors. Nothing here is global:
//! a process that needs two differently configured helpers builds two
//! [`StorageSettings`].

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_ACCOUNT_MANAGER_TIMEOUT_MS, DEFAULT_BOUND_SERVICE_TIMEOUT_MS,
    DEFAULT_HELLO_CACHE_TIMEOUT_MS, DEFAULT_KEYSTORE_ALIAS, DEFAULT_KEY_FILE_NAME,
    DEFAULT_MIN_KEYSTORE_API_LEVEL,
};
use crate::error::{StorageError, StorageResult};

/// Configures key selection for a [`crate::storage::StorageHelper`].
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct StorageSettings {
    /// Package name of the running app. Drives the legacy broker key lookup.
    pub package_name: String,
    /// Raw key supplied by the embedding app. Wins over every other key when set.
    #[serde(default, with = "b64::option")]
    pub user_defined_key: Option<Vec<u8>>,
    /// Legacy keys previously shared between first-party broker apps, by package name.
    #[serde(default, with = "b64::map")]
    pub broker_secret_keys: HashMap<String, Vec<u8>>,
    /// Broker apps encrypt with the keystore key instead of their legacy key.
    #[serde(default)]
    pub encrypt_with_keystore_key: bool,
    /// Platform API level of the device.
    #[serde(default = "default_api_level")]
    pub api_level: u32,
    /// Devices below this API level use the software-derived key.
    #[serde(default = "default_min_keystore_api_level")]
    pub min_keystore_api_level: u32,
    /// Blob name of the wrapped key file.
    #[serde(default = "default_key_file_name")]
    pub key_file_name: String,
    /// Keystore alias of the wrapping key pair.
    #[serde(default = "default_keystore_alias")]
    pub keystore_alias: String,
}

impl StorageSettings {
    /// Settings for `package_name` with every other field at its default.
    #[must_use]
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            user_defined_key: None,
            broker_secret_keys: HashMap::new(),
            encrypt_with_keystore_key: false,
            api_level: default_api_level(),
            min_keystore_api_level: default_min_keystore_api_level(),
            key_file_name: default_key_file_name(),
            keystore_alias: default_keystore_alias(),
        }
    }

    /// Sets the user-defined key.
    #[must_use]
    pub fn with_user_defined_key(mut self, key: Vec<u8>) -> Self {
        self.user_defined_key = Some(key);
        self
    }

    /// Registers a legacy broker key for `package_name`.
    #[must_use]
    pub fn with_broker_secret_key(
        mut self,
        package_name: impl Into<String>,
        key: Vec<u8>,
    ) -> Self {
        self.broker_secret_keys.insert(package_name.into(), key);
        self
    }

    /// Sets the platform API level.
    #[must_use]
    pub const fn with_api_level(mut self, api_level: u32) -> Self {
        self.api_level = api_level;
        self
    }

    /// Checks the settings for values that would make every encrypt call fail.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] for an empty package name, empty
    /// key file name or alias, or a key that is not a valid AES key length.
    pub fn validate(&self) -> StorageResult<()> {
        if self.package_name.is_empty() {
            return Err(StorageError::InvalidConfig(
                "package_name must not be empty".to_string(),
            ));
        }
        if self.key_file_name.is_empty() || self.keystore_alias.is_empty() {
            return Err(StorageError::InvalidConfig(
                "key_file_name and keystore_alias must not be empty".to_string(),
            ));
        }
        if let Some(key) = &self.user_defined_key {
            check_key_len("user_defined_key", key)?;
        }
        for (package, key) in &self.broker_secret_keys {
            check_key_len(package, key)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("package_name", &self.package_name)
            .field("user_defined_key", &self.user_defined_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "broker_secret_keys",
                &self.broker_secret_keys.keys().collect::<Vec<_>>(),
            )
            .field("encrypt_with_keystore_key", &self.encrypt_with_keystore_key)
            .field("api_level", &self.api_level)
            .field("min_keystore_api_level", &self.min_keystore_api_level)
            .field("key_file_name", &self.key_file_name)
            .field("keystore_alias", &self.keystore_alias)
            .finish()
    }
}

fn check_key_len(label: &str, key: &[u8]) -> StorageResult<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        len => Err(StorageError::InvalidConfig(format!(
            "{label}: key must be 16, 24 or 32 bytes, got {len}"
        ))),
    }
}

/// Timeouts and cache knobs for broker IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcSettings {
    /// Bound service bind + call timeout.
    #[serde(default = "default_bound_service_timeout_ms")]
    pub bound_service_timeout_ms: u64,
    /// `AccountManager` add-account timeout.
    #[serde(default = "default_account_manager_timeout_ms")]
    pub account_manager_timeout_ms: u64,
    /// Age after which a cached hello result is discarded.
    #[serde(default = "default_hello_cache_timeout_ms")]
    pub hello_cache_timeout_ms: u64,
    /// Disables the hello cache entirely when false.
    #[serde(default = "default_true")]
    pub hello_cache_enabled: bool,
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            bound_service_timeout_ms: default_bound_service_timeout_ms(),
            account_manager_timeout_ms: default_account_manager_timeout_ms(),
            hello_cache_timeout_ms: default_hello_cache_timeout_ms(),
            hello_cache_enabled: true,
        }
    }
}

/// Top-level settings document, as read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKitConfig {
    /// Storage layer settings.
    pub storage: StorageSettings,
    /// IPC layer settings.
    #[serde(default)]
    pub ipc: IpcSettings,
}

impl IdentityKitConfig {
    /// Parses and validates a JSON settings document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if the document does not parse
    /// or fails validation.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| StorageError::InvalidConfig(err.to_string()))?;
        config.storage.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON settings file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if the file cannot be read or
    /// its contents are invalid.
    pub fn from_path(path: &Path) -> StorageResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            StorageError::InvalidConfig(format!("{}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }
}

const fn default_api_level() -> u32 {
    u32::MAX
}

const fn default_min_keystore_api_level() -> u32 {
    DEFAULT_MIN_KEYSTORE_API_LEVEL
}

fn default_key_file_name() -> String {
    DEFAULT_KEY_FILE_NAME.to_string()
}

fn default_keystore_alias() -> String {
    DEFAULT_KEYSTORE_ALIAS.to_string()
}

const fn default_bound_service_timeout_ms() -> u64 {
    DEFAULT_BOUND_SERVICE_TIMEOUT_MS
}

const fn default_account_manager_timeout_ms() -> u64 {
    DEFAULT_ACCOUNT_MANAGER_TIMEOUT_MS
}

const fn default_hello_cache_timeout_ms() -> u64 {
    DEFAULT_HELLO_CACHE_TIMEOUT_MS
}

const fn default_true() -> bool {
    true
}

/// Base64 (standard alphabet) encoding for key material in settings files.
mod b64 {
    pub mod option {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    pub mod map {
        use std::collections::HashMap;

        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use serde::{ser::SerializeMap, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &HashMap<String, Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(value.len()))?;
            for (package, key) in value {
                map.serialize_entry(package, &STANDARD.encode(key))?;
            }
            map.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<HashMap<String, Vec<u8>>, D::Error> {
            HashMap::<String, String>::deserialize(deserializer)?
                .into_iter()
                .map(|(package, text)| {
                    STANDARD
                        .decode(text)
                        .map(|key| (package, key))
                        .map_err(serde::de::Error::custom)
                })
                .collect()
        }
    }
}
