//! Key-value payloads exchanged with the broker.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::error::BrokerError;

/// A single bundle value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleValue {
    /// UTF-8 string.
    Str(String),
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Nested bundle.
    Bundle(Bundle),
}

/// Ordered string-keyed map of [`BundleValue`]s.
///
/// The marshaled form is CBOR; [`Bundle::to_base64`] is what goes into a
/// content provider's selection argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle(BTreeMap<String, BundleValue>);

impl Bundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`, returning the previous value.
    pub fn put(&mut self, key: impl Into<String>, value: BundleValue) -> Option<BundleValue> {
        self.0.insert(key.into(), value)
    }

    /// Inserts a string.
    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, BundleValue::Str(value.into()));
    }

    /// Inserts a boolean.
    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) {
        self.put(key, BundleValue::Bool(value));
    }

    /// Inserts a nested bundle.
    pub fn put_bundle(&mut self, key: impl Into<String>, value: Self) {
        self.put(key, BundleValue::Bundle(value));
    }

    /// Builder form of [`Bundle::put_string`].
    #[must_use]
    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_string(key, value);
        self
    }

    /// Raw access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BundleValue> {
        self.0.get(key)
    }

    /// The string under `key`, if it is one.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(BundleValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    /// The boolean under `key`, if it is one.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(BundleValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    /// The nested bundle under `key`, if it is one.
    #[must_use]
    pub fn get_bundle(&self, key: &str) -> Option<&Self> {
        match self.0.get(key) {
            Some(BundleValue::Bundle(value)) => Some(value),
            _ => None,
        }
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<BundleValue> {
        self.0.remove(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bundle has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entry keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// CBOR encoding.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Serialization`] if encoding fails.
    pub fn marshal(&self) -> Result<Vec<u8>, BrokerError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| BrokerError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    /// Parses the output of [`Bundle::marshal`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Serialization`] if `bytes` is not a bundle.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, BrokerError> {
        ciborium::de::from_reader(bytes).map_err(|err| BrokerError::Serialization(err.to_string()))
    }

    /// Base64 of the marshaled bundle.
    ///
    /// # Errors
    ///
    /// See [`Bundle::marshal`].
    pub fn to_base64(&self) -> Result<String, BrokerError> {
        Ok(STANDARD.encode(self.marshal()?))
    }

    /// Parses the output of [`Bundle::to_base64`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Serialization`] for invalid base64 or CBOR.
    pub fn from_base64(text: &str) -> Result<Self, BrokerError> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|err| BrokerError::Serialization(err.to_string()))?;
        Self::unmarshal(&bytes)
    }
}

impl FromIterator<(String, BundleValue)> for Bundle {
    fn from_iter<T: IntoIterator<Item = (String, BundleValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
