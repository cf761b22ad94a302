//! Persisted metadata about the active storage key.
//!
//! The key file itself stays in the legacy raw format; this sidecar record
//! only remembers which key was active so silent rotation can be detected.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct KeyRecord {
    pub(crate) version: u32,
    /// Marker of the key the record describes (`A001`, `S001`, `U001`).
    pub(crate) key_version: String,
    pub(crate) thumbprint: String,
    pub(crate) created_at: u64,
}

impl KeyRecord {
    pub(crate) fn new(key_version: String, thumbprint: String, now: u64) -> Self {
        Self {
            version: RECORD_VERSION,
            key_version,
            thumbprint,
            created_at: now,
        }
    }

    pub(crate) fn serialize(&self) -> StorageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> StorageResult<Self> {
        let record: Self = ciborium::de::from_reader(bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if record.version != RECORD_VERSION {
            return Err(StorageError::UnsupportedRecordVersion(record.version));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_survives_serialization() {
        let record = KeyRecord::new("A001".to_string(), "thumb".to_string(), 1_700_000_000);
        let bytes = record.serialize().expect("serialize");
        assert_eq!(KeyRecord::deserialize(&bytes).expect("deserialize"), record);
    }

    #[test]
    fn test_record_version_mismatch() {
        let mut record = KeyRecord::new("A001".to_string(), "thumb".to_string(), 1);
        record.version = RECORD_VERSION + 1;
        let bytes = record.serialize().expect("serialize");
        match KeyRecord::deserialize(&bytes) {
            Err(StorageError::UnsupportedRecordVersion(version)) => {
                assert_eq!(version, RECORD_VERSION + 1);
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        assert!(matches!(
            KeyRecord::deserialize(&[0xFF, 0x00, 0x13]),
            Err(StorageError::Serialization(_))
        ));
    }
}
