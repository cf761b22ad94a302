#![allow(dead_code)]

//! Fixtures shared across integration tests.

use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use identitykit_core::{
    ipc::{
        platform::{ContentResolver, Cursor, RemoteError},
        Bundle,
    },
    platform::{MemoryBlobStore, MemoryKeystore, MemoryNameValueStore, NameValueStore},
    StorageHelper, StorageSettings,
};

pub const APP_PACKAGE: &str = "com.contoso.app";

/// One simulated device: a keystore and the app's private blob storage.
pub struct Device {
    pub keystore: Arc<MemoryKeystore>,
    pub blobs: Arc<MemoryBlobStore>,
}

impl Device {
    pub fn new() -> Self {
        Self {
            keystore: Arc::new(MemoryKeystore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    pub fn helper(&self, settings: StorageSettings) -> StorageHelper {
        StorageHelper::new(settings, self.keystore.clone(), self.blobs.clone()).expect("helper")
    }

    pub fn app_helper(&self) -> StorageHelper {
        self.helper(StorageSettings::new(APP_PACKAGE))
    }
}

/// Flips the lowest bit of byte `index` of the decoded blob.
pub fn tamper(blob: &str, index: usize) -> String {
    let (prefix, payload) = blob.split_at(3);
    let mut bytes = STANDARD.decode(payload).expect("base64");
    bytes[index] ^= 0x01;
    format!("{prefix}{}", STANDARD.encode(bytes))
}

/// Decoded length of an encrypted blob.
pub fn decoded_len(blob: &str) -> usize {
    STANDARD.decode(&blob[3..]).expect("base64").len()
}

/// A store of `count` entries `entry-00`.. encrypted by `helper`.
pub fn encrypted_store(helper: &StorageHelper, count: usize) -> Arc<MemoryNameValueStore> {
    let store = Arc::new(MemoryNameValueStore::new());
    for index in 0..count {
        store
            .put(
                entry_key(index),
                helper.encrypt(&format!("token-{index}")).expect("encrypt"),
            )
            .expect("put");
    }
    store
}

pub fn entry_key(index: usize) -> String {
    format!("entry-{index:02}")
}

/// Content resolver that records queries and answers with one scripted cursor.
#[derive(Default)]
pub struct ScriptedResolver {
    pub authorities: Vec<String>,
    pub cursor: Option<Cursor>,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub fn answering(cursor: Option<Cursor>) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

impl ContentResolver for ScriptedResolver {
    fn provider_exists(&self, authority: &str) -> bool {
        self.authorities.iter().any(|known| known == authority)
    }

    fn query(&self, uri: &str, _selection: &str) -> Result<Option<Cursor>, RemoteError> {
        self.queries.lock().unwrap().push(uri.to_string());
        Ok(self.cursor.clone())
    }
}

pub fn cursor_with(key: &str, value: &str) -> Cursor {
    Cursor {
        extras: Some(Bundle::new().with_string(key, value)),
    }
}
