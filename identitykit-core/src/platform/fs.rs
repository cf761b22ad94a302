//! Filesystem-backed collaborators.
//!
//! Every write follows the same pattern: write to a temporary file in the
//! target directory, `fsync` it, then rename it over the destination. Readers
//! therefore always see either the previous or the next version of a file.

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use uuid::Uuid;
use zeroize::Zeroizing;

use super::{aead, lock::StoreLock, AtomicBlobStore, NameValueStore, PlatformKeystore};
use crate::error::{StorageError, StorageResult};

/// Replaces `path` with `bytes` via a temp file and rename.
fn write_file_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(directory)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = directory.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let result = (|| -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        #[cfg(unix)]
        File::open(directory)?.sync_all()?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn remove_optional(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Rejects names that would escape the store directory.
fn checked_name(name: &str) -> Result<&str, String> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.starts_with('.')
    {
        return Err(format!("invalid file name {name:?}"));
    }
    Ok(name)
}

/// Blob store rooted at a directory; one file per blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    directory: PathBuf,
}

impl FsBlobStore {
    /// Creates the store, creating `directory` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl AsRef<Path>) -> StorageResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|err| {
            StorageError::BlobStore(format!("{}: {err}", directory.display()))
        })?;
        Ok(Self { directory })
    }

    fn blob_path(&self, name: &str) -> StorageResult<PathBuf> {
        let name = checked_name(name).map_err(StorageError::BlobStore)?;
        Ok(self.directory.join(name))
    }
}

impl AtomicBlobStore for FsBlobStore {
    fn read(&self, name: String) -> StorageResult<Option<Vec<u8>>> {
        let path = self.blob_path(&name)?;
        read_optional(&path).map_err(|err| StorageError::BlobStore(format!("read {name}: {err}")))
    }

    fn write_atomic(&self, name: String, bytes: Vec<u8>) -> StorageResult<()> {
        let path = self.blob_path(&name)?;
        write_file_atomic(&path, &bytes)
            .map_err(|err| StorageError::BlobStore(format!("write {name}: {err}")))
    }

    fn delete(&self, name: String) -> StorageResult<()> {
        let path = self.blob_path(&name)?;
        remove_optional(&path)
            .map_err(|err| StorageError::BlobStore(format!("delete {name}: {err}")))
    }
}

/// Name-value store persisted as one JSON document.
///
/// Mutations take an exclusive lock on `<name>.lock` (plus an in-process
/// mutex), re-read the document, apply the change and atomically replace the
/// file. Reads never lock: the rename guarantees they see a whole document.
#[derive(Debug)]
pub struct FileNameValueStore {
    path: PathBuf,
    lock: StoreLock,
    writer: Mutex<()>,
}

impl FileNameValueStore {
    /// Opens the store `name` inside `directory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the lock file cannot be created.
    pub fn open(directory: impl AsRef<Path>, name: &str) -> StorageResult<Self> {
        let name = checked_name(name).map_err(StorageError::NameValueStore)?;
        let directory = directory.as_ref();
        let lock = StoreLock::open(&directory.join(format!("{name}.lock")))?;
        Ok(Self {
            path: directory.join(format!("{name}.json")),
            lock,
            writer: Mutex::new(()),
        })
    }

    fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        let Some(bytes) = read_optional(&self.path).map_err(|err| {
            StorageError::NameValueStore(format!("{}: {err}", self.path.display()))
        })?
        else {
            return Ok(BTreeMap::new());
        };
        serde_json::from_slice(&bytes).map_err(|err| {
            StorageError::Serialization(format!("{}: {err}", self.path.display()))
        })
    }

    fn mutate<F>(&self, change: F) -> StorageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _local = self
            .writer
            .lock()
            .map_err(|_| StorageError::NameValueStore("mutex poisoned".to_string()))?;
        let _guard = self.lock.lock()?;
        let mut entries = self.load()?;
        change(&mut entries);
        let bytes = serde_json::to_vec_pretty(&entries)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        write_file_atomic(&self.path, &bytes).map_err(|err| {
            StorageError::NameValueStore(format!("{}: {err}", self.path.display()))
        })
    }
}

impl NameValueStore for FileNameValueStore {
    fn get(&self, key: String) -> StorageResult<Option<String>> {
        Ok(self.load()?.remove(&key))
    }

    fn put(&self, key: String, value: String) -> StorageResult<()> {
        self.mutate(|entries| {
            entries.insert(key, value);
        })
    }

    fn remove(&self, key: String) -> StorageResult<()> {
        self.mutate(|entries| {
            entries.remove(&key);
        })
    }

    fn clear(&self) -> StorageResult<()> {
        self.mutate(BTreeMap::clear)
    }

    fn get_all(&self) -> StorageResult<HashMap<String, String>> {
        Ok(self.load()?.into_iter().collect())
    }
}

/// Software keystore for hosts without a platform keystore.
///
/// Each alias is a 32-byte random key in `<alias>.keypair` (mode `0600` on
/// Unix); wrapping is XChaCha20-Poly1305 with the alias as associated data.
/// It offers no hardware protection and exists for the CLI and desktop tests.
#[derive(Debug, Clone)]
pub struct FileKeystore {
    directory: PathBuf,
}

impl FileKeystore {
    /// Creates the keystore, creating `directory` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl AsRef<Path>) -> StorageResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|err| {
            StorageError::Keystore(format!("{}: {err}", directory.display()))
        })?;
        Ok(Self { directory })
    }

    fn key_path(&self, alias: &str) -> StorageResult<PathBuf> {
        let alias = checked_name(alias).map_err(StorageError::Keystore)?;
        Ok(self.directory.join(format!("{alias}.keypair")))
    }

    fn wrapping_key(&self, alias: &str) -> StorageResult<Zeroizing<[u8; 32]>> {
        let path = self.key_path(alias)?;
        let bytes = Zeroizing::new(
            read_optional(&path)
                .map_err(|err| StorageError::Keystore(format!("{alias}: {err}")))?
                .ok_or_else(|| {
                    StorageError::Keystore(format!("no key pair under alias {alias}"))
                })?,
        );
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            StorageError::Keystore(format!("key pair file for {alias} is corrupt"))
        })?;
        Ok(Zeroizing::new(key))
    }
}

impl PlatformKeystore for FileKeystore {
    fn is_available(&self) -> bool {
        self.directory.is_dir()
    }

    fn contains_alias(&self, alias: String) -> StorageResult<bool> {
        Ok(self.key_path(&alias)?.is_file())
    }

    fn generate_key_pair(&self, alias: String) -> StorageResult<()> {
        let path = self.key_path(&alias)?;
        let key = Zeroizing::new(aead::random_key());
        write_file_atomic(&path, key.as_slice())
            .map_err(|err| StorageError::Keystore(format!("{alias}: {err}")))
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
        let path = self.key_path(&alias)?;
        remove_optional(&path).map_err(|err| StorageError::Keystore(format!("{alias}: {err}")))
    }
}
