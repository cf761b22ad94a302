//! Bulk re-encryption of a name-value store from one key to another.
//!
//! A run snapshots the store, decrypts every entry, re-encrypts every entry
//! that survived, then writes the survivors back one key at a time:
//!
//! ```text
//! get_all ──► working copy ──► pass 1 (decrypt) ──► removals ──► abort?
//!                                  │
//!                                  ▼
//!                          pass 2 (encrypt) ──► removals ──► abort? ──► put each
//! ```
//!
//! The store must not be mutated by anyone else during a run.
//!
//! # Crash behaviour
//!
//! The write-back is not transactional. If the process dies part way through
//! it, the store holds a mix of entries under the old key and entries under
//! the new one. Callers that can detect this (e.g. through
//! [`crate::storage::StorageHelper::encryption_type`]) should run the
//! migration again with a decrypter able to read both.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    error::{StorageError, StorageResult},
    platform::NameValueStore,
    storage::StorageHelper,
};

mod worker;

pub use worker::{MigrationHandle, Reencrypter};

/// Encrypts one value.
pub trait StringEncrypter: Send + Sync {
    /// Encrypts `plaintext`.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a failure of the entry being processed.
    fn encrypt(&self, plaintext: &str) -> StorageResult<String>;
}

/// Decrypts one value.
pub trait StringDecrypter: Send + Sync {
    /// Decrypts `value`.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a failure of the entry being processed.
    fn decrypt(&self, value: &str) -> StorageResult<String>;
}

impl StringEncrypter for StorageHelper {
    fn encrypt(&self, plaintext: &str) -> StorageResult<String> {
        Self::encrypt(self, plaintext)
    }
}

impl StringDecrypter for StorageHelper {
    fn decrypt(&self, value: &str) -> StorageResult<String> {
        Self::decrypt(self, value)
    }
}

/// Returns every value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl StringEncrypter for IdentityTransform {
    fn encrypt(&self, plaintext: &str) -> StorageResult<String> {
        Ok(plaintext.to_string())
    }
}

impl StringDecrypter for IdentityTransform {
    fn decrypt(&self, value: &str) -> StorageResult<String> {
        Ok(value.to_string())
    }
}

/// Failure policy of a run. The three flags combine freely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ReencryptionParams {
    /// Stop at the first failure. Entries not yet processed are left untouched.
    pub abort_on_error: bool,
    /// Remove a failing entry from the store.
    pub erase_entry_on_error: bool,
    /// Remove every entry from the store at the first failure, then stop.
    pub erase_all_on_error: bool,
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct MigrationResult {
    /// Entries in the store when the run started.
    pub total_records: u64,
    /// Failures encountered before the run completed or aborted.
    pub failed_records: u64,
    /// Failure count by [`StorageError::signature`].
    pub failures_by_type: HashMap<String, u64>,
}

impl MigrationResult {
    fn add_failure(&mut self, err: &StorageError) {
        self.failed_records += 1;
        *self.failures_by_type.entry(err.signature()).or_insert(0) += 1;
    }
}

/// Re-encrypts every entry of `store` from `decrypter`'s key to `encrypter`'s.
///
/// Per-entry failures are reported in the returned [`MigrationResult`] and
/// handled according to `params`. An entry that fails is never written back,
/// so it keeps its original value unless the policy erased it.
///
/// # Errors
///
/// Only failures of the store itself are returned as errors.
pub fn reencrypt(
    store: &dyn NameValueStore,
    encrypter: &dyn StringEncrypter,
    decrypter: &dyn StringDecrypter,
    params: ReencryptionParams,
) -> StorageResult<MigrationResult> {
    let mut working: BTreeMap<String, String> = store.get_all()?.into_iter().collect();
    tracing::debug!(entries = working.len(), "starting cache re-encryption");

    let mut run = Run {
        params,
        result: MigrationResult {
            total_records: working.len() as u64,
            ..MigrationResult::default()
        },
        skipped: BTreeSet::new(),
        marked_for_removal: BTreeSet::new(),
        aborted: false,
    };

    run.apply("decrypt", &mut working, |value| decrypter.decrypt(value));
    run.clear_marked(store, &mut working)?;
    if run.aborted {
        tracing::info!(failed = run.result.failed_records, "aborting after decrypt");
        return Ok(run.result);
    }

    run.apply("encrypt", &mut working, |value| encrypter.encrypt(value));
    run.clear_marked(store, &mut working)?;
    if run.aborted {
        tracing::info!(failed = run.result.failed_records, "aborting after re-encrypt");
        return Ok(run.result);
    }

    tracing::info!(
        entries = working.len() - run.skipped.len(),
        "writing re-encrypted cache entries"
    );
    for (key, value) in working {
        if run.skipped.contains(&key) {
            continue;
        }
        store.put(key, value)?;
    }

    Ok(run.result)
}

struct Run {
    params: ReencryptionParams,
    result: MigrationResult,
    skipped: BTreeSet<String>,
    marked_for_removal: BTreeSet<String>,
    aborted: bool,
}

impl Run {
    fn apply(
        &mut self,
        stage: &str,
        working: &mut BTreeMap<String, String>,
        mutation: impl Fn(&str) -> StorageResult<String>,
    ) {
        let mut erase_all = false;
        for (key, value) in working.iter_mut() {
            if self.skipped.contains(key) {
                tracing::trace!(stage, "skipping entry that already failed");
                continue;
            }
            let err = match mutation(value) {
                Ok(mutated) => {
                    *value = mutated;
                    continue;
                }
                Err(err) => err,
            };

            tracing::error!(stage, kind = err.kind(), error = %err, "cache entry mutation failed");
            self.result.add_failure(&err);
            self.skipped.insert(key.clone());

            if self.params.erase_entry_on_error {
                tracing::warn!(stage, "marking entry for removal");
                self.marked_for_removal.insert(key.clone());
            }
            if self.params.erase_all_on_error {
                tracing::warn!(stage, "marking all entries for removal");
                erase_all = true;
                self.aborted = true;
                break;
            }
            if self.params.abort_on_error {
                self.aborted = true;
                break;
            }
        }
        if erase_all {
            self.marked_for_removal.extend(working.keys().cloned());
        }
    }

    fn clear_marked(
        &mut self,
        store: &dyn NameValueStore,
        working: &mut BTreeMap<String, String>,
    ) -> StorageResult<()> {
        if self.marked_for_removal.is_empty() {
            return Ok(());
        }
        tracing::warn!(entries = self.marked_for_removal.len(), "removing entries marked for removal");
        for key in std::mem::take(&mut self.marked_for_removal) {
            working.remove(&key);
            self.skipped.remove(&key);
            store.remove(key)?;
        }
        Ok(())
    }
}
