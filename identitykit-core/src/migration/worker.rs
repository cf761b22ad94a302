use std::{
    future::{Future, IntoFuture},
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{mpsc, Arc, Mutex},
    thread,
};

use tokio::sync::oneshot;

use super::{reencrypt, MigrationResult, ReencryptionParams, StringDecrypter, StringEncrypter};
use crate::{
    error::{StorageError, StorageResult},
    platform::NameValueStore,
};

const WORKER_THREAD_NAME: &str = "identitykit-reencrypt";

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs re-encryption jobs, synchronously or on one background thread.
///
/// Async jobs run one at a time in submission order. The worker thread is
/// started on the first [`Reencrypter::reencrypt_async`] call and exits when
/// the `Reencrypter` is dropped and its queue drains.
#[derive(Default)]
pub struct Reencrypter {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
}

impl Reencrypter {
    /// Creates a re-encrypter. No thread is started yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a migration on the calling thread. See [`super::reencrypt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store itself fails.
    pub fn reencrypt(
        &self,
        store: &dyn NameValueStore,
        encrypter: &dyn StringEncrypter,
        decrypter: &dyn StringDecrypter,
        params: ReencryptionParams,
    ) -> StorageResult<MigrationResult> {
        reencrypt(store, encrypter, decrypter, params)
    }

    /// Queues a migration on the background worker and returns a handle to
    /// its single result.
    ///
    /// If the worker cannot be started or has died, the handle resolves to
    /// [`StorageError::WorkerUnavailable`].
    pub fn reencrypt_async(
        &self,
        store: Arc<dyn NameValueStore>,
        encrypter: Arc<dyn StringEncrypter>,
        decrypter: Arc<dyn StringDecrypter>,
        params: ReencryptionParams,
    ) -> MigrationHandle {
        let (sender, receiver) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = reencrypt(store.as_ref(), encrypter.as_ref(), decrypter.as_ref(), params);
            if sender.send(result).is_err() {
                tracing::debug!("migration handle dropped before completion");
            }
        });

        if let Err(err) = self.submit(job) {
            tracing::error!(error = %err, "could not queue re-encryption job");
        }
        MigrationHandle { receiver }
    }

    fn submit(&self, job: Job) -> StorageResult<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| StorageError::WorkerUnavailable)?;

        let job = match jobs.as_ref() {
            Some(sender) => match sender.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::SendError(job)) => {
                    tracing::warn!("re-encryption worker exited, restarting it");
                    job
                }
            },
            None => job,
        };

        let sender = spawn_worker()?;
        sender
            .send(job)
            .map_err(|_| StorageError::WorkerUnavailable)?;
        *jobs = Some(sender);
        Ok(())
    }
}

impl std::fmt::Debug for Reencrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let started = self.jobs.lock().map(|jobs| jobs.is_some()).unwrap_or(false);
        f.debug_struct("Reencrypter")
            .field("worker_started", &started)
            .finish()
    }
}

fn spawn_worker() -> StorageResult<mpsc::Sender<Job>> {
    let (sender, jobs) = mpsc::channel::<Job>();
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            for job in jobs {
                // A panicking job drops its result sender; the handle reports
                // `WorkerUnavailable` and the worker keeps serving the queue.
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("re-encryption job panicked");
                }
            }
            tracing::debug!("re-encryption worker shutting down");
        })
        .map_err(|err| {
            tracing::error!(error = %err, "failed to spawn re-encryption worker");
            StorageError::WorkerUnavailable
        })?;
    Ok(sender)
}

/// Completion handle of an async migration.
///
/// Either `.await` it or call [`MigrationHandle::wait`] from a thread that
/// is not driving an async runtime.
#[derive(Debug)]
pub struct MigrationHandle {
    receiver: oneshot::Receiver<StorageResult<MigrationResult>>,
}

impl MigrationHandle {
    /// Blocks until the migration completes.
    ///
    /// # Errors
    ///
    /// Returns the migration's error, or [`StorageError::WorkerUnavailable`]
    /// if the job never ran to completion.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn wait(self) -> StorageResult<MigrationResult> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(StorageError::WorkerUnavailable))
    }
}

impl IntoFuture for MigrationHandle {
    type Output = StorageResult<MigrationResult>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            self.receiver
                .await
                .unwrap_or(Err(StorageError::WorkerUnavailable))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{migration::IdentityTransform, platform::MemoryNameValueStore};

    struct Panics;

    impl StringDecrypter for Panics {
        fn decrypt(&self, _value: &str) -> StorageResult<String> {
            panic!("decrypter exploded");
        }
    }

    /// Logs which job each decrypt call belongs to.
    struct Recording {
        job: usize,
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl StringDecrypter for Recording {
        fn decrypt(&self, value: &str) -> StorageResult<String> {
            self.calls.lock().expect("calls").push(self.job);
            Ok(value.to_string())
        }
    }

    fn store() -> Arc<MemoryNameValueStore> {
        Arc::new(MemoryNameValueStore::with_entries([("k", "v")]))
    }

    #[test]
    fn test_wait_returns_result() {
        let reencrypter = Reencrypter::new();
        let result = reencrypter
            .reencrypt_async(
                store(),
                Arc::new(IdentityTransform),
                Arc::new(IdentityTransform),
                ReencryptionParams::default(),
            )
            .wait()
            .expect("migration");
        assert_eq!(result.total_records, 1);
        assert_eq!(result.failed_records, 0);
    }

    #[tokio::test]
    async fn test_handle_is_awaitable() {
        let reencrypter = Reencrypter::new();
        let store = store();
        let result = reencrypter
            .reencrypt_async(
                store.clone(),
                Arc::new(IdentityTransform),
                Arc::new(IdentityTransform),
                ReencryptionParams::default(),
            )
            .await
            .expect("migration");
        assert_eq!(result.total_records, 1);
        assert_eq!(store.get("k".to_string()).expect("get").as_deref(), Some("v"));
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let reencrypter = Reencrypter::new();
        match reencrypter
            .reencrypt_async(
                store(),
                Arc::new(IdentityTransform),
                Arc::new(Panics),
                ReencryptionParams::default(),
            )
            .wait()
        {
            Err(StorageError::WorkerUnavailable) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }

        let result = reencrypter
            .reencrypt_async(
                store(),
                Arc::new(IdentityTransform),
                Arc::new(IdentityTransform),
                ReencryptionParams::default(),
            )
            .wait()
            .expect("second job");
        assert_eq!(result.total_records, 1);
    }

    #[test]
    fn test_jobs_run_in_submission_order() {
        let reencrypter = Reencrypter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let store = MemoryNameValueStore::with_entries(
                    (0..=i).map(|k| (format!("k{k}"), "v".to_string())),
                );
                reencrypter.reencrypt_async(
                    Arc::new(store),
                    Arc::new(IdentityTransform),
                    Arc::new(Recording {
                        job: i,
                        calls: calls.clone(),
                    }),
                    ReencryptionParams::default(),
                )
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.wait().expect("migration");
            assert_eq!(result.total_records, i as u64 + 1);
        }

        let calls = calls.lock().expect("calls").clone();
        // Sorted means no job started before the previous one finished.
        assert!(calls.windows(2).all(|pair| pair[0] <= pair[1]), "{calls:?}");
        let mut jobs = calls;
        jobs.dedup();
        assert_eq!(jobs, vec![0, 1, 2, 3, 4]);
    }
}
