//! Asynchronous controller-hash recording.
//!
//! Status-subresource writes identify controllers: a principal that writes
//! an object's status is reconciling it. The admission handler cannot patch
//! the object from inside its own admission (the write is still in flight),
//! so it enqueues a job here and answers immediately. Workers later merge
//! the principal's hash into the object's `kausality.io/controllers`
//! annotation and, for controllers that never publish
//! `status.observedGeneration`, record the synthetic fallback.
//!
//! Jobs are debounced to coalesce bursts, merged with set semantics so the
//! whole path is idempotent, and retried with capped exponential backoff
//! when an optimistic-concurrency write loses a race. Failures never affect
//! any admission response.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::annotations;
use crate::identity::{HashList, hash_principal};
use crate::object::ObjectRef;
use crate::store::{AnnotationPatch, ObjectStore, StoreError};

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Delay between dequeue and processing, to coalesce bursts.
    pub debounce: Duration,
    /// Bound on pending jobs. Over-capacity pushes evict the oldest pending
    /// job for the same object.
    pub queue_capacity: usize,
    /// Retries after the first patch attempt.
    pub max_retries: u32,
    /// Initial backoff, doubled per retry.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Number of worker tasks.
    pub concurrency: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            queue_capacity: 128,
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            concurrency: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    target: ObjectRef,
    principal_hash: String,
    observed_generation: Option<i64>,
}

struct Shared {
    store: Arc<dyn ObjectStore>,
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    config: RecorderConfig,
}

/// Bounded-concurrency worker pool recording controller hashes.
pub struct Recorder {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Recorder {
    /// Creates a recorder and spawns its workers. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: RecorderConfig) -> Self {
        let shared = Arc::new(Shared {
            store,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            config: config.clone(),
        });
        let (shutdown, _) = watch::channel(false);

        let workers = (0..config.concurrency.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        let job = loop {
                            if *shutdown_rx.borrow() {
                                return;
                            }
                            if let Some(job) = shared.queue.lock().unwrap().pop_front() {
                                break job;
                            }
                            tokio::select! {
                                _ = shutdown_rx.changed() => return,
                                () = shared.notify.notified() => {}
                            }
                        };
                        tokio::select! {
                            _ = shutdown_rx.changed() => return,
                            () = process(&shared, job) => {}
                        }
                    }
                })
            })
            .collect();

        Self {
            shared,
            workers,
            shutdown,
        }
    }

    /// Enqueues a controller-hash merge for `target` by `principal`.
    ///
    /// `observed_generation` carries the generation to record as the
    /// synthetic fallback, or `None` when the incoming status already
    /// publishes a real observed generation.
    pub fn record(&self, target: ObjectRef, principal: &str, observed_generation: Option<i64>) {
        let job = Job {
            target,
            principal_hash: hash_principal(principal),
            observed_generation,
        };
        enqueue(
            &mut self.shared.queue.lock().unwrap(),
            job,
            self.shared.config.queue_capacity,
        );
        self.shared.notify.notify_one();
    }

    /// Number of jobs waiting to be processed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Stops the workers. Pending jobs are dropped; the next status write
    /// reattempts the merge.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.shared.notify.notify_waiters();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Queue insertion with coalescing and same-object eviction.
fn enqueue(queue: &mut VecDeque<Job>, job: Job, capacity: usize) {
    // Identical pending work coalesces in place.
    if let Some(existing) = queue
        .iter_mut()
        .find(|j| j.target == job.target && j.principal_hash == job.principal_hash)
    {
        existing.observed_generation = job.observed_generation.or(existing.observed_generation);
        return;
    }

    if queue.len() >= capacity {
        let same_target = queue.iter().position(|j| j.target == job.target);
        match same_target {
            Some(pos) => {
                queue.remove(pos);
            }
            None => {
                let dropped = queue.pop_front();
                tracing::warn!(
                    dropped = ?dropped.map(|j| j.target.name),
                    "controller-hash queue full, dropping oldest job"
                );
            }
        }
    }
    queue.push_back(job);
}

async fn process(shared: &Shared, job: Job) {
    tokio::time::sleep(shared.config.debounce).await;

    let mut backoff = shared.config.base_backoff;
    let attempts = shared.config.max_retries + 1;
    for attempt in 1..=attempts {
        match try_merge(shared, &job).await {
            Ok(()) => return,
            Err(StoreError::Conflict) => {
                tracing::debug!(
                    target = %job.target.name,
                    attempt,
                    "controller-hash patch conflicted, retrying"
                );
            }
            Err(StoreError::Unavailable(detail)) => {
                tracing::debug!(
                    target = %job.target.name,
                    attempt,
                    error = %detail,
                    "controller-hash patch failed, retrying"
                );
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(shared.config.max_backoff);
        }
    }

    tracing::error!(
        kind = %job.target.kind,
        namespace = %job.target.namespace,
        name = %job.target.name,
        "giving up on controller-hash merge; next status write will reattempt"
    );
}

async fn try_merge(shared: &Shared, job: &Job) -> Result<(), StoreError> {
    let Some(current) = shared
        .store
        .get(&job.target.kind, &job.target.namespace, &job.target.name)
        .await?
    else {
        tracing::debug!(
            name = %job.target.name,
            "object gone before controller hash could be recorded"
        );
        return Ok(());
    };

    let mut patch = Vec::new();

    let controllers = current
        .annotation(annotations::CONTROLLERS)
        .map(HashList::parse)
        .unwrap_or_default();
    let mut merged = controllers.clone();
    merged.insert(&job.principal_hash);
    if merged != controllers {
        patch.push(AnnotationPatch::set(annotations::CONTROLLERS, merged.emit()));
    }

    if let Some(generation) = job.observed_generation {
        let value = generation.to_string();
        if current.annotation(annotations::OBSERVED_GENERATION) != Some(value.as_str()) {
            patch.push(AnnotationPatch::set(annotations::OBSERVED_GENERATION, value));
        }
    }

    if patch.is_empty() {
        return Ok(());
    }

    shared.store.patch_annotations(&job.target, &patch).await?;
    tracing::debug!(
        kind = %job.target.kind,
        name = %job.target.name,
        hash = %job.principal_hash,
        "controller hash recorded"
    );
    Ok(())
}
