//! Memoizing, coalescing build cache.
//!
//! At most one build runs per distinct [`ParamKey`]. The first request for a
//! key publishes a pending entry and spawns the build; every request arriving
//! while it runs attaches to that entry and receives the same outcome.
//!
//! Successful artifacts move into a bounded LRU store; pending builds live
//! outside it and so are never evicted. Failures are handed to the waiters of
//! that build and then forgotten, so an identical later request tries again.

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::artifact::Artifact;
use super::error::{BuildError, BuildResult};
use super::key::ParamKey;

/// Default number of ready artifacts kept before LRU eviction kicks in.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

type Outcome = Option<BuildResult<Artifact>>;

/// Lifecycle of a cache-resident entry.
///
/// A failed build never stays resident: its outcome is broadcast and the
/// entry is dropped in the same step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Ready,
}

struct PendingBuild {
    id: u64,
    outcome: watch::Receiver<Outcome>,
    waiters: usize,
    task: AbortHandle,
}

#[derive(Default)]
struct PendingBuilds {
    builds: HashMap<ParamKey, PendingBuild>,
    next_build_id: u64,
}

impl PendingBuilds {
    fn id_of(&self, key: &ParamKey) -> Option<u64> {
        self.builds.get(key).map(|p| p.id)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
}

struct CacheInner {
    /// Guards the pending map. Moves between pending and ready happen while
    /// it is held, so a lookup never misses a key that is changing state.
    pending: Mutex<PendingBuilds>,
    ready: Cache<ParamKey, Artifact>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, PendingBuilds> {
        // The map is left consistent at every unlock, so a poisoned lock is
        // still safe to use.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publishes the outcome of build `id` for `key` and wakes its waiters.
    fn resolve(&self, key: &ParamKey, id: u64, tx: &watch::Sender<Outcome>, outcome: BuildResult<Artifact>) {
        let mut pending = self.lock();
        if pending.id_of(key) == Some(id) {
            pending.builds.remove(key);
            match &outcome {
                Ok(artifact) => self.ready.insert(key.clone(), artifact.clone()),
                Err(_) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        let _ = tx.send(Some(outcome));
    }

    /// One fewer waiter on build `id`; the last one to leave stops the build.
    fn release_waiter(&self, key: &ParamKey, id: u64) {
        let mut pending = self.lock();
        let abandon = match pending.builds.get_mut(key) {
            Some(p) if p.id == id => {
                p.waiters = p.waiters.saturating_sub(1);
                p.waiters == 0
            }
            _ => false,
        };

        if abandon {
            if let Some(p) = pending.builds.remove(key) {
                p.task.abort();
            }
            self.counters.cancellations.fetch_add(1, Ordering::Relaxed);
            warn!("All callers abandoned build {}; cancelling it", key);
        }
    }
}

/// Keeps a waiter counted until it either receives the outcome or is dropped.
struct WaiterGuard {
    inner: Arc<CacheInner>,
    key: ParamKey,
    id: u64,
    armed: bool,
}

impl WaiterGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_waiter(&self.key, self.id);
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: usize,
    pub pending: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub failures: u64,
    pub cancellations: u64,
}

/// Process-lifetime build cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BuildCache {
    inner: Arc<CacheInner>,
}

impl BuildCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let counters = Arc::new(Counters::default());
        let evicted = counters.clone();
        let ready: Cache<ParamKey, Artifact> = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<ParamKey>, _, cause| {
                if cause == RemovalCause::Size {
                    evicted.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!("Evicted cached build {}", key);
                }
            })
            .build();

        Self {
            inner: Arc::new(CacheInner {
                pending: Mutex::new(PendingBuilds::default()),
                ready,
                capacity,
                counters,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the artifact for `key`, running `job` only if no build for the
    /// key is resident or in flight.
    ///
    /// `job` is started on its own task after the pending entry is published,
    /// so it keeps running while at least one caller is still waiting. When
    /// the last waiting caller is dropped the job is aborted.
    pub async fn get_or_build<F, Fut>(&self, key: ParamKey, job: F) -> BuildResult<Artifact>
    where
        F: FnOnce(ParamKey) -> Fut,
        Fut: Future<Output = BuildResult<Artifact>> + Send + 'static,
    {
        if let Some(artifact) = self.hit(&key) {
            return Ok(artifact);
        }

        let (mut rx, id) = {
            let mut pending = self.inner.lock();
            // A build may have finished between the first look and the lock.
            if let Some(artifact) = self.hit(&key) {
                return Ok(artifact);
            }

            match pending.builds.get_mut(&key) {
                Some(p) => {
                    p.waiters += 1;
                    self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    (p.outcome.clone(), p.id)
                }
                None => {
                    pending.next_build_id += 1;
                    let id = pending.next_build_id;
                    let (tx, rx) = watch::channel(None);
                    let task = tokio::spawn(job(key.clone()));
                    let abort = task.abort_handle();
                    tokio::spawn(drive_build(self.inner.clone(), key.clone(), id, tx, task));
                    pending.builds.insert(
                        key.clone(),
                        PendingBuild {
                            id,
                            outcome: rx.clone(),
                            waiters: 1,
                            task: abort,
                        },
                    );
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    (rx, id)
                }
            }
        };

        let guard = WaiterGuard {
            inner: self.inner.clone(),
            key: key.clone(),
            id,
            armed: true,
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(Err(BuildError::Cancelled)),
            Err(_) => Err(BuildError::Cancelled),
        };
        guard.disarm();
        outcome
    }

    fn hit(&self, key: &ParamKey) -> Option<Artifact> {
        let artifact = self.inner.ready.get(key)?;
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!("Cache hit for {}", key);
        Some(artifact)
    }

    /// Cancels an in-flight build. Every waiter on it receives
    /// [`BuildError::Cancelled`]. Returns false if nothing was pending.
    pub fn cancel(&self, key: &ParamKey) -> bool {
        let mut pending = self.inner.lock();
        match pending.builds.remove(key) {
            Some(p) => {
                p.task.abort();
                self.inner.counters.cancellations.fetch_add(1, Ordering::Relaxed);
                warn!("Cancelled build {} with {} waiter(s)", key, p.waiters);
                true
            }
            None => false,
        }
    }

    pub fn state_of(&self, key: &ParamKey) -> Option<EntryState> {
        let pending = self.inner.lock();
        if pending.builds.contains_key(key) {
            Some(EntryState::Pending)
        } else if self.inner.ready.contains_key(key) {
            Some(EntryState::Ready)
        } else {
            None
        }
    }

    /// Drops every ready entry. In-flight builds are left alone.
    pub fn clear(&self) {
        self.inner.ready.invalidate_all();
        self.inner.ready.run_pending_tasks();
    }

    /// Ready plus pending entries. Applies queued evictions first.
    pub fn len(&self) -> usize {
        self.inner.ready.run_pending_tasks();
        let pending = self.inner.lock().builds.len();
        self.inner.ready.entry_count() as usize + pending
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.ready.run_pending_tasks();
        let pending = self.inner.lock().builds.len();
        let c = &self.inner.counters;
        CacheStats {
            capacity: self.inner.capacity,
            entries: self.inner.ready.entry_count() as usize + pending,
            pending,
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            cancellations: c.cancellations.load(Ordering::Relaxed),
        }
    }
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Waits for the job task and publishes exactly one outcome for it, including
/// when the job panicked or was aborted.
async fn drive_build(
    inner: Arc<CacheInner>,
    key: ParamKey,
    id: u64,
    tx: watch::Sender<Outcome>,
    job: JoinHandle<BuildResult<Artifact>>,
) {
    let started = Instant::now();
    let outcome = match job.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!(part = %key.part(), "Build task for {} panicked", key);
            Err(BuildError::infrastructure("build task terminated unexpectedly"))
        }
        Err(_) => Err(BuildError::Cancelled),
    };
    match &outcome {
        Ok(artifact) => info!(
            part = %key.part(),
            fingerprint = %key.fingerprint(),
            bytes = artifact.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Build ready"
        ),
        Err(e) => debug!(part = %key.part(), kind = e.kind(), "Build failed: {}", e),
    }
    inner.resolve(&key, id, &tx, outcome);
}
