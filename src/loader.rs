//! The table loader (I): a bounded worker-thread pool that turns
//! unloaded table/view shells into fully materialized objects, backed by a
//! priority queue deduplicated by key. Uses a background-thread-plus-
//! channel shape but fans out over a pool rather than a single writer,
//! since loads are independent and parallelizable (§4.6).

use crate::error::{CatalogError, Result};
use crate::payload::{ObjectPayload, TablePayload, ViewPayload};
use crate::registry::HeavyEntry;
use crate::store::CatalogStore;
use crate::types::{Kind, ObjectKey};
use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{instrument, warn};

/// Southbound: how the loader fetches a table/view's real contents.
/// Out of scope: the Hive Metastore Thrift schema itself (Non-goals).
pub trait MetastoreClient: Send + Sync {
    fn load_table(&self, db: &str, table: &str) -> Result<TablePayload>;
    fn load_view(&self, db: &str, view: &str) -> Result<ViewPayload>;
}

/// Background-load priority. Higher sorts first.
pub type Priority = i64;

pub const PRIORITY_BACKGROUND: Priority = 0;
pub const PRIORITY_FOREGROUND: Priority = 100;

#[derive(Debug, Clone, Eq, PartialEq)]
struct Task {
    priority: Priority,
    seq: u64,
    key: ObjectKey,
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on priority; among equal priorities, smaller seq (older
        // request) wins, so reverse the seq comparison.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct LoaderMetrics {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    loaded_total: AtomicU64,
    failed_total: AtomicU64,
}

struct State {
    heap: BinaryHeap<Task>,
    /// Current authoritative priority for each queued (not yet started)
    /// key; a popped `Task` whose priority doesn't match is a stale
    /// duplicate left behind by [`TableLoader::prioritize`] and is
    /// discarded without doing any work.
    queued: HashMap<ObjectKey, Priority>,
    in_flight: std::collections::HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, CatalogError>,
    next_seq: u64,
    shutdown: bool,
}

/// The table loader (component I).
pub struct TableLoader {
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<LoaderMetrics>,
}

impl TableLoader {
    pub fn new(store: Arc<CatalogStore>, client: Arc<dyn MetastoreClient>, num_threads: usize) -> Self {
        let state = Arc::new(Mutex::new(State {
            heap: BinaryHeap::new(),
            queued: HashMap::new(),
            in_flight: std::collections::HashSet::new(),
            failures: HashMap::new(),
            next_seq: 0,
            shutdown: false,
        }));
        let cv = Arc::new(Condvar::new());
        let metrics = Arc::new(LoaderMetrics::default());

        let mut workers = Vec::with_capacity(num_threads);
        for idx in 0..num_threads {
            let store = Arc::clone(&store);
            let client = Arc::clone(&client);
            let state = Arc::clone(&state);
            let cv = Arc::clone(&cv);
            let metrics = Arc::clone(&metrics);
            let handle = std::thread::Builder::new()
                .name(format!("catalog-loader-{idx}"))
                .spawn(move || worker_loop(store, client, state, cv, metrics))
                .expect("failed to spawn loader worker thread");
            workers.push(handle);
        }

        Self {
            state,
            cv,
            workers,
            metrics,
        }
    }

    fn enqueue(&self, key: ObjectKey, priority: Priority) {
        let mut state = self.state.lock();
        if state.in_flight.contains(&key) {
            return;
        }
        let bumped = state
            .queued
            .get(&key)
            .map(|&p| p.max(priority))
            .unwrap_or(priority);
        state.queued.insert(key.clone(), bumped);
        state.next_seq += 1;
        let seq = state.next_seq;
        state.heap.push(Task {
            priority: bumped,
            seq,
            key,
        });
        self.metrics.queued.store(state.queued.len(), Ordering::Relaxed);
        self.cv.notify_all();
    }

    /// Queue a load without blocking the caller (§4.6, `load_async`).
    #[instrument(skip(self))]
    pub fn load_async(&self, key: ObjectKey) {
        self.enqueue(key, PRIORITY_FOREGROUND);
    }

    /// Queue a load at background priority, used by the periodic sweep
    /// that keeps shells from sitting unloaded forever when
    /// `load_in_background` is enabled.
    #[instrument(skip(self))]
    pub fn background_load(&self, key: ObjectKey) {
        self.enqueue(key, PRIORITY_BACKGROUND);
    }

    /// Bump an already-queued key to foreground priority. A no-op if the
    /// key isn't queued (already loading, already loaded, or never
    /// requested).
    #[instrument(skip(self))]
    pub fn prioritize(&self, key: &ObjectKey) {
        let mut state = self.state.lock();
        if let Some(priority) = state.queued.get_mut(key) {
            *priority = PRIORITY_FOREGROUND;
            state.next_seq += 1;
            let seq = state.next_seq;
            state.heap.push(Task {
                priority: PRIORITY_FOREGROUND,
                seq,
                key: key.clone(),
            });
        }
    }

    /// Load `key` synchronously if it isn't already loaded: queues it at
    /// foreground priority and blocks the caller until a worker finishes
    /// it (or fails it).
    #[instrument(skip(self))]
    pub fn get_or_load(&self, entry: &Arc<HeavyEntry>) -> Result<()> {
        if entry.is_loaded() {
            return Ok(());
        }
        let key = entry.key.clone();
        self.enqueue(key.clone(), PRIORITY_FOREGROUND);

        let mut state = self.state.lock();
        loop {
            if entry.is_loaded() {
                return Ok(());
            }
            if let Some(err) = state.failures.remove(&key) {
                return Err(err);
            }
            let still_pending = state.queued.contains_key(&key) || state.in_flight.contains(&key);
            if !still_pending {
                // The task ran to completion with no recorded failure, yet
                // the shell is still unloaded: a concurrent invalidation
                // bumped its version between the fetch and the commit, so
                // `replace_if_unchanged` was a no-op and discarded the now-
                // stale fetched payload (the "load race" scenario). That is
                // not a loader failure, the caller gets back the current,
                // still-incomplete shell rather than an error.
                return Ok(());
            }
            self.cv.wait(&mut state);
        }
    }

    pub fn metrics(&self) -> (usize, usize, u64, u64) {
        (
            self.metrics.queued.load(Ordering::Relaxed),
            self.metrics.in_flight.load(Ordering::Relaxed),
            self.metrics.loaded_total.load(Ordering::Relaxed),
            self.metrics.failed_total.load(Ordering::Relaxed),
        )
    }
}

impl Drop for TableLoader {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
        }
        self.cv.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("catalog loader worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(
    store: Arc<CatalogStore>,
    client: Arc<dyn MetastoreClient>,
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    metrics: Arc<LoaderMetrics>,
) {
    loop {
        let task = {
            let mut guard = state.lock();
            loop {
                if guard.shutdown && guard.heap.is_empty() {
                    return;
                }
                match guard.heap.pop() {
                    None => {
                        cv.wait(&mut guard);
                    }
                    Some(task) => {
                        let still_current = guard.queued.get(&task.key) == Some(&task.priority);
                        if !still_current {
                            continue;
                        }
                        guard.queued.remove(&task.key);
                        guard.in_flight.insert(task.key.clone());
                        metrics.queued.store(guard.queued.len(), Ordering::Relaxed);
                        metrics.in_flight.store(guard.in_flight.len(), Ordering::Relaxed);
                        break task;
                    }
                }
            }
        };

        let result = load_one(&store, client.as_ref(), &task.key);

        {
            let mut guard = state.lock();
            guard.in_flight.remove(&task.key);
            metrics.in_flight.store(guard.in_flight.len(), Ordering::Relaxed);
            match result {
                Ok(()) => {
                    metrics.loaded_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    metrics.failed_total.fetch_add(1, Ordering::Relaxed);
                    guard.failures.insert(task.key.clone(), err);
                }
            }
        }
        cv.notify_all();
    }
}

fn load_one(store: &CatalogStore, client: &dyn MetastoreClient, key: &ObjectKey) -> Result<()> {
    let (db, local) = key
        .db_and_local_name()
        .ok_or_else(|| CatalogError::Internal(format!("{key} has no db-scoped name")))?;

    let entry = match key.kind() {
        Kind::Table => store
            .table_entry(db, local)
            .ok_or_else(|| CatalogError::NotFound(key.clone()))?,
        Kind::View => store
            .view_entry(db, local)
            .ok_or_else(|| CatalogError::NotFound(key.clone()))?,
        other => {
            return Err(CatalogError::Internal(format!(
                "table loader cannot load kind {other}"
            )))
        }
    };

    let expected = entry.version();
    let fetched: ObjectPayload = match key.kind() {
        Kind::Table => ObjectPayload::Table(client.load_table(db, local).map_err(|e| {
            CatalogError::LoadFailed {
                key: key.clone(),
                cause: e.to_string(),
            }
        })?),
        Kind::View => ObjectPayload::View(client.load_view(db, local).map_err(|e| {
            CatalogError::LoadFailed {
                key: key.clone(),
                cause: e.to_string(),
            }
        })?),
        _ => unreachable!(),
    };

    store.replace_if_unchanged(&entry, expected, move |payload| {
        *payload = fetched;
    })?;
    Ok(())
}
