//! The catalog store: component A (version counter) and component F (the
//! fair global lock) wrapped around component B (registry) and component C
//! (delete log). This is the thread-safe front door every other component
//! calls through; it never exposes a bare `&mut Registry`.

use crate::delete_log::{DeleteLog, Tombstone};
use crate::error::{CatalogError, Result};
use crate::registry::{HeavyEntry, Registry};
use crate::types::{ObjectKey, Version};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Everything guarded jointly by F: the counter, the registry, the delete
/// log. The topic update log (D) is intentionally *not* part of this
/// struct: it has its own lock and its own notification discipline.
struct Inner {
    counter: Version,
    registry: Registry,
    delete_log: DeleteLog,
}

impl Inner {
    fn next_version(&mut self) -> Version {
        self.counter += 1;
        self.counter
    }
}

/// Components A, B, C, F combined behind one fair `RwLock`.
pub struct CatalogStore {
    inner: RwLock<Inner>,
}

/// A read-only view taken under F.read, released before the caller does any
/// further work: mirrors the delta builder's step 1 ("sample an upper
/// bound under a brief read lock, then work outside the lock").
pub struct Snapshot {
    pub version: Version,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                counter: crate::types::NO_VERSION,
                registry: Registry::new(),
                delete_log: DeleteLog::new(),
            }),
        }
    }

    /// Component A read: the current version, without taking any object
    /// out of the registry. Analogous to `TransactionManager`'s
    /// `global_version` read.
    pub fn current_version(&self) -> Version {
        self.inner.read().counter
    }

    /// Take a brief F.read snapshot of the upper bound a topic update may
    /// publish up to (§4.4 step 1).
    #[instrument(skip(self))]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.inner.read().counter,
        }
    }

    /// Run `f` with exclusive (F.write) access to the registry and delete
    /// log, returning whatever tombstones it produced plus its own result.
    /// Every DDL-shaped mutation funnels through here so that "assign a
    /// version, mutate the registry, append tombstones" is always one
    /// atomic section (invariant I1/I2).
    fn with_write<R>(&self, f: impl FnOnce(&mut Inner) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.write();
        f(&mut inner)
    }

    #[instrument(skip(self))]
    pub fn create_database(&self, name: &str) -> Result<Version> {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.add_database(name, version)?;
            Ok(version)
        })
    }

    /// Cascading remove (§4.2): tombstones every table, view, and function
    /// the database owns, then the database itself, each with its own
    /// version, all inside one F.write section.
    #[instrument(skip(self))]
    pub fn drop_database(&self, name: &str) -> Result<Vec<Tombstone>> {
        self.with_write(|inner| {
            let tombstones = {
                let counter = &mut inner.counter;
                let mut next = move || {
                    *counter += 1;
                    *counter
                };
                inner.registry.remove_database(name, &mut next)?
            };
            for t in &tombstones {
                inner.delete_log.push(t.clone());
            }
            Ok(tombstones)
        })
    }

    #[instrument(skip(self, columns))]
    pub fn create_table(&self, db: &str, table: &str, columns: Vec<String>) -> Result<Arc<HeavyEntry>> {
        self.with_write(|inner| {
            let version = inner.next_version();
            let entry = inner.registry.add_table_shell(db, table, version)?;
            entry.with_locked(|state| {
                if let crate::payload::ObjectPayload::Table(t) = &mut state.payload {
                    t.columns = columns;
                }
            });
            Ok(entry)
        })
    }

    #[instrument(skip(self))]
    pub fn drop_table(&self, db: &str, table: &str) -> Result<Tombstone> {
        self.with_write(|inner| {
            let version = inner.next_version();
            let tombstone = inner.registry.remove_table(db, table, version)?;
            inner.delete_log.push(tombstone.clone());
            Ok(tombstone)
        })
    }

    #[instrument(skip(self, definition))]
    pub fn create_view(&self, db: &str, view: &str, definition: String) -> Result<Arc<HeavyEntry>> {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.add_view_shell(db, view, definition, version)
        })
    }

    #[instrument(skip(self))]
    pub fn drop_view(&self, db: &str, view: &str) -> Result<Tombstone> {
        self.with_write(|inner| {
            let version = inner.next_version();
            let tombstone = inner.registry.remove_view(db, view, version)?;
            inner.delete_log.push(tombstone.clone());
            Ok(tombstone)
        })
    }

    #[instrument(skip(self, signature))]
    pub fn create_function(&self, db: &str, function: &str, signature: String) -> Result<Version> {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.add_function(db, function, signature, version)?;
            Ok(version)
        })
    }

    #[instrument(skip(self))]
    pub fn drop_function(&self, db: &str, function: &str) -> Result<Tombstone> {
        self.with_write(|inner| {
            let version = inner.next_version();
            let tombstone = inner.registry.remove_function(db, function, version)?;
            inner.delete_log.push(tombstone.clone());
            Ok(tombstone)
        })
    }

    /// Rename is remove-then-add in a single F.write section (§4.2,
    /// "rename atomicity", invariant P6/S6): no observer can see the old
    /// name gone without the new name already present, or vice versa.
    #[instrument(skip(self))]
    pub fn rename_table(&self, db: &str, old: &str, new_db: &str, new: &str) -> Result<(Tombstone, Arc<HeavyEntry>)> {
        self.with_write(|inner| {
            let columns = inner
                .registry
                .get_table_entry(db, old)
                .ok_or_else(|| CatalogError::NotFound(ObjectKey::table(db, old)))?
                .snapshot();
            let columns = match columns.payload {
                crate::payload::ObjectPayload::Table(t) => t.columns,
                _ => Vec::new(),
            };

            let remove_version = inner.next_version();
            let tombstone = inner.registry.remove_table(db, old, remove_version)?;
            inner.delete_log.push(tombstone.clone());

            let add_version = inner.next_version();
            let entry = inner.registry.add_table_shell(new_db, new, add_version)?;
            entry.with_locked(|state| {
                if let crate::payload::ObjectPayload::Table(t) = &mut state.payload {
                    t.columns = columns;
                }
                state.loaded = true;
            });

            Ok((tombstone, entry))
        })
    }

    #[instrument(skip(self, location))]
    pub fn create_data_source(&self, name: &str, location: String) -> Result<Version> {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.add_data_source(name, location, version)?;
            Ok(version)
        })
    }

    /// Upsert a single HDFS cache pool observed by the most recent poll.
    /// Cache pools are not heavy: a reconciliation pass just bumps the
    /// version unconditionally rather than comparing contents.
    #[instrument(skip(self))]
    pub fn upsert_cache_pool(&self, name: &str) -> Version {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.upsert_cache_pool(name, version);
            Ok(version)
        })
        .expect("upsert_cache_pool never fails")
    }

    #[instrument(skip(self))]
    pub fn remove_cache_pool(&self, name: &str) -> Result<Tombstone> {
        self.with_write(|inner| {
            let version = inner.next_version();
            let tombstone = inner.registry.remove_cache_pool(name, version)?;
            inner.delete_log.push(tombstone.clone());
            Ok(tombstone)
        })
    }

    pub fn cache_pool_names(&self) -> Vec<String> {
        self.inner.read().registry.cache_pool_names()
    }

    #[instrument(skip(self))]
    pub fn create_principal(&self, name: &str) -> Result<Version> {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.add_principal(name, version)?;
            Ok(version)
        })
    }

    /// Cascading remove, same shape as [`Self::drop_database`]: every
    /// privilege the principal holds is tombstoned alongside it, in the
    /// same F.write section.
    #[instrument(skip(self))]
    pub fn drop_principal(&self, name: &str) -> Result<Vec<Tombstone>> {
        self.with_write(|inner| {
            let tombstones = {
                let counter = &mut inner.counter;
                let mut next = move || {
                    *counter += 1;
                    *counter
                };
                inner.registry.remove_principal(name, &mut next)?
            };
            for t in &tombstones {
                inner.delete_log.push(t.clone());
            }
            Ok(tombstones)
        })
    }

    #[instrument(skip(self))]
    pub fn grant_privilege(&self, principal: &str, privilege: &str) -> Result<Version> {
        self.with_write(|inner| {
            let version = inner.next_version();
            inner.registry.add_privilege(principal, privilege, version)?;
            Ok(version)
        })
    }

    #[instrument(skip(self))]
    pub fn revoke_privilege(&self, principal: &str, privilege: &str) -> Result<Tombstone> {
        self.with_write(|inner| {
            let version = inner.next_version();
            let tombstone = inner.registry.remove_privilege(principal, privilege, version)?;
            inner.delete_log.push(tombstone.clone());
            Ok(tombstone)
        })
    }

    /// Force a full catalog re-sync: tombstone every live object in one
    /// F.write section ("Reset/invalidate-all" support). Callers
    /// that also need a fresh `service_id` should follow this with
    /// [`crate::delta::DeltaBuilder::bump_service_id`].
    #[instrument(skip(self))]
    pub fn reset(&self) -> Vec<Tombstone> {
        self.with_write(|inner| {
            let tombstones = {
                let counter = &mut inner.counter;
                let mut next = move || {
                    *counter += 1;
                    *counter
                };
                inner.registry.reset(&mut next)
            };
            for t in &tombstones {
                inner.delete_log.push(t.clone());
            }
            Ok(tombstones)
        })
        .expect("reset never fails")
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.inner.read().registry.database_exists(name)
    }

    pub fn table_entry(&self, db: &str, table: &str) -> Option<Arc<HeavyEntry>> {
        self.inner.read().registry.get_table_entry(db, table)
    }

    pub fn view_entry(&self, db: &str, view: &str) -> Option<Arc<HeavyEntry>> {
        self.inner.read().registry.get_view_entry(db, view)
    }

    /// Snapshot every live object as of right now (§4.4 step 2). Cheap
    /// clones of `Arc<HeavyEntry>` for heavy kinds; owned payload clones for
    /// the rest.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.inner.read().registry)
    }

    pub fn retrieve_tombstones(&self, from_v: Version, to_v: Version) -> Vec<Tombstone> {
        self.inner.read().delete_log.retrieve(from_v, to_v)
    }

    pub fn gc_delete_log(&self, up_to: Version) {
        self.inner.write().delete_log.gc(up_to);
    }

    /// Canonical primitive for component E (§4.5): acquire F.write first,
    /// then the object's own lock, retrying until `timeout` elapses. Taking
    /// F before the object lock (never the reverse) is what rules out the
    /// deadlock class described in the per-object-lock design.
    #[instrument(skip(self, f))]
    pub fn try_lock_object<R>(
        &self,
        entry: &Arc<HeavyEntry>,
        timeout: Duration,
        retry: Duration,
        f: impl FnOnce(&mut crate::registry::HeavyState) -> R,
    ) -> Result<R> {
        let deadline = Instant::now() + timeout;
        let mut f = Some(f);
        loop {
            let result = {
                let _guard = self.inner.write();
                entry.try_with_locked(|state| (f.take().expect("called at most once"))(state))
            };
            if let Some(value) = result {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(CatalogError::LockTimeout(entry.key.clone()));
            }
            std::thread::sleep(retry.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Compare-and-swap-by-version commit used by the table loader (§4.6):
    /// applies `apply` only if the object's version still equals
    /// `expected`, otherwise reports the conflict without mutating. A
    /// successful commit assigns a freshly minted version from the counter
    /// (F.write, not F.read), exactly like every other mutation, so the
    /// newly-loaded payload republishes on the next delta round instead of
    /// being mistaken for already covered by its shell's old version.
    #[instrument(skip(self, apply))]
    pub fn replace_if_unchanged(
        &self,
        entry: &Arc<HeavyEntry>,
        expected: Version,
        apply: impl FnOnce(&mut crate::payload::ObjectPayload),
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(entry.with_locked(|state| {
            if state.version != expected {
                return false;
            }
            let new_version = inner.next_version();
            apply(&mut state.payload);
            state.version = new_version;
            state.loaded = true;
            true
        }))
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
