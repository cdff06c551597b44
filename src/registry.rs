//! The object registry (B): `K -> O`, plus the owner -> owned secondary
//! indices (databases own tables/functions; the auth policy owns
//! principals, each principal owns its privileges).
//!
//! Every mutating method here assumes the caller already holds the global
//! version lock's write side (F.write) and has already obtained the
//! version(s) it is about to assign; the registry itself never calls the
//! version counter, it only records what it is given. This mirrors the
//! separation between component A (Version Counter) and component B
//! (Object Registry) in the system overview.

use crate::delete_log::Tombstone;
use crate::error::{CatalogError, Result};
use crate::payload::{
    CachePoolPayload, DataSourcePayload, DatabasePayload, FunctionPayload, ObjectPayload,
    PrincipalPayload, PrivilegePayload, TombstonePayload, VersionedObject, ViewPayload,
};
use crate::types::{Kind, ObjectKey, Version};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// A value plus the version at which it was last mutated. Used for every
/// non-heavy kind (Database, Function, DataSource, CachePool, Principal,
/// Privilege).
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: Version,
    pub payload: T,
}

/// Mutable state inside a heavy object, guarded by its own reentrant lock.
#[derive(Debug, Clone)]
pub struct HeavyState {
    pub version: Version,
    pub loaded: bool,
    pub payload: ObjectPayload,
}

/// A table or view. The `Arc` is a stable identity handed out by snapshot
/// enumeration under F.read; its interior (`HeavyState`) can keep changing
/// after F is released because mutation is serialized by the object's own
/// lock, not by F (spec §4.4 step 4c re-reads `version(O)` after the
/// snapshot was taken, precisely because it may have changed).
pub struct HeavyEntry {
    pub key: ObjectKey,
    lock: ReentrantMutex<RefCell<HeavyState>>,
}

impl HeavyEntry {
    fn new(key: ObjectKey, version: Version, payload: ObjectPayload) -> Arc<Self> {
        Arc::new(Self {
            key,
            lock: ReentrantMutex::new(RefCell::new(HeavyState {
                version,
                loaded: false,
                payload,
            })),
        })
    }

    pub fn snapshot(&self) -> HeavyState {
        self.lock.lock().borrow().clone()
    }

    pub fn version(&self) -> Version {
        self.lock.lock().borrow().version
    }

    pub fn is_loaded(&self) -> bool {
        self.lock.lock().borrow().loaded
    }

    /// Acquire the object's reentrant lock for the duration of `f`. Safe to
    /// call recursively from a thread that already holds it (e.g. the
    /// delta builder calling back into another accessor while serializing).
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut HeavyState) -> R) -> R {
        let guard = self.lock.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Non-blocking variant used by [`crate::store::CatalogStore::try_lock_object`]:
    /// the canonical primitive takes F.write first and must never then block
    /// indefinitely on the object lock, or a thread already holding the
    /// object lock while waiting on F would deadlock against it.
    pub fn try_with_locked<R>(&self, f: impl FnOnce(&mut HeavyState) -> R) -> Option<R> {
        let guard = self.lock.try_lock()?;
        let mut state = guard.borrow_mut();
        Some(f(&mut state))
    }
}

pub struct DatabaseEntry {
    pub version: Version,
    pub tables: HashMap<String, Arc<HeavyEntry>>,
    pub views: HashMap<String, Arc<HeavyEntry>>,
    pub functions: HashMap<String, Versioned<FunctionPayload>>,
}

pub struct PrincipalEntry {
    pub version: Version,
    pub privileges: HashMap<String, Versioned<PrivilegePayload>>,
}

#[derive(Default)]
pub struct Registry {
    databases: HashMap<String, DatabaseEntry>,
    data_sources: HashMap<String, Versioned<DataSourcePayload>>,
    cache_pools: HashMap<String, Versioned<CachePoolPayload>>,
    principals: HashMap<String, PrincipalEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Databases ----------------------------------------------------

    pub fn add_database(&mut self, name: &str, version: Version) -> Result<()> {
        if self.databases.contains_key(name) {
            return Err(CatalogError::Internal(format!(
                "database '{name}' already exists"
            )));
        }
        self.databases.insert(
            name.to_string(),
            DatabaseEntry {
                version,
                tables: HashMap::new(),
                views: HashMap::new(),
                functions: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Remove a database and cascade-tombstone everything it owns, each
    /// child receiving its own distinct version (assigned via
    /// `next_version`) in this same critical section, so coordinators never
    /// observe a child surviving its parent's removal.
    pub fn remove_database(
        &mut self,
        name: &str,
        next_version: &mut dyn FnMut() -> Version,
    ) -> Result<Vec<Tombstone>> {
        let db = self
            .databases
            .remove(name)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::database(name)))?;

        let mut tombstones = Vec::new();
        for table_name in db.tables.keys() {
            let key = ObjectKey::table(name, table_name);
            tombstones.push(Tombstone {
                payload: TombstonePayload::from(&key),
                key,
                version: next_version(),
            });
        }
        for view_name in db.views.keys() {
            let key = ObjectKey::view(name, view_name);
            tombstones.push(Tombstone {
                payload: TombstonePayload::from(&key),
                key,
                version: next_version(),
            });
        }
        for function_name in db.functions.keys() {
            let key = ObjectKey::function(name, function_name);
            tombstones.push(Tombstone {
                payload: TombstonePayload::from(&key),
                key,
                version: next_version(),
            });
        }

        let db_key = ObjectKey::database(name);
        tombstones.push(Tombstone {
            payload: TombstonePayload::from(&db_key),
            key: db_key,
            version: next_version(),
        });

        Ok(tombstones)
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    pub fn all_databases(&self) -> Vec<VersionedObject> {
        self.databases
            .iter()
            .map(|(name, db)| VersionedObject {
                key: ObjectKey::database(name),
                version: db.version,
                payload: ObjectPayload::Database(DatabasePayload { name: name.clone() }),
                loaded: true,
            })
            .collect()
    }

    fn database(&self, name: &str) -> Result<&DatabaseEntry> {
        self.databases
            .get(name)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::database(name)))
    }

    fn database_mut(&mut self, name: &str) -> Result<&mut DatabaseEntry> {
        self.databases
            .get_mut(name)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::database(name)))
    }

    // -- Tables ---------------------------------------------------------

    /// Create an incomplete shell: `loaded = false`, a fresh per-object
    /// lock, the version the caller already assigned.
    pub fn add_table_shell(
        &mut self,
        db: &str,
        table: &str,
        version: Version,
    ) -> Result<Arc<HeavyEntry>> {
        let key = ObjectKey::table(db, table);
        let entry = HeavyEntry::new(
            key.clone(),
            version,
            ObjectPayload::Table(crate::payload::TablePayload {
                db_name: db.to_string(),
                table_name: table.to_string(),
                columns: Vec::new(),
            }),
        );
        let database = self.database_mut(db)?;
        if database.tables.contains_key(table) {
            return Err(CatalogError::Internal(format!(
                "table '{db}.{table}' already exists"
            )));
        }
        database.tables.insert(table.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub fn remove_table(&mut self, db: &str, table: &str, version: Version) -> Result<Tombstone> {
        let database = self.database_mut(db)?;
        database
            .tables
            .remove(table)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::table(db, table)))?;
        let key = ObjectKey::table(db, table);
        Ok(Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        })
    }

    pub fn get_table_entry(&self, db: &str, table: &str) -> Option<Arc<HeavyEntry>> {
        self.databases.get(db)?.tables.get(table).cloned()
    }

    pub fn table_exists(&self, db: &str, table: &str) -> bool {
        self.databases
            .get(db)
            .map(|d| d.tables.contains_key(table))
            .unwrap_or(false)
    }

    pub fn tables(&self, db: &str) -> Result<Vec<Arc<HeavyEntry>>> {
        Ok(self.database(db)?.tables.values().cloned().collect())
    }

    // -- Views ------------------------------------------------------------

    pub fn add_view_shell(
        &mut self,
        db: &str,
        view: &str,
        definition: String,
        version: Version,
    ) -> Result<Arc<HeavyEntry>> {
        let key = ObjectKey::view(db, view);
        let entry = HeavyEntry::new(
            key,
            version,
            ObjectPayload::View(ViewPayload {
                db_name: db.to_string(),
                view_name: view.to_string(),
                definition,
            }),
        );
        let database = self.database_mut(db)?;
        if database.views.contains_key(view) {
            return Err(CatalogError::Internal(format!(
                "view '{db}.{view}' already exists"
            )));
        }
        database.views.insert(view.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub fn remove_view(&mut self, db: &str, view: &str, version: Version) -> Result<Tombstone> {
        let database = self.database_mut(db)?;
        database
            .views
            .remove(view)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::view(db, view)))?;
        let key = ObjectKey::view(db, view);
        Ok(Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        })
    }

    pub fn get_view_entry(&self, db: &str, view: &str) -> Option<Arc<HeavyEntry>> {
        self.databases.get(db)?.views.get(view).cloned()
    }

    pub fn views(&self, db: &str) -> Result<Vec<Arc<HeavyEntry>>> {
        Ok(self.database(db)?.views.values().cloned().collect())
    }

    // -- Functions --------------------------------------------------------

    pub fn add_function(
        &mut self,
        db: &str,
        function: &str,
        signature: String,
        version: Version,
    ) -> Result<()> {
        let database = self.database_mut(db)?;
        if database.functions.contains_key(function) {
            return Err(CatalogError::Internal(format!(
                "function '{db}.{function}' already exists"
            )));
        }
        database.functions.insert(
            function.to_string(),
            Versioned {
                version,
                payload: FunctionPayload {
                    db_name: db.to_string(),
                    function_name: function.to_string(),
                    signature,
                },
            },
        );
        Ok(())
    }

    pub fn remove_function(&mut self, db: &str, function: &str, version: Version) -> Result<Tombstone> {
        let database = self.database_mut(db)?;
        database
            .functions
            .remove(function)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::function(db, function)))?;
        let key = ObjectKey::function(db, function);
        Ok(Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        })
    }

    pub fn functions(&self, db: &str) -> Result<Vec<VersionedObject>> {
        Ok(self
            .database(db)?
            .functions
            .iter()
            .map(|(_, f)| VersionedObject {
                key: ObjectKey::function(db, &f.payload.function_name),
                version: f.version,
                payload: ObjectPayload::Function(f.payload.clone()),
                loaded: true,
            })
            .collect())
    }

    // -- Data sources -------------------------------------------------------

    pub fn add_data_source(&mut self, name: &str, location: String, version: Version) -> Result<()> {
        if self.data_sources.contains_key(name) {
            return Err(CatalogError::Internal(format!(
                "data source '{name}' already exists"
            )));
        }
        self.data_sources.insert(
            name.to_string(),
            Versioned {
                version,
                payload: DataSourcePayload {
                    name: name.to_string(),
                    location,
                },
            },
        );
        Ok(())
    }

    pub fn remove_data_source(&mut self, name: &str, version: Version) -> Result<Tombstone> {
        self.data_sources
            .remove(name)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::data_source(name)))?;
        let key = ObjectKey::data_source(name);
        Ok(Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        })
    }

    pub fn data_sources(&self) -> Vec<VersionedObject> {
        self.data_sources
            .values()
            .map(|v| VersionedObject {
                key: ObjectKey::data_source(&v.payload.name),
                version: v.version,
                payload: ObjectPayload::DataSource(v.payload.clone()),
                loaded: true,
            })
            .collect()
    }

    // -- HDFS cache pools ----------------------------------------------------

    pub fn upsert_cache_pool(&mut self, name: &str, version: Version) {
        self.cache_pools.insert(
            name.to_string(),
            Versioned {
                version,
                payload: CachePoolPayload {
                    name: name.to_string(),
                },
            },
        );
    }

    pub fn remove_cache_pool(&mut self, name: &str, version: Version) -> Result<Tombstone> {
        self.cache_pools
            .remove(name)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::cache_pool(name)))?;
        let key = ObjectKey::cache_pool(name);
        Ok(Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        })
    }

    pub fn cache_pool_names(&self) -> Vec<String> {
        self.cache_pools.keys().cloned().collect()
    }

    pub fn cache_pools(&self) -> Vec<VersionedObject> {
        self.cache_pools
            .values()
            .map(|v| VersionedObject {
                key: ObjectKey::cache_pool(&v.payload.name),
                version: v.version,
                payload: ObjectPayload::CachePool(v.payload.clone()),
                loaded: true,
            })
            .collect()
    }

    // -- Principals & privileges ---------------------------------------------

    pub fn add_principal(&mut self, name: &str, version: Version) -> Result<()> {
        if self.principals.contains_key(name) {
            return Err(CatalogError::Internal(format!(
                "principal '{name}' already exists"
            )));
        }
        self.principals.insert(
            name.to_string(),
            PrincipalEntry {
                version,
                privileges: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn remove_principal(
        &mut self,
        name: &str,
        next_version: &mut dyn FnMut() -> Version,
    ) -> Result<Vec<Tombstone>> {
        let principal = self
            .principals
            .remove(name)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::principal(name)))?;

        let mut tombstones = Vec::new();
        for privilege_name in principal.privileges.keys() {
            let key = ObjectKey::privilege(name, privilege_name);
            tombstones.push(Tombstone {
                payload: TombstonePayload::from(&key),
                key,
                version: next_version(),
            });
        }
        let principal_key = ObjectKey::principal(name);
        tombstones.push(Tombstone {
            payload: TombstonePayload::from(&principal_key),
            key: principal_key,
            version: next_version(),
        });
        Ok(tombstones)
    }

    pub fn principals(&self) -> Vec<VersionedObject> {
        self.principals
            .iter()
            .map(|(name, p)| VersionedObject {
                key: ObjectKey::principal(name),
                version: p.version,
                payload: ObjectPayload::Principal(PrincipalPayload { name: name.clone() }),
                loaded: true,
            })
            .collect()
    }

    pub fn add_privilege(
        &mut self,
        principal: &str,
        privilege: &str,
        version: Version,
    ) -> Result<()> {
        let entry = self
            .principals
            .get_mut(principal)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::principal(principal)))?;
        entry.privileges.insert(
            privilege.to_string(),
            Versioned {
                version,
                payload: PrivilegePayload {
                    principal: principal.to_string(),
                    privilege: privilege.to_string(),
                },
            },
        );
        Ok(())
    }

    pub fn remove_privilege(
        &mut self,
        principal: &str,
        privilege: &str,
        version: Version,
    ) -> Result<Tombstone> {
        let entry = self
            .principals
            .get_mut(principal)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::principal(principal)))?;
        entry
            .privileges
            .remove(privilege)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::privilege(principal, privilege)))?;
        let key = ObjectKey::privilege(principal, privilege);
        Ok(Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        })
    }

    pub fn privileges(&self, principal: &str) -> Result<Vec<VersionedObject>> {
        Ok(self
            .principals
            .get(principal)
            .ok_or_else(|| CatalogError::NotFound(ObjectKey::principal(principal)))?
            .privileges
            .values()
            .map(|v| VersionedObject {
                key: ObjectKey::privilege(principal, &v.payload.privilege),
                version: v.version,
                payload: ObjectPayload::Privilege(v.payload.clone()),
                loaded: true,
            })
            .collect())
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    /// Tombstone every live object in the registry (every database cascade,
    /// every data source, every cache pool, every principal cascade), in
    /// one pass. Used by [`crate::store::CatalogStore::reset`] to force a
    /// full catalog re-sync ("Reset/invalidate-all" support).
    pub fn reset(&mut self, next_version: &mut dyn FnMut() -> Version) -> Vec<Tombstone> {
        let mut tombstones = Vec::new();

        for db_name in self.database_names() {
            tombstones.extend(
                self.remove_database(&db_name, next_version)
                    .expect("database just listed must still exist"),
            );
        }
        for name in self.data_sources.keys().cloned().collect::<Vec<_>>() {
            tombstones.push(
                self.remove_data_source(&name, next_version())
                    .expect("data source just listed must still exist"),
            );
        }
        for name in self.cache_pools.keys().cloned().collect::<Vec<_>>() {
            tombstones.push(
                self.remove_cache_pool(&name, next_version())
                    .expect("cache pool just listed must still exist"),
            );
        }
        for name in self.principals.keys().cloned().collect::<Vec<_>>() {
            tombstones.extend(
                self.remove_principal(&name, next_version)
                    .expect("principal just listed must still exist"),
            );
        }

        tombstones
    }

    /// Every table/view handle currently live, across all databases. Used
    /// by the delta builder to enumerate heavy objects without needing to
    /// know the database list up front (§4.4 step 2).
    pub fn all_heavy_entries(&self) -> Vec<Arc<HeavyEntry>> {
        self.databases
            .values()
            .flat_map(|db| db.tables.values().chain(db.views.values()).cloned())
            .collect()
    }

    /// Every non-heavy live object: databases, functions, data sources,
    /// cache pools, principals, and privileges.
    pub fn all_light_objects(&self) -> Vec<VersionedObject> {
        let mut objects = self.all_databases();
        for db_name in self.databases.keys() {
            objects.extend(self.functions(db_name).unwrap_or_default());
        }
        objects.extend(self.data_sources());
        objects.extend(self.cache_pools());
        objects.extend(self.principals());
        for principal_name in self.principals.keys() {
            objects.extend(self.privileges(principal_name).unwrap_or_default());
        }
        objects
    }

    pub fn kind_exists(&self, key: &ObjectKey) -> bool {
        match key.kind() {
            Kind::Database => self.databases.contains_key(key.scoped_name()),
            Kind::Table => key
                .db_and_local_name()
                .map(|(db, t)| self.table_exists(db, t))
                .unwrap_or(false),
            Kind::View => key
                .db_and_local_name()
                .map(|(db, v)| self.get_view_entry(db, v).is_some())
                .unwrap_or(false),
            _ => false,
        }
    }
}
