//! An in-memory, versioned catalog cache: the authoritative metadata store
//! for a distributed query engine's coordinators.
//!
//! A single [`Catalog`] wraps the version counter and object registry
//! (behind a fair global lock), the delete log, the topic update log, the
//! table loader, the SYNC_DDL barrier, and the partial fetch gate (the
//! components described in the data model and component-design sections).
//! None of this talks to a real Hive Metastore or HDFS NameNode; southbound
//! access is behind the [`loader::MetastoreClient`] and [`hdfs::HdfsClient`]
//! traits so a caller can plug in whatever backs those protocols.

pub mod config;
pub mod delete_log;
pub mod delta;
pub mod error;
pub mod gate;
pub mod hdfs;
pub mod loader;
pub mod payload;
pub mod registry;
pub mod store;
pub mod sync_ddl;
pub mod topic_log;
pub mod types;

pub mod prelude {
    pub use crate::config::{Config, TopicMode};
    pub use crate::error::{CatalogError, Result};
    pub use crate::payload::{ObjectPayload, PublishRecord, VersionedObject};
    pub use crate::types::{Kind, ObjectKey, Version};
    pub use crate::Catalog;
}

use crate::config::Config;
use crate::delta::{DeltaBuilder, PublishSink};
use crate::error::Result;
use crate::gate::PartialFetchGate;
use crate::hdfs::{CachePoolPoller, HdfsClient};
use crate::loader::{MetastoreClient, TableLoader};
use crate::registry::{HeavyEntry, Registry};
use crate::store::CatalogStore;
use crate::sync_ddl::{PendingUpdate, SyncDdlBarrier};
use crate::topic_log::TopicUpdateLog;
use crate::types::{ObjectKey, Version};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Everything wired together as one system: the store (A/B/C/F), the topic
/// update log (D), the per-object locking discipline (E) exposed through
/// the store, the delta builder (G), the SYNC_DDL barrier (H), the table
/// loader (I), and the partial fetch gate (J).
pub struct Catalog {
    store: Arc<CatalogStore>,
    topic_log: Arc<TopicUpdateLog>,
    delta_builder: Arc<DeltaBuilder>,
    sync_ddl: SyncDdlBarrier,
    loader: TableLoader,
    gate: PartialFetchGate,
    config: Config,
    service_id: u64,
    builder_thread: Option<JoinHandle<()>>,
    builder_shutdown: Arc<AtomicBool>,
    cache_pool_poller: Option<CachePoolPoller>,
}

/// A process-lifetime-stable, restart-distinct identity for the terminal
/// `CATALOG` record ("Service identity" support). Mixes a stack
/// address (ASLR typically places the stack differently across runs) with
/// the OS process id and a process-local call counter, so two calls in the
/// same process never collide and two different runs collide only in the
/// astronomically unlikely case both share the same address, pid, and call
/// count. Deliberately avoids a wall-clock read or an RNG dependency: this
/// only needs "probably different from last time", not cryptographic
/// uniqueness.
fn generate_service_id() -> u64 {
    static CALLS: AtomicU64 = AtomicU64::new(0);
    let stack_marker = 0u8;
    let addr = std::ptr::addr_of!(stack_marker) as u64;
    let pid = std::process::id() as u64;
    let call = CALLS.fetch_add(1, Ordering::Relaxed);
    addr.wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(pid)
        .wrapping_add(call.wrapping_mul(0xBF58476D1CE4E5B9))
}

impl Catalog {
    /// Construct a catalog and start its background delta-builder thread
    /// (single-threaded, per §5) and its loader worker pool. The terminal
    /// `CATALOG` record's `service_id` is generated here and stays stable
    /// for this `Catalog`'s lifetime.
    pub fn start(
        config: Config,
        metastore: Arc<dyn MetastoreClient>,
        sink: Arc<dyn PublishSink>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(crate::error::CatalogError::Internal)?;

        let service_id = generate_service_id();
        let store = Arc::new(CatalogStore::new());
        let topic_log = Arc::new(TopicUpdateLog::new());
        let delta_builder = Arc::new(DeltaBuilder::new(
            Arc::clone(&store),
            Arc::clone(&topic_log),
            sink,
            config.clone(),
            service_id,
        ));
        let sync_ddl = SyncDdlBarrier::new(Arc::clone(&topic_log), config.max_skipped_topic_updates);
        let loader = TableLoader::new(Arc::clone(&store), metastore, config.num_loading_threads);
        let gate = PartialFetchGate::new(config.max_parallel_partial_fetch);

        let builder_shutdown = Arc::new(AtomicBool::new(false));
        let builder_thread = {
            let builder = Arc::clone(&delta_builder);
            let shutdown = Arc::clone(&builder_shutdown);
            Some(
                std::thread::Builder::new()
                    .name("catalog-delta-builder".to_string())
                    .spawn(move || builder.run_forever(Duration::from_millis(50), shutdown.as_ref()))
                    .expect("failed to spawn delta builder thread"),
            )
        };

        Ok(Self {
            store,
            topic_log,
            delta_builder,
            sync_ddl,
            loader,
            gate,
            config,
            service_id,
            builder_thread,
            builder_shutdown,
            cache_pool_poller: None,
        })
    }

    /// Start the background HDFS cache-pool reconciliation loop. Optional: a
    /// deployment with no cache pools configured need not call this.
    pub fn start_cache_pool_polling(&mut self, client: Arc<dyn HdfsClient>, interval: Duration) {
        self.cache_pool_poller = Some(CachePoolPoller::spawn(Arc::clone(&self.store), client, interval));
    }

    pub fn service_id(&self) -> u64 {
        self.service_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn create_database(&self, name: &str) -> Result<Version> {
        self.store.create_database(name)
    }

    pub fn drop_database(&self, name: &str) -> Result<()> {
        self.store.drop_database(name)?;
        Ok(())
    }

    pub fn create_table(&self, db: &str, table: &str, columns: Vec<String>) -> Result<Arc<HeavyEntry>> {
        self.store.create_table(db, table, columns)
    }

    pub fn drop_table(&self, db: &str, table: &str) -> Result<()> {
        self.store.drop_table(db, table)?;
        Ok(())
    }

    pub fn rename_table(&self, db: &str, old: &str, new_db: &str, new: &str) -> Result<()> {
        self.store.rename_table(db, old, new_db, new)?;
        Ok(())
    }

    /// Block until `table`/`view` is fully loaded, kicking off a
    /// foreground load if it's still a shell (§4.6, `get_or_load`).
    pub fn get_or_load_table(&self, db: &str, table: &str) -> Result<Arc<HeavyEntry>> {
        let entry = self
            .store
            .table_entry(db, table)
            .ok_or_else(|| crate::error::CatalogError::NotFound(ObjectKey::table(db, table)))?;
        self.loader.get_or_load(&entry)?;
        Ok(entry)
    }

    pub fn prioritize_load(&self, key: &ObjectKey) {
        self.loader.prioritize(key);
    }

    pub fn background_load(&self, key: ObjectKey) {
        self.loader.background_load(key);
    }

    /// Acquire a partial-fetch permit (component J), independent of the
    /// global version lock.
    pub fn acquire_partial_fetch(&self) -> Result<gate::Permit<'_>> {
        self.gate.acquire(self.config.partial_fetch_queue_timeout)
    }

    /// Run one delta-builder round immediately, outside its normal
    /// schedule. Primarily for tests and for callers that want to force a
    /// flush before shutting down.
    pub fn flush_delta(&self) -> Option<delta::BuildSummary> {
        self.delta_builder.build_once()
    }

    /// Block until every listed update is covered by a published topic
    /// (component H).
    pub fn wait_for_sync_ddl(&self, updates: &[PendingUpdate]) -> Result<()> {
        self.sync_ddl
            .wait_for_coverage(updates, self.config.table_lock_retry.max(Duration::from_millis(10)))
    }

    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        self.store.with_registry(f)
    }

    /// Force a full catalog re-sync: tombstone every live object and roll
    /// over to a fresh `service_id`, so the next delta round's terminal
    /// `CATALOG` record tells every coordinator to invalidate everything it
    /// cached.
    pub fn reset(&self) {
        self.store.reset();
        self.delta_builder.bump_service_id(generate_service_id());
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        self.builder_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.builder_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{PublishRecord, TablePayload, ViewPayload};
    use parking_lot::Mutex;

    struct NullSink;
    impl PublishSink for NullSink {
        fn publish_full(&self, _records: Vec<PublishRecord>) {}
        fn publish_minimal(&self, _records: Vec<PublishRecord>) {}
    }

    struct NullMetastore;
    impl MetastoreClient for NullMetastore {
        fn load_table(&self, db: &str, table: &str) -> Result<TablePayload> {
            Ok(TablePayload {
                db_name: db.to_string(),
                table_name: table.to_string(),
                columns: vec![],
            })
        }
        fn load_view(&self, db: &str, view: &str) -> Result<ViewPayload> {
            Ok(ViewPayload {
                db_name: db.to_string(),
                view_name: view.to_string(),
                definition: String::new(),
            })
        }
    }

    #[test]
    fn end_to_end_create_load_and_sync_ddl() {
        let catalog = Catalog::start(
            Config::default().num_loading_threads(1),
            Arc::new(NullMetastore),
            Arc::new(NullSink),
        )
        .unwrap();

        let version = catalog.create_database("d").unwrap();
        catalog.create_table("d", "t", vec!["id".into()]).unwrap();

        let entry = catalog.get_or_load_table("d", "t").unwrap();
        assert!(entry.is_loaded());

        let updates = vec![PendingUpdate {
            key: ObjectKey::database("d"),
            version,
        }];
        catalog.wait_for_sync_ddl(&updates).unwrap();
    }

    #[test]
    fn partial_fetch_gate_is_reachable_through_the_facade() {
        let catalog = Catalog::start(
            Config::default().max_parallel_partial_fetch(1).num_loading_threads(1),
            Arc::new(NullMetastore),
            Arc::new(NullSink),
        )
        .unwrap();
        let permit = catalog.acquire_partial_fetch().unwrap();
        drop(permit);
    }

    #[test]
    fn observed_state_survives_a_lock() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let catalog = Catalog::start(
            Config::default().num_loading_threads(1),
            Arc::new(NullMetastore),
            Arc::new(NullSink),
        )
        .unwrap();
        catalog.create_database("d").unwrap();
        catalog.with_registry(|r| seen.lock().extend(r.database_names()));
        assert_eq!(*seen.lock(), vec!["d".to_string()]);
    }

    #[test]
    fn reset_clears_everything_and_rolls_the_service_id() {
        let catalog = Catalog::start(
            Config::default().num_loading_threads(1),
            Arc::new(NullMetastore),
            Arc::new(NullSink),
        )
        .unwrap();
        catalog.create_database("d").unwrap();
        let original_service_id = catalog.delta_builder.service_id();

        catalog.reset();

        assert!(!catalog.store.database_exists("d"));
        assert_ne!(catalog.delta_builder.service_id(), original_service_id);
    }
}
