//! The delta builder (G): the single-threaded engine that turns "what
//! changed between two versions" into a bounded batch of records for the
//! northbound sink, following the nine-step procedure in §4.4.

use crate::config::Config;
use crate::delete_log::Tombstone;
use crate::payload::{CatalogIdentity, MinimalPayload, ObjectPayload, PublishRecord};
use crate::store::CatalogStore;
use crate::topic_log::TopicUpdateLog;
use crate::types::{ObjectKey, Version};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// Northbound: where a finished topic update goes. One call per topic per
/// round; `publish_full`/`publish_minimal` are only invoked when
/// [`crate::config::TopicMode`] says that topic is active (Data Model,
/// "external interfaces").
pub trait PublishSink: Send + Sync {
    fn publish_full(&self, records: Vec<PublishRecord>);
    fn publish_minimal(&self, records: Vec<PublishRecord>);
}

/// Outcome of one [`DeltaBuilder::build_once`] call, useful for tests and
/// for the driving loop to decide whether to sleep before the next round.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub from_v: Version,
    pub to_v: Version,
    pub published: usize,
    pub skipped: usize,
    pub tombstoned: usize,
}

struct CursorState {
    from_v: Version,
}

/// Component G. Owns the only writer handle to the topic update log (D);
/// every other component only reads it.
pub struct DeltaBuilder {
    store: Arc<CatalogStore>,
    topic_log: Arc<TopicUpdateLog>,
    sink: Arc<dyn PublishSink>,
    config: Config,
    service_id: AtomicU64,
    cursor: Mutex<CursorState>,
    rounds_built: AtomicU64,
}

impl DeltaBuilder {
    pub fn new(
        store: Arc<CatalogStore>,
        topic_log: Arc<TopicUpdateLog>,
        sink: Arc<dyn PublishSink>,
        config: Config,
        service_id: u64,
    ) -> Self {
        Self {
            store,
            topic_log,
            sink,
            config,
            service_id: AtomicU64::new(service_id),
            cursor: Mutex::new(CursorState { from_v: 0 }),
            rounds_built: AtomicU64::new(0),
        }
    }

    pub fn rounds_built(&self) -> u64 {
        self.rounds_built.load(Ordering::Relaxed)
    }

    pub fn service_id(&self) -> u64 {
        self.service_id.load(Ordering::Relaxed)
    }

    /// Assign a fresh `service_id`, so the next terminal `CATALOG` record
    /// signals coordinators to treat everything before it as invalidated
    /// ("Reset/invalidate-all" support). Takes effect starting with
    /// the next [`Self::build_once`] round.
    pub fn bump_service_id(&self, new_id: u64) {
        self.service_id.store(new_id, Ordering::Relaxed);
    }

    /// Run one round of the nine-step procedure. Returns `None` if there
    /// was nothing new to publish (the sampled upper bound hadn't moved
    /// past the cursor), in which case no record (not even the terminal
    /// `CATALOG` one) is emitted.
    #[instrument(skip(self))]
    pub fn build_once(&self) -> Option<BuildSummary> {
        // Step 1: sample an upper bound under a brief F.read, then do all
        // further work outside the lock.
        let to_v = self.store.snapshot().version;
        let mut cursor = self.cursor.lock();
        let from_v = cursor.from_v;
        if to_v <= from_v {
            trace!(from_v, to_v, "nothing new to publish this round");
            return None;
        }

        // Step 2: enumerate every live object.
        let (light_objects, heavy_entries) = self
            .store
            .with_registry(|r| (r.all_light_objects(), r.all_heavy_entries()));

        let mut live_keys: HashSet<ObjectKey> =
            light_objects.iter().map(|o| o.key.clone()).collect();
        live_keys.extend(heavy_entries.iter().map(|e| e.key.clone()));

        let mut full_records = Vec::new();
        let mut minimal_records = Vec::new();
        let mut published = 0usize;
        let mut skipped = 0usize;

        // Step 3: publish non-heavy objects whose version falls in
        // `(from_v, to_v]`.
        for object in &light_objects {
            if object.version > from_v && object.version <= to_v {
                self.emit_live(object.key.clone(), object.version, to_v, &object.payload, &mut full_records, &mut minimal_records);
                published += 1;
            }
        }

        // Step 4: heavy objects get skip/force treatment. An unloaded shell
        // is skipped, so coordinators don't see half a table, unless its
        // skip counter has already hit the starvation-avoidance bound, in
        // which case it is force-published as-is (invariant I5).
        //
        // Unlike light objects, a heavy object that was skipped stays a
        // candidate every round regardless of where `from_v` has drifted
        // to: it was never actually published, so its version never
        // entered the topic log as `last_sent_version`. Filtering on "not
        // yet covered" rather than "falls in this round's window" is what
        // makes the skip counter (and eventually the force-publish) ever
        // get a chance to run again.
        for entry in &heavy_entries {
            let snapshot = entry.snapshot();
            if snapshot.version > to_v {
                continue;
            }
            let already_covered = self
                .topic_log
                .get(&entry.key)
                .map(|e| e.last_sent_version >= snapshot.version)
                .unwrap_or(false);
            if already_covered {
                continue;
            }
            let must_force = self
                .topic_log
                .must_force_publish(&entry.key, self.config.max_skipped_topic_updates);
            if snapshot.loaded || must_force {
                self.emit_live(
                    entry.key.clone(),
                    snapshot.version,
                    to_v,
                    &snapshot.payload,
                    &mut full_records,
                    &mut minimal_records,
                );
                published += 1;
            } else {
                self.topic_log.record_skipped(entry.key.clone());
                skipped += 1;
                debug!(key = %entry.key, "skipping unloaded heavy object this round");
            }
        }

        // Step 5: deletions, deduplicated against keys that are live again
        // (a remove followed by a re-add of the same key within the same
        // window must not emit a stale tombstone after the add).
        let tombstones: Vec<Tombstone> = self
            .store
            .retrieve_tombstones(from_v, to_v)
            .into_iter()
            .filter(|t| !live_keys.contains(&t.key))
            .collect();
        for tombstone in &tombstones {
            let bytes = serde_json::to_vec(&tombstone.payload).unwrap_or_default();
            full_records.push(PublishRecord {
                key: tombstone.key.clone(),
                version: tombstone.version,
                payload: bytes.clone(),
                deleted: true,
            });
            minimal_records.push(PublishRecord {
                key: tombstone.key.clone(),
                version: tombstone.version,
                payload: bytes,
                deleted: true,
            });
            self.topic_log
                .record_published(tombstone.key.clone(), tombstone.version, to_v);
        }

        // Step 6: the terminal CATALOG record, always emitted on every
        // non-empty round so coordinators can detect a catalogd restart via
        // `service_id`.
        let catalog_identity = CatalogIdentity {
            service_id: self.service_id(),
            version: to_v,
        };
        let catalog_bytes =
            serde_json::to_vec(&ObjectPayload::Catalog(catalog_identity)).unwrap_or_default();
        let catalog_key = ObjectKey::catalog();
        full_records.push(PublishRecord {
            key: catalog_key.clone(),
            version: to_v,
            payload: catalog_bytes.clone(),
            deleted: false,
        });
        minimal_records.push(PublishRecord {
            key: catalog_key.clone(),
            version: to_v,
            payload: catalog_bytes,
            deleted: false,
        });
        self.topic_log.record_published(catalog_key, to_v, to_v);

        // Step 7/8: D is already updated incrementally above; garbage
        // collect both the delete log and the topic log's own bookkeeping
        // now that everything up to `to_v` has been folded into this
        // round's records.
        self.store.gc_delete_log(to_v);
        self.topic_log
            .gc_older_than(to_v, self.config.topic_update_log_retention);

        // Step 9: publish and wake any SYNC_DDL waiters.
        if self.config.topic_mode.publishes_full() {
            self.sink.publish_full(full_records);
        }
        if self.config.topic_mode.publishes_minimal() {
            self.sink.publish_minimal(minimal_records);
        }
        self.topic_log.notify_published();

        cursor.from_v = to_v;
        self.rounds_built.fetch_add(1, Ordering::Relaxed);

        Some(BuildSummary {
            from_v,
            to_v,
            published,
            skipped,
            tombstoned: tombstones.len(),
        })
    }

    fn emit_live(
        &self,
        key: ObjectKey,
        version: Version,
        to_v: Version,
        payload: &ObjectPayload,
        full_records: &mut Vec<PublishRecord>,
        minimal_records: &mut Vec<PublishRecord>,
    ) {
        let full_bytes = serde_json::to_vec(payload).unwrap_or_default();
        full_records.push(PublishRecord {
            key: key.clone(),
            version,
            payload: full_bytes,
            deleted: false,
        });

        let minimal = crate::payload::VersionedObject {
            key: key.clone(),
            version,
            payload: payload.clone(),
            loaded: true,
        }
        .minimal_payload();
        if !matches!(minimal, MinimalPayload::NotPublished) {
            let minimal_bytes = serde_json::to_vec(&minimal).unwrap_or_default();
            minimal_records.push(PublishRecord {
                key: key.clone(),
                version,
                payload: minimal_bytes,
                deleted: false,
            });
        }

        self.topic_log.record_published(key, version, to_v);
    }

    /// Drive rounds forever on the calling thread, sleeping `idle_sleep`
    /// between rounds that found nothing new. The delta builder is
    /// single-threaded by design (§5): only one thread may ever call this.
    pub fn run_forever(&self, idle_sleep: Duration, shutdown: &std::sync::atomic::AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            if self.build_once().is_none() {
                std::thread::sleep(idle_sleep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicMode;
    use parking_lot::Mutex as PMutex;

    #[derive(Default)]
    struct RecordingSink {
        full: PMutex<Vec<Vec<PublishRecord>>>,
        minimal: PMutex<Vec<Vec<PublishRecord>>>,
    }

    impl PublishSink for RecordingSink {
        fn publish_full(&self, records: Vec<PublishRecord>) {
            self.full.lock().push(records);
        }

        fn publish_minimal(&self, records: Vec<PublishRecord>) {
            self.minimal.lock().push(records);
        }
    }

    fn builder(store: Arc<CatalogStore>, sink: Arc<RecordingSink>, config: Config) -> (DeltaBuilder, Arc<TopicUpdateLog>) {
        let topic_log = Arc::new(TopicUpdateLog::new());
        let builder = DeltaBuilder::new(store, Arc::clone(&topic_log), sink, config, 42);
        (builder, topic_log)
    }

    #[test]
    fn no_op_round_returns_none() {
        let store = Arc::new(CatalogStore::new());
        let sink = Arc::new(RecordingSink::default());
        let (builder, _log) = builder(store, sink, Config::default());
        assert!(builder.build_once().is_none());
    }

    #[test]
    fn publishes_new_database_and_terminal_catalog_record() {
        let store = Arc::new(CatalogStore::new());
        store.create_database("d").unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (builder, _log) = builder(store, Arc::clone(&sink), Config::default());

        let summary = builder.build_once().unwrap();
        assert_eq!(summary.published, 1);

        let full = sink.full.lock();
        assert_eq!(full.len(), 1);
        // the database record plus the terminal CATALOG record.
        assert_eq!(full[0].len(), 2);
        assert!(full[0].iter().any(|r| r.key == ObjectKey::catalog()));
    }

    #[test]
    fn unloaded_table_is_skipped_then_force_published_after_threshold() {
        let store = Arc::new(CatalogStore::new());
        store.create_database("d").unwrap();
        store.create_table("d", "t", vec![]).unwrap();

        let sink = Arc::new(RecordingSink::default());
        let config = Config::default().max_skipped_topic_updates(1);
        let (builder, _log) = builder(Arc::clone(&store), Arc::clone(&sink), config);

        // Round 1: table not loaded, skipped; only DB + CATALOG if any
        // newer database existed, here just CATALOG is emitted since
        // nothing else is publishable yet, but build_once still returns
        // Some because from_v < to_v (the table's shell bumped the
        // counter).
        let first = builder.build_once().unwrap();
        assert_eq!(first.skipped, 1);
        assert!(!sink.full.lock()[0]
            .iter()
            .any(|r| r.key == ObjectKey::table("d", "t")));

        // Round 2: still unloaded, skip counter now >= max_skipped (1), so
        // it must be force-published even though nothing else changed.
        store.create_database("d2").unwrap(); // bump the counter so to_v > from_v
        let second = builder.build_once().unwrap();
        assert_eq!(second.published, 2); // d2 + forced table
        assert!(sink.full.lock()[1]
            .iter()
            .any(|r| r.key == ObjectKey::table("d", "t")));
    }

    #[test]
    fn remove_then_readd_within_window_suppresses_tombstone() {
        let store = Arc::new(CatalogStore::new());
        store.create_database("d").unwrap();
        store.drop_database("d").unwrap();
        store.create_database("d").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let (builder, _log) = builder(store, Arc::clone(&sink), Config::default());

        let summary = builder.build_once().unwrap();
        assert_eq!(summary.tombstoned, 0);
        assert!(!sink.full.lock()[0].iter().any(|r| r.deleted));
    }

    #[test]
    fn minimal_topic_excludes_data_sources_but_keeps_databases() {
        let store = Arc::new(CatalogStore::new());
        store.create_database("d").unwrap();
        store.create_data_source("src", "jdbc://host".into()).unwrap();

        let sink = Arc::new(RecordingSink::default());
        let config = Config::default().topic_mode(TopicMode::Mixed);
        let (builder, _log) = builder(Arc::clone(&store), Arc::clone(&sink), config);
        builder.build_once().unwrap();

        let minimal = sink.minimal.lock();
        assert!(minimal[0].iter().any(|r| r.key == ObjectKey::database("d")));
        assert!(!minimal[0]
            .iter()
            .any(|r| r.key == ObjectKey::data_source("src")));

        let full = sink.full.lock();
        assert!(full[0]
            .iter()
            .any(|r| r.key == ObjectKey::data_source("src")));
    }
}
