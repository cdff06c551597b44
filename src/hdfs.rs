//! Southbound HDFS integration: the client trait for "HDFS discovery
//! beyond polling" (Non-goals, we still need the polling loop itself,
//! just not a real filesystem client), plus the background cache-pool
//! reconciliation loop, built on a background-thread-plus-channel shape.

use crate::store::CatalogStore;
use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{instrument, warn};

/// Southbound: list the HDFS cache pools currently known to the NameNode.
/// A real implementation would speak the HDFS RPC protocol; out of scope
/// here per Non-goals ("HDFS discovery beyond polling").
pub trait HdfsClient: Send + Sync {
    fn list_cache_pools(&self) -> std::io::Result<Vec<String>>;
}

/// Runs [`HdfsClient::list_cache_pools`] on a fixed interval and
/// reconciles the registry's cache-pool set against it: pools no longer
/// reported are tombstoned, newly reported ones are upserted.
pub struct CachePoolPoller {
    handle: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
}

impl CachePoolPoller {
    #[instrument(skip(store, client))]
    pub fn spawn(store: Arc<CatalogStore>, client: Arc<dyn HdfsClient>, interval: Duration) -> Self {
        let (shutdown, rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("catalog-hdfs-poller".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {
                        poll_once(&store, client.as_ref());
                    }
                }
            })
            .expect("failed to spawn HDFS cache-pool poller thread");

        Self {
            handle: Some(handle),
            shutdown,
        }
    }
}

impl Drop for CachePoolPoller {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("HDFS cache-pool poller thread panicked during shutdown");
            }
        }
    }
}

fn poll_once(store: &CatalogStore, client: &dyn HdfsClient) {
    let observed = match client.list_cache_pools() {
        Ok(pools) => pools.into_iter().collect::<HashSet<_>>(),
        Err(err) => {
            warn!(error = %err, "HDFS cache-pool poll failed, keeping prior state");
            return;
        }
    };

    let known = store.cache_pool_names().into_iter().collect::<HashSet<_>>();

    for name in observed.difference(&known) {
        store.upsert_cache_pool(name);
    }
    for name in known.difference(&observed) {
        let _ = store.remove_cache_pool(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration as StdDuration;

    struct FakeHdfsClient {
        pools: Mutex<Vec<String>>,
    }

    impl HdfsClient for FakeHdfsClient {
        fn list_cache_pools(&self) -> std::io::Result<Vec<String>> {
            Ok(self.pools.lock().clone())
        }
    }

    #[test]
    fn poll_once_adds_and_removes_pools() {
        let store = Arc::new(CatalogStore::new());
        store.upsert_cache_pool("stale");
        let client = FakeHdfsClient {
            pools: Mutex::new(vec!["fresh".to_string()]),
        };

        poll_once(&store, &client);

        let names: HashSet<_> = store.cache_pool_names().into_iter().collect();
        assert!(names.contains("fresh"));
        assert!(!names.contains("stale"));
    }

    #[test]
    fn poller_thread_shuts_down_cleanly() {
        let store = Arc::new(CatalogStore::new());
        let client = Arc::new(FakeHdfsClient {
            pools: Mutex::new(vec![]),
        });
        let poller = CachePoolPoller::spawn(store, client, StdDuration::from_millis(5));
        drop(poller);
    }
}
