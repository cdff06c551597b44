//! Crate-wide error type.
//!
//! One variant per failure class: not-found, loader races, lock/queue/
//! barrier timeouts, and upstream failures. `thiserror`-derived variants,
//! a plain `Result<T>` alias, and a `From<PoisonError<T>>` impl for lock
//! poisoning.

use crate::types::{ObjectKey, Version};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("a load for {0} is already in flight")]
    AlreadyLoading(ObjectKey),

    #[error("load of {key} failed: {cause}")]
    LoadFailed { key: ObjectKey, cause: String },

    #[error("{key} changed from version {expected} before the operation committed")]
    Conflict { key: ObjectKey, expected: Version },

    #[error("timed out acquiring the lock for {0}")]
    LockTimeout(ObjectKey),

    #[error("partial-fetch queue timed out waiting for a permit (queue depth {queue_depth})")]
    PartialFetchQueueTimeout { queue_depth: usize },

    #[error("SYNC_DDL wait exhausted its attempt budget before coverage was observed")]
    SyncDdlTimeout,

    #[error("upstream metastore/HDFS client unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal catalog error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl<T> From<std::sync::PoisonError<T>> for CatalogError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("poisoned lock: {err}"))
    }
}
