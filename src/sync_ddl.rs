//! The SYNC_DDL barrier (H): blocks a caller until a named set of
//! updates/removals is demonstrably covered by a published topic update, or
//! until the bounded attempt budget is exhausted (§4.7).

use crate::error::{CatalogError, Result};
use crate::topic_log::TopicUpdateLog;
use crate::types::{ObjectKey, Version};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

/// One of the updates a SYNC_DDL caller is waiting to see published.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub key: ObjectKey,
    pub version: Version,
}

pub struct SyncDdlBarrier {
    topic_log: Arc<TopicUpdateLog>,
    max_skipped_topic_updates: u32,
}

impl SyncDdlBarrier {
    pub fn new(topic_log: Arc<TopicUpdateLog>, max_skipped_topic_updates: u32) -> Self {
        Self {
            topic_log,
            max_skipped_topic_updates,
        }
    }

    /// Block until every update in `updates` is covered: `T` is the most
    /// recently published topic, "covers" is
    /// `last_sent_version(key) >= version && last_sent_topic(key) <=
    /// version(T)`. The attempt budget is `max(5, |U| * (S + 1))` distinct
    /// topic publishes; a `wait_for_publish` call that times out without a
    /// publish happening does not consume an attempt.
    #[instrument(skip(self, updates))]
    pub fn wait_for_coverage(&self, updates: &[PendingUpdate], poll_timeout: Duration) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let attempt_cap = ((updates.len() as u32) * (self.max_skipped_topic_updates + 1)).max(5);
        let mut attempts = 0u32;

        loop {
            if self.is_covered(updates) {
                return Ok(());
            }
            if attempts >= attempt_cap {
                warn!(
                    attempts,
                    attempt_cap, "SYNC_DDL exhausted its attempt budget without observing coverage"
                );
                return Err(CatalogError::SyncDdlTimeout);
            }
            if self.topic_log.wait_for_publish(poll_timeout) {
                attempts += 1;
            }
            // A bare timeout loops back around without incrementing
            // `attempts`: a bare poll timeout doesn't count as an attempt.
        }
    }

    fn is_covered(&self, updates: &[PendingUpdate]) -> bool {
        let topic = self.topic_log.latest_topic_version();
        updates.iter().all(|u| {
            self.topic_log
                .get(&u.key)
                .map(|entry| entry.covers(u.version, topic))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kind;
    use std::thread;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(Kind::Table, name)
    }

    #[test]
    fn returns_immediately_when_already_covered() {
        let log = Arc::new(TopicUpdateLog::new());
        log.record_published(key("d.t"), 5, 5);
        let barrier = SyncDdlBarrier::new(Arc::clone(&log), 2);

        let updates = vec![PendingUpdate {
            key: key("d.t"),
            version: 5,
        }];
        barrier
            .wait_for_coverage(&updates, Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn waits_for_a_publish_that_covers_the_update() {
        let log = Arc::new(TopicUpdateLog::new());
        let barrier = SyncDdlBarrier::new(Arc::clone(&log), 2);
        let updates = vec![PendingUpdate {
            key: key("d.t"),
            version: 7,
        }];

        let publishing_log = Arc::clone(&log);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            publishing_log.record_published(key("d.t"), 7, 7);
            publishing_log.notify_published();
        });

        barrier
            .wait_for_coverage(&updates, Duration::from_millis(500))
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn exhausts_attempt_budget_if_never_covered() {
        let log = Arc::new(TopicUpdateLog::new());
        let barrier = SyncDdlBarrier::new(Arc::clone(&log), 0);
        let updates = vec![PendingUpdate {
            key: key("d.t"),
            version: 99,
        }];

        let publishing_log = Arc::clone(&log);
        let handle = thread::spawn(move || {
            for _ in 0..10 {
                thread::sleep(Duration::from_millis(5));
                publishing_log.notify_published();
            }
        });

        let err = barrier
            .wait_for_coverage(&updates, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, CatalogError::SyncDdlTimeout));
        handle.join().unwrap();
    }
}
