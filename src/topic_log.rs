//! The topic update log (D): per-object publication history, written only
//! by the delta builder, read by SYNC_DDL waiters. Deliberately not
//! protected by the global version lock F (waiters need to block without
//! holding it) so it carries its own mutex/condvar pair.

use crate::types::{ObjectKey, Version};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// `(last published version, topic-update version that published it, skip
/// counter)` for one object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopicEntry {
    pub last_sent_version: Version,
    pub last_sent_topic: Version,
    pub skipped: u32,
}

impl TopicEntry {
    /// Invariant P3/I5: a topic `T` covers a record at version `v` iff it
    /// has sent at least `v` and the send happened at or before `T`.
    pub fn covers(&self, record_version: Version, topic: Version) -> bool {
        self.last_sent_version >= record_version && self.last_sent_topic <= topic
    }
}

struct Inner {
    entries: HashMap<ObjectKey, TopicEntry>,
    publish_count: u64,
    latest_topic: Version,
}

/// The topic update log plus the condition variable SYNC_DDL waiters block
/// on (component H's "observers watch D and wake on each publish").
pub struct TopicUpdateLog {
    inner: Mutex<Inner>,
    publish_cv: Condvar,
}

impl TopicUpdateLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                publish_count: 0,
                latest_topic: 0,
            }),
            publish_cv: Condvar::new(),
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<TopicEntry> {
        self.inner.lock().entries.get(key).copied()
    }

    /// Record that `key` was published at `version` by the topic update
    /// whose upper bound is `to_v`. Resets the skip counter (§4.4 step 7).
    pub fn record_published(&self, key: ObjectKey, version: Version, to_v: Version) {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            key,
            TopicEntry {
                last_sent_version: version,
                last_sent_topic: to_v,
                skipped: 0,
            },
        );
        inner.latest_topic = inner.latest_topic.max(to_v);
    }

    /// The version of the most recently published topic update, regardless
    /// of which keys it touched. SYNC_DDL uses this as `T` in the coverage
    /// test (Data Model, Topic Update Log).
    pub fn latest_topic_version(&self) -> Version {
        self.inner.lock().latest_topic
    }

    /// Record that `key` was skipped this topic update (§4.4 step 7): the
    /// skip counter increments, the prior send bookkeeping is unchanged.
    pub fn record_skipped(&self, key: ObjectKey) {
        let mut inner = self.inner.lock();
        let entry = inner.entries.entry(key).or_default();
        entry.skipped += 1;
    }

    /// Invariant I5: an object may skip at most `max_skip` consecutive
    /// topic updates; on the `max_skip + 1`th attempt it must be included
    /// regardless of its version vs. the topic's upper bound.
    pub fn must_force_publish(&self, key: &ObjectKey, max_skip: u32) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|e| e.skipped >= max_skip)
            .unwrap_or(false)
    }

    /// Drop entries whose last publication is older than `to_v -
    /// retention` topic updates.
    pub fn gc_older_than(&self, to_v: Version, retention: Version) {
        let cutoff = to_v.saturating_sub(retention);
        self.inner
            .lock()
            .entries
            .retain(|_, entry| entry.last_sent_topic > cutoff);
    }

    /// Called by the delta builder after a topic update finishes
    /// publishing: bumps the publish generation and wakes every SYNC_DDL
    /// waiter blocked in [`Self::wait_for_publish`].
    pub fn notify_published(&self) {
        let mut inner = self.inner.lock();
        inner.publish_count += 1;
        self.publish_cv.notify_all();
    }

    /// Block until the next topic publish or `timeout` elapses, whichever
    /// comes first. Returns `true` if a publish was observed.
    ///
    /// The check-then-wait is done under a single lock acquisition so a
    /// publish that happens concurrently with the call is never missed
    /// (no lost-wakeup window).
    pub fn wait_for_publish(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        let start = inner.publish_count;
        let deadline = Instant::now() + timeout;
        loop {
            if inner.publish_count != start {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let result = self.publish_cv.wait_for(&mut inner, remaining);
            if inner.publish_count != start {
                return true;
            }
            if result.timed_out() {
                return false;
            }
        }
    }
}

impl Default for TopicUpdateLog {
    fn default() -> Self {
        Self::new()
    }
}
