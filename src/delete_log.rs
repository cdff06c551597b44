//! The delete log (C): an ordered record of tombstones, read and appended
//! only while the caller holds the global version lock (F).

use crate::payload::TombstonePayload;
use crate::types::{ObjectKey, Version};

/// One removed object. Ordering in [`DeleteLog`] is by insertion, which
/// equals version order by invariant I1.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub key: ObjectKey,
    pub version: Version,
    pub payload: TombstonePayload,
}

#[derive(Debug, Default)]
pub struct DeleteLog {
    entries: Vec<Tombstone>,
}

impl DeleteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tombstone. Caller holds F.write.
    pub fn push(&mut self, tombstone: Tombstone) {
        debug_assert!(
            self.entries
                .last()
                .map(|last| last.version < tombstone.version)
                .unwrap_or(true),
            "tombstones must be appended in strictly increasing version order"
        );
        self.entries.push(tombstone);
    }

    /// Tombstones with `from_v < version <= to_v`, in version order.
    pub fn retrieve(&self, from_v: Version, to_v: Version) -> Vec<Tombstone> {
        self.entries
            .iter()
            .filter(|t| t.version > from_v && t.version <= to_v)
            .cloned()
            .collect()
    }

    /// Drop every tombstone with `version <= up_to` (invariant I3: stale
    /// tombstones, superseded by a live re-add at a higher version or
    /// already published, must not accumulate forever).
    pub fn gc(&mut self, up_to: Version) {
        self.entries.retain(|t| t.version > up_to);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kind;

    fn tombstone(key: &str, version: Version) -> Tombstone {
        let key = ObjectKey::new(Kind::Table, key);
        Tombstone {
            payload: TombstonePayload::from(&key),
            key,
            version,
        }
    }

    #[test]
    fn retrieve_is_half_open_on_from_and_closed_on_to() {
        let mut log = DeleteLog::new();
        log.push(tombstone("a.t1", 5));
        log.push(tombstone("a.t2", 10));
        log.push(tombstone("a.t3", 15));

        let range = log.retrieve(5, 10);
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].version, 10);
    }

    #[test]
    fn gc_drops_everything_at_or_below_cutoff() {
        let mut log = DeleteLog::new();
        log.push(tombstone("a.t1", 5));
        log.push(tombstone("a.t2", 10));

        log.gc(5);
        assert_eq!(log.len(), 1);
        assert_eq!(log.retrieve(0, 100)[0].version, 10);
    }
}
