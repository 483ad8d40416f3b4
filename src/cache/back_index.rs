//! Segment back-index
//!
//! Reverse mapping from segment id to the cache keys referencing it, so a
//! segment purge touches only that segment's entries. The map also carries a
//! purged-id tombstone set: inserts for a purged segment are refused, which
//! keeps a late put (from a reader created before close) from resurrecting
//! entries after the purge ran.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::cache::key::PatternKind;
use crate::segment::SegmentId;

/// A kind-qualified key as recorded in the back-index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BackIndexKey {
    pub kind: PatternKind,
    pub field: Vec<u8>,
    pub pattern: Vec<u8>,
}

#[derive(Default)]
struct BackIndexInner {
    entries: HashMap<SegmentId, HashSet<BackIndexKey>>,
    purged: HashSet<SegmentId>,
}

/// Coarse-locked reverse index; purges are rare relative to reads, so one
/// mutex held briefly on put and purge setup is sufficient.
#[derive(Default)]
pub(crate) struct SegmentBackIndex {
    inner: Mutex<BackIndexInner>,
}

impl SegmentBackIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache key for a segment. Returns false (and records
    /// nothing) when the segment has been purged; the caller must drop the
    /// insert.
    pub fn insert(
        &self,
        segment: SegmentId,
        kind: PatternKind,
        field: &[u8],
        pattern: &[u8],
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.purged.contains(&segment) {
            return false;
        }
        inner.entries.entry(segment).or_default().insert(BackIndexKey {
            kind,
            field: field.to_vec(),
            pattern: pattern.to_vec(),
        });
        true
    }

    /// Drop the reverse mapping for one key (eviction path)
    pub fn remove(&self, segment: &SegmentId, kind: PatternKind, field: &[u8], pattern: &[u8]) {
        let mut inner = self.inner.lock();
        if let Some(set) = inner.entries.get_mut(segment) {
            set.remove(&BackIndexKey {
                kind,
                field: field.to_vec(),
                pattern: pattern.to_vec(),
            });
            if set.is_empty() {
                inner.entries.remove(segment);
            }
        }
    }

    /// Take ownership of every key recorded for a segment and mark the id
    /// purged. Subsequent inserts for it are refused.
    pub fn take_segment(&self, segment: &SegmentId) -> Vec<BackIndexKey> {
        let mut inner = self.inner.lock();
        inner.purged.insert(*segment);
        inner
            .entries
            .remove(segment)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Number of keys currently recorded for a segment
    pub fn count_for(&self, segment: &SegmentId) -> usize {
        self.inner
            .lock()
            .entries
            .get(segment)
            .map_or(0, |set| set.len())
    }

    /// Drop all reverse mappings. Purge tombstones are kept: segment ids are
    /// never reused, and a cleared cache must still refuse late puts for
    /// segments closed earlier.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    #[cfg(test)]
    pub fn is_purged(&self, segment: &SegmentId) -> bool {
        self.inner.lock().purged.contains(segment)
    }
}
