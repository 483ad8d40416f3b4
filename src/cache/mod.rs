//! Postings list cache
//!
//! A read-through memo for the postings produced by term, regexp,
//! field-presence and compound-search lookups against immutable segments.
//! Entries are keyed by `(segment, kind, field, pattern)`; each pattern kind
//! gets its own sharded LRU budget so a regexp scan cannot flood out cached
//! terms. A reverse index from segment id to cache keys makes segment purge
//! proportional to that segment's entries alone.
//!
//! The cache stores and retrieves postings; it never computes them. On a
//! miss the reader computes from the underlying segment and calls `put_*`.
//! Concurrent fills of one key may both compute, but the store keeps exactly
//! one entry and either handle is correct for an immutable segment.

mod back_index;
mod key;
mod lru;

pub use key::{CachedPattern, PatternKind, SubKey};

use std::sync::Arc;

use tracing::debug;

use crate::cache::back_index::SegmentBackIndex;
use crate::cache::key::CachedPostings;
use crate::cache::lru::ShardedLru;
use crate::config::PostingsCacheConfig;
use crate::metrics::CacheMetrics;
use crate::postings::PostingsList;
use crate::search::Query;
use crate::segment::SegmentId;

/// Filter for `cached_patterns`
#[derive(Clone, Copy, Debug, Default)]
pub struct CachedPatternsQuery {
    /// Restrict visitation to one pattern kind
    pub kind: Option<PatternKind>,
}

/// Outcome of a `cached_patterns` walk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachedPatternsResult {
    /// Entries present for the segment across all kinds
    pub total_patterns: usize,
    /// Entries that matched the filter and were visited
    pub matched_patterns: usize,
}

/// Thread-safe postings list cache shared by many segments.
pub struct PostingsListCache {
    config: PostingsCacheConfig,
    lrus: [ShardedLru; 4],
    back_index: SegmentBackIndex,
    metrics: CacheMetrics,
}

impl PostingsListCache {
    /// Create a cache with its own metrics registry
    pub fn new(config: PostingsCacheConfig) -> Self {
        Self::with_metrics(config, CacheMetrics::default())
    }

    /// Create a cache reporting into caller-provided metrics
    pub fn with_metrics(config: PostingsCacheConfig, metrics: CacheMetrics) -> Self {
        let lrus = [
            ShardedLru::new(config.shards_per_kind, config.capacity_for(PatternKind::Field)),
            ShardedLru::new(config.shards_per_kind, config.capacity_for(PatternKind::Term)),
            ShardedLru::new(config.shards_per_kind, config.capacity_for(PatternKind::Regexp)),
            ShardedLru::new(config.shards_per_kind, config.capacity_for(PatternKind::Search)),
        ];
        Self {
            config,
            lrus,
            back_index: SegmentBackIndex::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &PostingsCacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Cached postings for a term lookup
    pub fn get_term(&self, segment: SegmentId, field: &[u8], term: &[u8]) -> Option<PostingsList> {
        self.get(PatternKind::Term, segment, field, term)
    }

    /// Cached postings for a field-presence lookup
    pub fn get_field(&self, segment: SegmentId, field: &[u8]) -> Option<PostingsList> {
        self.get(PatternKind::Field, segment, field, b"")
    }

    /// Cached postings for a regexp lookup, keyed by canonical pattern
    pub fn get_regexp(
        &self,
        segment: SegmentId,
        field: &[u8],
        pattern: &str,
    ) -> Option<PostingsList> {
        self.get(PatternKind::Regexp, segment, field, pattern.as_bytes())
    }

    /// Cached postings for a compound search, keyed by canonical query string
    pub fn get_search(&self, segment: SegmentId, query_str: &str) -> Option<PostingsList> {
        self.get(PatternKind::Search, segment, b"", query_str.as_bytes())
    }

    /// Store term postings
    pub fn put_term(
        &self,
        segment: SegmentId,
        field: &[u8],
        term: &[u8],
        postings: PostingsList,
    ) {
        self.put(
            PatternKind::Term,
            segment,
            field,
            term,
            CachedPostings::postings(postings),
        );
    }

    /// Store field-presence postings
    pub fn put_field(&self, segment: SegmentId, field: &[u8], postings: PostingsList) {
        self.put(
            PatternKind::Field,
            segment,
            field,
            b"",
            CachedPostings::postings(postings),
        );
    }

    /// Store regexp postings under the canonical pattern string
    pub fn put_regexp(
        &self,
        segment: SegmentId,
        field: &[u8],
        pattern: &str,
        postings: PostingsList,
    ) {
        self.put(
            PatternKind::Regexp,
            segment,
            field,
            pattern.as_bytes(),
            CachedPostings::postings(postings),
        );
    }

    /// Store search postings, optionally with the query that produced them
    pub fn put_search(
        &self,
        segment: SegmentId,
        query_str: &str,
        query: Option<Arc<dyn Query>>,
        postings: PostingsList,
    ) {
        self.put(
            PatternKind::Search,
            segment,
            b"",
            query_str.as_bytes(),
            CachedPostings::search(postings, query),
        );
    }

    /// Remove every entry keyed by a segment and refuse future puts for it.
    /// Returns the number of entries removed.
    pub fn purge_segment(&self, segment: &SegmentId) -> usize {
        let keys = self.back_index.take_segment(segment);
        let mut removed = 0;
        for key in keys {
            let sub_key = SubKey::new(*segment, key.field, key.pattern);
            if let Some(bytes) = self.lrus[key.kind.index()].remove(&sub_key) {
                self.metrics.record_removed(key.kind, bytes);
                removed += 1;
            }
        }
        self.metrics.record_purge(removed);
        debug!(segment = %segment, removed, "purged segment postings from cache");
        removed
    }

    /// Visit the entries cached for a segment without promoting recency.
    pub fn cached_patterns<F>(
        &self,
        segment: &SegmentId,
        query: CachedPatternsQuery,
        mut visitor: F,
    ) -> CachedPatternsResult
    where
        F: FnMut(&CachedPattern),
    {
        let mut result = CachedPatternsResult::default();
        for kind in PatternKind::ALL {
            self.lrus[kind.index()].visit(Some(segment), |sub_key, value| {
                result.total_patterns += 1;
                if query.kind.map_or(true, |k| k == kind) {
                    visitor(&CachedPattern {
                        kind,
                        field: sub_key.field.clone(),
                        pattern: sub_key.pattern.clone(),
                        postings: value.postings.clone(),
                        query: value.query.clone(),
                    });
                    result.matched_patterns += 1;
                }
            });
        }
        result
    }

    /// Drop every entry of every segment. Purged-segment tombstones survive.
    pub fn clear(&self) {
        for kind in PatternKind::ALL {
            let (entries, bytes) = self.lrus[kind.index()].clear();
            if entries > 0 {
                self.metrics
                    .entries
                    .with_label_values(&[kind.as_str()])
                    .sub(entries as f64);
                self.metrics
                    .bytes
                    .with_label_values(&[kind.as_str()])
                    .sub(bytes as f64);
            }
        }
        self.back_index.clear();
    }

    /// Total live entries across all kinds
    pub fn len(&self) -> usize {
        PatternKind::ALL
            .iter()
            .map(|kind| self.lrus[kind.index()].len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total tracked bytes across all kinds
    pub fn total_bytes(&self) -> u64 {
        PatternKind::ALL
            .iter()
            .map(|kind| self.lrus[kind.index()].total_bytes())
            .sum()
    }

    fn get(
        &self,
        kind: PatternKind,
        segment: SegmentId,
        field: &[u8],
        pattern: &[u8],
    ) -> Option<PostingsList> {
        if !self.config.kind_enabled(kind) {
            return None;
        }
        let sub_key = SubKey::new(segment, field, pattern);
        match self.lrus[kind.index()].get(&sub_key) {
            Some(value) => {
                self.metrics.record_hit(kind);
                Some(value.postings)
            }
            None => {
                self.metrics.record_miss(kind);
                None
            }
        }
    }

    fn put(
        &self,
        kind: PatternKind,
        segment: SegmentId,
        field: &[u8],
        pattern: &[u8],
        value: CachedPostings,
    ) {
        if !self.config.kind_enabled(kind) {
            return;
        }

        let bytes = value.postings.memory_bytes();

        // Record the reverse mapping first; a racing purge either sees the
        // mapping and removes the entry, or has already marked the segment
        // purged and this put must be dropped.
        if !self.back_index.insert(segment, kind, field, pattern) {
            self.metrics.record_rejected_put();
            return;
        }

        let outcome = self.lrus[kind.index()].put(SubKey::new(segment, field, pattern), value, bytes);

        match outcome.replaced_bytes {
            Some(old_bytes) => self.metrics.record_replace(kind, old_bytes, bytes),
            None => self.metrics.record_put(kind, bytes),
        }

        // Evictions are reported after the shard lock is released; until the
        // reverse mappings are dropped here, purge may see keys whose
        // entries are already gone, which it treats as a no-op.
        for (evicted, evicted_bytes) in outcome.evicted {
            self.back_index
                .remove(&evicted.segment, kind, &evicted.field, &evicted.pattern);
            self.metrics.record_eviction(kind, evicted_bytes);
        }
    }
}
