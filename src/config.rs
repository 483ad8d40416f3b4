use serde::{Deserialize, Serialize};

use crate::cache::PatternKind;

/// Capacity bounds for one pattern kind's LRU.
///
/// Either bound may be set; whichever is exceeded first triggers eviction.
/// `None` means unbounded on that axis.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CacheCapacity {
    pub max_bytes: Option<u64>,
    pub max_entries: Option<usize>,
}

impl CacheCapacity {
    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            max_entries: None,
        }
    }

    pub fn entries(max_entries: usize) -> Self {
        Self {
            max_bytes: None,
            max_entries: Some(max_entries),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_bytes: None,
            max_entries: None,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Split this capacity evenly across `shards`, keeping at least one
    /// entry and one byte of budget per shard.
    pub(crate) fn per_shard(&self, shards: usize) -> Self {
        let shards = shards.max(1) as u64;
        Self {
            max_bytes: self.max_bytes.map(|b| (b / shards).max(1)),
            max_entries: self.max_entries.map(|e| (e / shards as usize).max(1)),
        }
    }
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self {
            max_bytes: Some(64 * 1024 * 1024),
            max_entries: Some(8192),
        }
    }
}

/// Configuration for a `PostingsListCache`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostingsCacheConfig {
    /// Cache postings for term and field-presence lookups
    pub cache_terms: bool,
    /// Cache postings for regexp lookups
    pub cache_regexp: bool,
    /// Cache postings for compound search queries
    pub cache_searches: bool,
    /// Byte/entry budget for term postings
    pub term_capacity: CacheCapacity,
    /// Byte/entry budget for field-presence postings
    pub field_capacity: CacheCapacity,
    /// Byte/entry budget for regexp postings
    pub regexp_capacity: CacheCapacity,
    /// Byte/entry budget for search postings
    pub search_capacity: CacheCapacity,
    /// Number of lock shards per pattern kind
    pub shards_per_kind: usize,
}

impl Default for PostingsCacheConfig {
    fn default() -> Self {
        Self {
            cache_terms: true,
            cache_regexp: true,
            cache_searches: true,
            term_capacity: CacheCapacity::default(),
            field_capacity: CacheCapacity::default(),
            regexp_capacity: CacheCapacity::default(),
            search_capacity: CacheCapacity::default(),
            shards_per_kind: default_shard_count(),
        }
    }
}

impl PostingsCacheConfig {
    pub fn with_shards_per_kind(mut self, shards: usize) -> Self {
        self.shards_per_kind = shards.max(1);
        self
    }

    pub fn with_capacity(mut self, kind: PatternKind, capacity: CacheCapacity) -> Self {
        match kind {
            PatternKind::Term => self.term_capacity = capacity,
            PatternKind::Field => self.field_capacity = capacity,
            PatternKind::Regexp => self.regexp_capacity = capacity,
            PatternKind::Search => self.search_capacity = capacity,
        }
        self
    }

    pub fn with_cache_terms(mut self, enabled: bool) -> Self {
        self.cache_terms = enabled;
        self
    }

    pub fn with_cache_regexp(mut self, enabled: bool) -> Self {
        self.cache_regexp = enabled;
        self
    }

    pub fn with_cache_searches(mut self, enabled: bool) -> Self {
        self.cache_searches = enabled;
        self
    }

    pub fn capacity_for(&self, kind: PatternKind) -> CacheCapacity {
        match kind {
            PatternKind::Term => self.term_capacity,
            PatternKind::Field => self.field_capacity,
            PatternKind::Regexp => self.regexp_capacity,
            PatternKind::Search => self.search_capacity,
        }
    }

    /// Whether caching is enabled for a pattern kind. Field-presence
    /// postings are governed by the term flag.
    pub fn kind_enabled(&self, kind: PatternKind) -> bool {
        match kind {
            PatternKind::Term | PatternKind::Field => self.cache_terms,
            PatternKind::Regexp => self.cache_regexp,
            PatternKind::Search => self.cache_searches,
        }
    }
}

/// Per-segment caching switches for a `ReadThroughSegment`.
///
/// These gate what the wrapping segment sends to the shared caches; the
/// cache's own config gates what the caches accept.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReadThroughSegmentOptions {
    /// Cache the postings of regexp queries
    pub cache_regexp: bool,
    /// Cache the postings of term and field-presence queries
    pub cache_terms: bool,
    /// Cache the postings of compound search queries
    pub cache_searches: bool,
}

impl Default for ReadThroughSegmentOptions {
    fn default() -> Self {
        Self {
            cache_regexp: true,
            cache_terms: true,
            cache_searches: true,
        }
    }
}

/// Default shard count, derived from the host's parallelism
pub fn default_shard_count() -> usize {
    (num_cpus::get() * 4).clamp(1, 64)
}
