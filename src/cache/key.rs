//! Cache keys and cached values
//!
//! Every cached postings list is identified by `(segment, kind, field,
//! pattern)`. The kind selects one of four independent LRUs; the remaining
//! triple is the key within that LRU.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::postings::PostingsList;
use crate::search::Query;
use crate::segment::SegmentId;

/// The predicate class a cached postings list was produced by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// Documents containing the field at all
    Field,
    /// Documents where the field equals a byte term
    Term,
    /// Documents where the field matches a compiled pattern
    Regexp,
    /// Documents matching a compound search query
    Search,
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] = [
        PatternKind::Field,
        PatternKind::Term,
        PatternKind::Regexp,
        PatternKind::Search,
    ];

    /// Stable label, used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Field => "field",
            PatternKind::Term => "term",
            PatternKind::Regexp => "regexp",
            PatternKind::Search => "search",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            PatternKind::Field => 0,
            PatternKind::Term => 1,
            PatternKind::Regexp => 2,
            PatternKind::Search => 3,
        }
    }
}

/// Kind-local cache key: the segment plus field and pattern bytes.
///
/// Fields and terms are arbitrary byte strings; regexp and search patterns
/// are UTF-8 strings stored as bytes. The pattern is empty for the `Field`
/// kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubKey {
    pub segment: SegmentId,
    pub field: Vec<u8>,
    pub pattern: Vec<u8>,
}

impl SubKey {
    pub fn new(segment: SegmentId, field: impl Into<Vec<u8>>, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            segment,
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Stable hash used for shard selection
    pub(crate) fn shard_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Value stored in the cache: the postings handle plus, for search entries,
/// the query that produced it.
#[derive(Clone)]
pub(crate) struct CachedPostings {
    pub postings: PostingsList,
    pub query: Option<Arc<dyn Query>>,
}

impl CachedPostings {
    pub fn postings(postings: PostingsList) -> Self {
        Self {
            postings,
            query: None,
        }
    }

    pub fn search(postings: PostingsList, query: Option<Arc<dyn Query>>) -> Self {
        Self { postings, query }
    }
}

/// One cached entry as seen by `cached_patterns` visitors.
#[derive(Clone)]
pub struct CachedPattern {
    pub kind: PatternKind,
    pub field: Vec<u8>,
    pub pattern: Vec<u8>,
    pub postings: PostingsList,
    /// Present for search entries stored with their originating query
    pub query: Option<Arc<dyn Query>>,
}
