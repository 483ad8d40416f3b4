//! Read-through segment wrapper
//!
//! Wraps a segment with postings list caches so queries are transparently
//! memoised. Cached postings may be views into the segment's mapped bytes,
//! so `close` purges every entry keyed by this segment *before* the
//! underlying segment is closed; readers created before the close may keep
//! handles they already obtained, which is governed by reference counting in
//! the layer above.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::{CachedPattern, CachedPatternsQuery, CachedPatternsResult, PatternKind, PostingsListCache};
use crate::config::ReadThroughSegmentOptions;
use crate::error::{Result, SepiaError};
use crate::postings::{DocId, PostingsList};
use crate::search::{Query, Searcher};
use crate::segment::reader::{
    FieldsIterator, FieldsPostingsListIterator, MetadataIterator, Segment, SegmentReader,
    TermsIterator,
};
use crate::segment::types::{CompiledRegex, DocMetadata, SegmentId};

/// The caches a read-through segment feeds.
///
/// Term, regexp and field-presence postings go to `segment_cache`; compound
/// search postings go to the separately budgeted `search_cache`. Either may
/// be absent, disabling that side entirely.
#[derive(Clone, Default)]
pub struct ReadThroughSegmentCaches {
    pub segment_cache: Option<Arc<PostingsListCache>>,
    pub search_cache: Option<Arc<PostingsListCache>>,
}

/// Result of visiting a segment's cached search patterns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachedSearchPatternsResult {
    /// True when search caching is disabled for this segment
    pub cache_searches_disabled: bool,
    pub result: CachedPatternsResult,
}

/// A segment wrapped with read-through postings caching.
///
/// Owns the underlying segment exclusively and shares the caches with
/// sibling segments. Generates a fresh 128-bit id so cache entries can never
/// leak between two wrappings of the same file.
pub struct ReadThroughSegment {
    segment: Box<dyn Segment>,
    id: SegmentId,
    caches: ReadThroughSegmentCaches,
    opts: ReadThroughSegmentOptions,
    closed: RwLock<bool>,
}

impl ReadThroughSegment {
    pub fn new(
        segment: Box<dyn Segment>,
        caches: ReadThroughSegmentCaches,
        opts: ReadThroughSegmentOptions,
    ) -> Self {
        Self {
            segment,
            id: SegmentId::new(),
            caches,
            opts,
            closed: RwLock::new(false),
        }
    }

    /// The cache-scoping identity of this wrapping
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Directly insert a precomputed search postings list.
    ///
    /// Used by upper layers that computed a search result out of band. A
    /// no-op when the segment is closed or search caching is disabled.
    pub fn put_cached_search(
        &self,
        query_str: &str,
        query: Arc<dyn Query>,
        postings: PostingsList,
    ) {
        let closed = self.closed.read();
        if *closed {
            return;
        }
        if !self.opts.cache_searches {
            return;
        }
        if let Some(cache) = &self.caches.search_cache {
            cache.put_search(self.id, query_str, Some(query), postings);
        }
    }

    /// Visit the search patterns currently cached for this segment.
    pub fn cached_search_patterns<F>(&self, visitor: F) -> CachedSearchPatternsResult
    where
        F: FnMut(&CachedPattern),
    {
        let cache = match &self.caches.search_cache {
            Some(cache) if self.opts.cache_searches => cache,
            _ => {
                return CachedSearchPatternsResult {
                    cache_searches_disabled: true,
                    ..Default::default()
                }
            }
        };
        let result = cache.cached_patterns(
            &self.id,
            CachedPatternsQuery {
                kind: Some(PatternKind::Search),
            },
            visitor,
        );
        CachedSearchPatternsResult {
            cache_searches_disabled: false,
            result,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(SepiaError::SegmentClosed);
        }
        Ok(())
    }
}

impl Segment for ReadThroughSegment {
    fn reader(&self) -> Result<Box<dyn SegmentReader>> {
        let closed = self.closed.read();
        if *closed {
            return Err(SepiaError::SegmentClosed);
        }
        let reader = self.segment.reader()?;
        Ok(Box::new(ReadThroughReader {
            reader,
            id: self.id,
            caches: self.caches.clone(),
            opts: self.opts,
        }))
    }

    /// Purge every cache entry keyed by this segment, then close the
    /// underlying segment. The order matters: no lookup path may serve
    /// postings whose bytes are about to be unmapped.
    fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Err(SepiaError::AlreadyClosed);
            }
            *closed = true;
        }

        debug!(segment = %self.id, "closing read through segment");
        if let Some(cache) = &self.caches.segment_cache {
            cache.purge_segment(&self.id);
        }
        if let Some(cache) = &self.caches.search_cache {
            cache.purge_segment(&self.id);
        }

        self.segment.close()
    }

    fn size(&self) -> i64 {
        self.segment.size()
    }

    fn contains_id(&self, id: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        self.segment.contains_id(id)
    }

    fn contains_field(&self, field: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        self.segment.contains_field(field)
    }

    fn fields_iterable(&self) -> Result<FieldsIterator> {
        self.ensure_open()?;
        self.segment.fields_iterable()
    }

    fn terms_iterable(&self, field: &[u8]) -> Result<TermsIterator> {
        self.ensure_open()?;
        self.segment.terms_iterable(field)
    }

    fn free_mmap(&self) -> Result<()> {
        self.ensure_open()?;
        self.segment.free_mmap()
    }
}

/// Reader that consults the caches before the wrapped reader.
///
/// The wrapped reader is a named field rather than a blanket delegate so
/// that any operation added to `SegmentReader` must be explicitly routed
/// through (or past) the cache.
pub struct ReadThroughReader {
    reader: Box<dyn SegmentReader>,
    id: SegmentId,
    caches: ReadThroughSegmentCaches,
    opts: ReadThroughSegmentOptions,
}

impl ReadThroughReader {
    fn segment_cache(&self, enabled: bool) -> Option<&PostingsListCache> {
        if !enabled {
            return None;
        }
        self.caches.segment_cache.as_deref()
    }
}

impl SegmentReader for ReadThroughReader {
    fn match_term(&self, field: &[u8], term: &[u8]) -> Result<PostingsList> {
        let cache = match self.segment_cache(self.opts.cache_terms) {
            Some(cache) => cache,
            None => return self.reader.match_term(field, term),
        };
        if let Some(postings) = cache.get_term(self.id, field, term) {
            return Ok(postings);
        }
        let postings = self.reader.match_term(field, term)?;
        cache.put_term(self.id, field, term, postings.clone());
        Ok(postings)
    }

    fn match_regexp(&self, field: &[u8], regex: &CompiledRegex) -> Result<PostingsList> {
        let cache = match self.segment_cache(self.opts.cache_regexp) {
            Some(cache) => cache,
            None => return self.reader.match_regexp(field, regex),
        };
        // Key on the canonical pattern so equivalent spellings share a slot
        let pattern = regex.fst_syntax();
        if let Some(postings) = cache.get_regexp(self.id, field, pattern) {
            return Ok(postings);
        }
        let postings = self.reader.match_regexp(field, regex)?;
        cache.put_regexp(self.id, field, pattern, postings.clone());
        Ok(postings)
    }

    fn match_field(&self, field: &[u8]) -> Result<PostingsList> {
        let cache = match self.segment_cache(self.opts.cache_terms) {
            Some(cache) => cache,
            None => return self.reader.match_field(field),
        };
        if let Some(postings) = cache.get_field(self.id, field) {
            return Ok(postings);
        }
        let postings = self.reader.match_field(field)?;
        cache.put_field(self.id, field, postings.clone());
        Ok(postings)
    }

    /// Pass through: the result is a dense range over the segment's doc ids
    /// and costs nothing to recompute.
    fn match_all(&self) -> Result<PostingsList> {
        self.reader.match_all()
    }

    /// Memoise a compound search by its canonical query string. The
    /// searcher runs against *this* reader, so its term and regexp leaves
    /// are themselves read-through.
    fn search(&self, query: &dyn Query, searcher: &mut dyn Searcher) -> Result<PostingsList> {
        let cache = match (&self.caches.search_cache, self.opts.cache_searches) {
            (Some(cache), true) => cache,
            _ => return searcher.search(self),
        };
        let query_str = query.canonical();
        if let Some(postings) = cache.get_search(self.id, &query_str) {
            return Ok(postings);
        }
        let postings = searcher.search(self)?;
        cache.put_search(self.id, &query_str, Some(query.clone_arc()), postings.clone());
        Ok(postings)
    }

    fn all_docs(&self) -> Result<MetadataIterator> {
        self.reader.all_docs()
    }

    fn metadata(&self, id: DocId) -> Result<DocMetadata> {
        self.reader.metadata(id)
    }

    fn metadata_iterator(&self, postings: &PostingsList) -> Result<MetadataIterator> {
        self.reader.metadata_iterator(postings)
    }

    fn doc(&self, id: DocId) -> Result<DocMetadata> {
        self.reader.doc(id)
    }

    fn docs(&self, postings: &PostingsList) -> Result<MetadataIterator> {
        self.reader.docs(postings)
    }

    fn fields(&self) -> Result<FieldsIterator> {
        self.reader.fields()
    }

    fn fields_postings_list(&self) -> Result<FieldsPostingsListIterator> {
        self.reader.fields_postings_list()
    }

    fn contains_field(&self, field: &[u8]) -> Result<bool> {
        self.reader.contains_field(field)
    }

    fn terms(&self, field: &[u8]) -> Result<TermsIterator> {
        self.reader.terms(field)
    }

    fn close(&self) -> Result<()> {
        self.reader.close()
    }
}
