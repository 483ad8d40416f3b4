//! End-to-end tests for read-through postings caching
//!
//! These wrap an in-memory segment in a counting shim so each scenario can
//! assert how often the underlying reader was actually consulted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use sepia::postings::{DocId, PostingsList};
use sepia::search::{self, ConjunctionQuery, Query, TermQuery};
use sepia::segment::{
    DocField, DocMetadata, FieldsIterator, FieldsPostingsListIterator, MemSegment,
    MemSegmentBuilder, MetadataIterator, Segment, SegmentReader, TermsIterator,
};
use sepia::{
    CacheCapacity, CompiledRegex, PatternKind, PostingsCacheConfig, PostingsListCache,
    ReadThroughSegment, ReadThroughSegmentCaches, ReadThroughSegmentOptions, Result,
};
use sepia::search::Searcher;

#[derive(Clone, Default)]
struct Counters {
    term: Arc<AtomicUsize>,
    regexp: Arc<AtomicUsize>,
    field: Arc<AtomicUsize>,
}

impl Counters {
    fn term_calls(&self) -> usize {
        self.term.load(Ordering::SeqCst)
    }

    fn regexp_calls(&self) -> usize {
        self.regexp.load(Ordering::SeqCst)
    }

    fn field_calls(&self) -> usize {
        self.field.load(Ordering::SeqCst)
    }
}

/// Segment shim that counts underlying match invocations
struct CountingSegment {
    inner: MemSegment,
    counters: Counters,
}

impl CountingSegment {
    fn new(inner: MemSegment) -> (Self, Counters) {
        let counters = Counters::default();
        (
            Self {
                inner,
                counters: counters.clone(),
            },
            counters,
        )
    }
}

impl Segment for CountingSegment {
    fn reader(&self) -> Result<Box<dyn SegmentReader>> {
        Ok(Box::new(CountingReader {
            inner: self.inner.reader()?,
            counters: self.counters.clone(),
        }))
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn size(&self) -> i64 {
        self.inner.size()
    }

    fn contains_id(&self, id: &[u8]) -> Result<bool> {
        self.inner.contains_id(id)
    }

    fn contains_field(&self, field: &[u8]) -> Result<bool> {
        self.inner.contains_field(field)
    }

    fn fields_iterable(&self) -> Result<FieldsIterator> {
        self.inner.fields_iterable()
    }

    fn terms_iterable(&self, field: &[u8]) -> Result<TermsIterator> {
        self.inner.terms_iterable(field)
    }

    fn free_mmap(&self) -> Result<()> {
        self.inner.free_mmap()
    }
}

struct CountingReader {
    inner: Box<dyn SegmentReader>,
    counters: Counters,
}

impl SegmentReader for CountingReader {
    fn match_term(&self, field: &[u8], term: &[u8]) -> Result<PostingsList> {
        self.counters.term.fetch_add(1, Ordering::SeqCst);
        self.inner.match_term(field, term)
    }

    fn match_regexp(&self, field: &[u8], regex: &CompiledRegex) -> Result<PostingsList> {
        self.counters.regexp.fetch_add(1, Ordering::SeqCst);
        self.inner.match_regexp(field, regex)
    }

    fn match_field(&self, field: &[u8]) -> Result<PostingsList> {
        self.counters.field.fetch_add(1, Ordering::SeqCst);
        self.inner.match_field(field)
    }

    fn match_all(&self) -> Result<PostingsList> {
        self.inner.match_all()
    }

    fn search(&self, _query: &dyn Query, searcher: &mut dyn Searcher) -> Result<PostingsList> {
        searcher.search(self)
    }

    fn all_docs(&self) -> Result<MetadataIterator> {
        self.inner.all_docs()
    }

    fn metadata(&self, id: DocId) -> Result<DocMetadata> {
        self.inner.metadata(id)
    }

    fn metadata_iterator(&self, postings: &PostingsList) -> Result<MetadataIterator> {
        self.inner.metadata_iterator(postings)
    }

    fn doc(&self, id: DocId) -> Result<DocMetadata> {
        self.inner.doc(id)
    }

    fn docs(&self, postings: &PostingsList) -> Result<MetadataIterator> {
        self.inner.docs(postings)
    }

    fn fields(&self) -> Result<FieldsIterator> {
        self.inner.fields()
    }

    fn fields_postings_list(&self) -> Result<FieldsPostingsListIterator> {
        self.inner.fields_postings_list()
    }

    fn contains_field(&self, field: &[u8]) -> Result<bool> {
        self.inner.contains_field(field)
    }

    fn terms(&self, field: &[u8]) -> Result<TermsIterator> {
        self.inner.terms(field)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

fn color_shape_segment() -> MemSegment {
    let mut builder = MemSegmentBuilder::new();
    builder.add_document(DocMetadata::new(
        "doc1",
        vec![
            DocField::new("color", "red"),
            DocField::new("shape", "square"),
        ],
    ));
    builder.add_document(DocMetadata::new(
        "doc2",
        vec![
            DocField::new("color", "red"),
            DocField::new("shape", "circle"),
        ],
    ));
    builder.build().unwrap()
}

fn default_caches() -> ReadThroughSegmentCaches {
    ReadThroughSegmentCaches {
        segment_cache: Some(Arc::new(PostingsListCache::new(
            PostingsCacheConfig::default(),
        ))),
        search_cache: Some(Arc::new(PostingsListCache::new(
            PostingsCacheConfig::default(),
        ))),
    }
}

fn wrap(
    segment: MemSegment,
    caches: ReadThroughSegmentCaches,
) -> (ReadThroughSegment, Counters) {
    let (counting, counters) = CountingSegment::new(segment);
    let rts = ReadThroughSegment::new(
        Box::new(counting),
        caches,
        ReadThroughSegmentOptions::default(),
    );
    (rts, counters)
}

#[test]
fn test_term_hit_and_miss() {
    let caches = default_caches();
    let (rts, counters) = wrap(color_shape_segment(), caches.clone());
    let reader = rts.reader().unwrap();

    let cold = reader.match_term(b"color", b"red").unwrap();
    assert_eq!(cold.iter().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(counters.term_calls(), 1);

    let warm = reader.match_term(b"color", b"red").unwrap();
    assert_eq!(warm, cold);
    assert_eq!(counters.term_calls(), 1);

    // A second reader shares the warmed cache
    let other = rts.reader().unwrap();
    assert_eq!(other.match_term(b"color", b"red").unwrap(), cold);
    assert_eq!(counters.term_calls(), 1);
}

#[test]
fn test_regexp_canonicalisation_shares_slot() {
    let caches = default_caches();
    let (rts, counters) = wrap(color_shape_segment(), caches.clone());
    let reader = rts.reader().unwrap();

    let plain = CompiledRegex::new("squa.*").unwrap();
    let anchored = CompiledRegex::new("^squa.*$").unwrap();

    let first = reader.match_regexp(b"shape", &plain).unwrap();
    let second = reader.match_regexp(b"shape", &anchored).unwrap();
    assert_eq!(first, second);
    assert_eq!(counters.regexp_calls(), 1);
    assert_eq!(caches.segment_cache.as_ref().unwrap().len(), 1);
}

#[test]
fn test_purge_on_close_empties_every_kind() {
    let caches = default_caches();
    let segment_cache = caches.segment_cache.clone().unwrap();
    let search_cache = caches.search_cache.clone().unwrap();
    let (rts, _counters) = wrap(color_shape_segment(), caches);
    let reader = rts.reader().unwrap();

    reader.match_term(b"color", b"red").unwrap();
    reader
        .match_regexp(b"shape", &CompiledRegex::new("sq.*").unwrap())
        .unwrap();
    reader.match_field(b"color").unwrap();
    let query = TermQuery::new("shape", "circle");
    search::execute(reader.as_ref(), &query).unwrap();

    assert_eq!(segment_cache.len(), 3);
    assert_eq!(search_cache.len(), 1);

    rts.close().unwrap();

    assert_eq!(segment_cache.len(), 0);
    assert_eq!(search_cache.len(), 0);
    assert!(segment_cache.get_term(rts.id(), b"color", b"red").is_none());

    let mut visited = 0;
    let result = rts.cached_search_patterns(|_| visited += 1);
    assert_eq!(visited, 0);
    assert_eq!(result.result.total_patterns, 0);
}

#[test]
fn test_capacity_eviction_order() {
    // Term cache capped at three entries in one shard so recency order is
    // exact: after K1..K4, K1 is gone; touching K2 makes K3 the next victim.
    let cache = Arc::new(PostingsListCache::new(
        PostingsCacheConfig::default()
            .with_shards_per_kind(1)
            .with_capacity(PatternKind::Term, CacheCapacity::entries(3)),
    ));

    let mut builder = MemSegmentBuilder::new();
    builder.add_document(DocMetadata::new(
        "doc1",
        vec![
            DocField::new("k", "1"),
            DocField::new("k", "2"),
            DocField::new("k", "3"),
            DocField::new("k", "4"),
            DocField::new("k", "5"),
        ],
    ));
    let (rts, _counters) = wrap(
        builder.build().unwrap(),
        ReadThroughSegmentCaches {
            segment_cache: Some(cache.clone()),
            search_cache: None,
        },
    );
    let reader = rts.reader().unwrap();

    for term in [b"1", b"2", b"3", b"4"] {
        reader.match_term(b"k", term).unwrap();
    }
    assert!(cache.get_term(rts.id(), b"k", b"1").is_none());
    assert!(cache.get_term(rts.id(), b"k", b"2").is_some());

    // K2 was just touched; inserting K5 must evict K3, not K2
    reader.match_term(b"k", b"5").unwrap();
    assert!(cache.get_term(rts.id(), b"k", b"3").is_none());
    assert!(cache.get_term(rts.id(), b"k", b"2").is_some());
    assert!(cache.get_term(rts.id(), b"k", b"4").is_some());
    assert!(cache.get_term(rts.id(), b"k", b"5").is_some());
}

#[test]
fn test_segment_scoped_purge_leaves_siblings() {
    let caches = default_caches();
    let cache = caches.segment_cache.clone().unwrap();
    let (rts_a, _) = wrap(color_shape_segment(), caches.clone());
    let (rts_b, _) = wrap(color_shape_segment(), caches.clone());

    rts_a
        .reader()
        .unwrap()
        .match_term(b"color", b"red")
        .unwrap();
    rts_b
        .reader()
        .unwrap()
        .match_term(b"color", b"red")
        .unwrap();
    assert_eq!(cache.len(), 2);

    rts_a.close().unwrap();

    assert_eq!(cache.len(), 1);
    assert!(cache.get_term(rts_a.id(), b"color", b"red").is_none());
    assert!(cache.get_term(rts_b.id(), b"color", b"red").is_some());

    // The survivor still serves warm reads
    assert_eq!(
        rts_b
            .reader()
            .unwrap()
            .match_term(b"color", b"red")
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn test_concurrent_racing_fills_store_once() {
    let caches = default_caches();
    let cache = caches.segment_cache.clone().unwrap();
    let (rts, counters) = wrap(color_shape_segment(), caches);
    let rts = Arc::new(rts);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let expected: PostingsList = [0u32, 1].into_iter().collect();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let rts = Arc::clone(&rts);
            let barrier = Arc::clone(&barrier);
            let expected = expected.clone();
            thread::spawn(move || {
                let reader = rts.reader().unwrap();
                barrier.wait();
                let postings = reader.match_term(b"color", b"red").unwrap();
                assert_eq!(postings, expected);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Racers may each have computed, but exactly one entry survives
    assert_eq!(cache.len(), 1);
    let calls = counters.term_calls();
    assert!(calls >= 1 && calls <= threads);
    assert_eq!(
        cache.get_term(rts.id(), b"color", b"red"),
        Some(expected)
    );
}

#[test]
fn test_compound_search_caches_at_both_levels() {
    let caches = default_caches();
    let segment_cache = caches.segment_cache.clone().unwrap();
    let search_cache = caches.search_cache.clone().unwrap();
    let (rts, counters) = wrap(color_shape_segment(), caches);
    let reader = rts.reader().unwrap();

    let query = ConjunctionQuery::new(vec![
        Arc::new(TermQuery::new("color", "red")),
        Arc::new(TermQuery::new("shape", "square")),
    ]);

    let cold = search::execute(reader.as_ref(), &query).unwrap();
    assert_eq!(cold.iter().collect::<Vec<_>>(), vec![0]);
    assert_eq!(counters.term_calls(), 2);
    assert_eq!(search_cache.len(), 1);
    assert_eq!(segment_cache.len(), 2);

    // Warm: neither the search nor its leaves touch the underlying reader
    let warm = search::execute(reader.as_ref(), &query).unwrap();
    assert_eq!(warm, cold);
    assert_eq!(counters.term_calls(), 2);

    // A different query sharing one leaf reuses that leaf's entry
    let overlapping = ConjunctionQuery::new(vec![
        Arc::new(TermQuery::new("color", "red")),
        Arc::new(TermQuery::new("shape", "circle")),
    ]);
    let other = search::execute(reader.as_ref(), &overlapping).unwrap();
    assert_eq!(other.iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(counters.term_calls(), 3);
}

#[test]
fn test_disabled_kinds_are_true_bypass() {
    let caches = default_caches();
    let (counting, counters) = CountingSegment::new(color_shape_segment());
    let rts = ReadThroughSegment::new(
        Box::new(counting),
        caches.clone(),
        ReadThroughSegmentOptions {
            cache_terms: false,
            cache_regexp: true,
            cache_searches: true,
        },
    );
    let reader = rts.reader().unwrap();

    reader.match_term(b"color", b"red").unwrap();
    reader.match_term(b"color", b"red").unwrap();
    assert_eq!(counters.term_calls(), 2);
    assert_eq!(caches.segment_cache.as_ref().unwrap().len(), 0);

    // Regexp caching is still on
    let regex = CompiledRegex::new("c.*").unwrap();
    reader.match_regexp(b"shape", &regex).unwrap();
    reader.match_regexp(b"shape", &regex).unwrap();
    assert_eq!(counters.regexp_calls(), 1);
}

#[test]
fn test_pass_throughs_never_populate_cache() {
    let caches = default_caches();
    let cache = caches.segment_cache.clone().unwrap();
    let (rts, counters) = wrap(color_shape_segment(), caches);
    let reader = rts.reader().unwrap();

    reader.match_all().unwrap();
    reader.all_docs().unwrap().count();
    reader.metadata(0).unwrap();
    reader.fields().unwrap().count();
    reader.terms(b"color").unwrap().count();
    assert!(reader.contains_field(b"color").unwrap());

    assert_eq!(cache.len(), 0);
    assert_eq!(counters.term_calls(), 0);
    assert_eq!(counters.field_calls(), 0);
}
