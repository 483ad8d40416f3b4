//! Segment and reader capability traits
//!
//! A `Segment` is a sealed, immutable inverted-index shard; its `reader()`
//! vends independent `SegmentReader` values for query execution. The
//! read-through layer wraps both traits, so anything implementing them picks
//! up postings caching for free.

use crate::error::Result;
use crate::postings::{DocId, PostingsList};
use crate::search::{Query, Searcher};
use crate::segment::types::{CompiledRegex, DocMetadata};

/// Iterator over field names in a segment
pub type FieldsIterator = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// Iterator over (term, postings) pairs for one field
pub type TermsIterator = Box<dyn Iterator<Item = (Vec<u8>, PostingsList)> + Send>;

/// Iterator over (field, field-presence postings) pairs
pub type FieldsPostingsListIterator = Box<dyn Iterator<Item = (Vec<u8>, PostingsList)> + Send>;

/// Iterator over document metadata
pub type MetadataIterator = Box<dyn Iterator<Item = DocMetadata> + Send>;

/// A sealed, immutable inverted-index segment.
pub trait Segment: Send + Sync {
    /// Obtain a new independent reader. Fails once the segment is closed.
    fn reader(&self) -> Result<Box<dyn SegmentReader>>;

    /// Close the segment and release its backing storage. Fails on the
    /// second call.
    fn close(&self) -> Result<()>;

    /// Number of documents in the segment
    fn size(&self) -> i64;

    /// Whether a document with the given external id is present
    fn contains_id(&self, id: &[u8]) -> Result<bool>;

    /// Whether any document carries the given field
    fn contains_field(&self, field: &[u8]) -> Result<bool>;

    /// Iterate the field names present in the segment
    fn fields_iterable(&self) -> Result<FieldsIterator>;

    /// Iterate the terms (with postings) of one field
    fn terms_iterable(&self, field: &[u8]) -> Result<TermsIterator>;

    /// Release memory-mapped backing data, if any
    fn free_mmap(&self) -> Result<()>;
}

/// Query surface of a segment reader.
///
/// Readers are independently closeable; closing a reader does not close its
/// segment. All postings-producing operations are deterministic for an
/// immutable segment, which is what makes read-through caching sound.
pub trait SegmentReader: Send {
    /// Postings for documents where `field == term`
    fn match_term(&self, field: &[u8], term: &[u8]) -> Result<PostingsList>;

    /// Postings for documents where `field` matches the compiled pattern
    fn match_regexp(&self, field: &[u8], regex: &CompiledRegex) -> Result<PostingsList>;

    /// Postings for documents carrying `field` at all
    fn match_field(&self, field: &[u8]) -> Result<PostingsList>;

    /// Postings covering every document in the segment
    fn match_all(&self) -> Result<PostingsList>;

    /// Execute a compound query via the given searcher.
    ///
    /// Implementations normally delegate straight to
    /// `searcher.search(self)`; the read-through reader overrides this to
    /// memoise by the query's canonical string.
    fn search(&self, query: &dyn Query, searcher: &mut dyn Searcher) -> Result<PostingsList>;

    /// Iterate metadata for every document
    fn all_docs(&self) -> Result<MetadataIterator>;

    /// Metadata for one document
    fn metadata(&self, id: DocId) -> Result<DocMetadata>;

    /// Iterate metadata for the documents in a postings list
    fn metadata_iterator(&self, postings: &PostingsList) -> Result<MetadataIterator>;

    /// Stored document for one id
    fn doc(&self, id: DocId) -> Result<DocMetadata>;

    /// Iterate stored documents for the documents in a postings list
    fn docs(&self, postings: &PostingsList) -> Result<MetadataIterator>;

    /// Iterate the field names present in the segment
    fn fields(&self) -> Result<FieldsIterator>;

    /// Iterate (field, field-presence postings) pairs
    fn fields_postings_list(&self) -> Result<FieldsPostingsListIterator>;

    /// Whether any document carries the given field
    fn contains_field(&self, field: &[u8]) -> Result<bool>;

    /// Iterate the terms (with postings) of one field
    fn terms(&self, field: &[u8]) -> Result<TermsIterator>;

    /// Close the reader. Fails on the second call.
    fn close(&self) -> Result<()>;
}
