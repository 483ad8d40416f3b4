//! FST-backed in-memory segment
//!
//! A sealed segment built from a batch of documents. The term dictionary is
//! an FST map keyed `field \x00 term` whose values index a postings table;
//! field-presence postings are kept per field. Readers share the sealed
//! state behind an `Arc`, so a closed segment stays readable for readers
//! created before the close.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fst::{IntoStreamer, Map, MapBuilder, Streamer};
use roaring::RoaringBitmap;

use crate::error::{Result, SepiaError};
use crate::postings::{DocId, PostingsList};
use crate::search::{Query, Searcher};
use crate::segment::reader::{
    FieldsIterator, FieldsPostingsListIterator, MetadataIterator, Segment, SegmentReader,
    TermsIterator,
};
use crate::segment::types::{CompiledRegex, DocMetadata};

const FIELD_SEPARATOR: u8 = 0x00;

fn term_key(field: &[u8], term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 1 + term.len());
    key.extend_from_slice(field);
    key.push(FIELD_SEPARATOR);
    key.extend_from_slice(term);
    key
}

struct MemSegmentInner {
    /// FST mapping `field \x00 term` to an index into `term_postings`
    term_dict: Map<Vec<u8>>,
    term_postings: Vec<PostingsList>,
    /// Field-presence postings, sorted by field name
    fields: Vec<(Vec<u8>, PostingsList)>,
    field_index: HashMap<Vec<u8>, usize>,
    docs: Vec<DocMetadata>,
    id_index: HashMap<Vec<u8>, DocId>,
}

impl MemSegmentInner {
    fn field_postings(&self, field: &[u8]) -> Option<&PostingsList> {
        self.field_index.get(field).map(|&idx| &self.fields[idx].1)
    }

    /// Walk the `[field\x00, field\x01)` range of the term dictionary
    fn terms_of_field(&self, field: &[u8]) -> Vec<(Vec<u8>, PostingsList)> {
        let lower = term_key(field, b"");
        let mut upper = field.to_vec();
        upper.push(FIELD_SEPARATOR + 1);

        let mut results = Vec::new();
        let mut stream = self.term_dict.range().ge(&lower).lt(&upper).into_stream();
        while let Some((key, slot)) = stream.next() {
            let term = key[field.len() + 1..].to_vec();
            results.push((term, self.term_postings[slot as usize].clone()));
        }
        results
    }
}

/// Builder for in-memory segments. Documents are indexed in insertion
/// order; their dense doc ids are the insertion positions.
#[derive(Default)]
pub struct MemSegmentBuilder {
    docs: Vec<DocMetadata>,
}

impl MemSegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, doc: DocMetadata) -> &mut Self {
        self.docs.push(doc);
        self
    }

    pub fn build(self) -> Result<MemSegment> {
        let mut id_index = HashMap::new();
        let mut term_map: BTreeMap<Vec<u8>, RoaringBitmap> = BTreeMap::new();
        let mut field_map: BTreeMap<Vec<u8>, RoaringBitmap> = BTreeMap::new();

        for (doc_id, doc) in self.docs.iter().enumerate() {
            let doc_id = doc_id as DocId;
            if id_index.insert(doc.id.clone(), doc_id).is_some() {
                return Err(SepiaError::Internal(format!(
                    "duplicate document id: {}",
                    String::from_utf8_lossy(&doc.id)
                )));
            }
            for field in &doc.fields {
                if field.name.contains(&FIELD_SEPARATOR) {
                    return Err(SepiaError::Internal(format!(
                        "field name contains NUL byte: {}",
                        String::from_utf8_lossy(&field.name)
                    )));
                }
                term_map
                    .entry(term_key(&field.name, &field.value))
                    .or_default()
                    .insert(doc_id);
                field_map
                    .entry(field.name.clone())
                    .or_default()
                    .insert(doc_id);
            }
        }

        let mut builder = MapBuilder::memory();
        let mut term_postings = Vec::with_capacity(term_map.len());
        for (slot, (key, bitmap)) in term_map.into_iter().enumerate() {
            builder.insert(key, slot as u64)?;
            term_postings.push(PostingsList::from(bitmap));
        }
        let term_dict = Map::new(builder.into_inner()?)?;

        let fields: Vec<(Vec<u8>, PostingsList)> = field_map
            .into_iter()
            .map(|(name, bitmap)| (name, PostingsList::from(bitmap)))
            .collect();
        let field_index = fields
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| (name.clone(), idx))
            .collect();

        Ok(MemSegment {
            inner: Arc::new(MemSegmentInner {
                term_dict,
                term_postings,
                fields,
                field_index,
                docs: self.docs,
                id_index,
            }),
            closed: AtomicBool::new(false),
        })
    }
}

/// Sealed, immutable in-memory segment
pub struct MemSegment {
    inner: Arc<MemSegmentInner>,
    closed: AtomicBool,
}

impl Segment for MemSegment {
    fn reader(&self) -> Result<Box<dyn SegmentReader>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SepiaError::SegmentClosed);
        }
        Ok(Box::new(MemSegmentReader {
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SepiaError::AlreadyClosed);
        }
        Ok(())
    }

    fn size(&self) -> i64 {
        self.inner.docs.len() as i64
    }

    fn contains_id(&self, id: &[u8]) -> Result<bool> {
        Ok(self.inner.id_index.contains_key(id))
    }

    fn contains_field(&self, field: &[u8]) -> Result<bool> {
        Ok(self.inner.field_index.contains_key(field))
    }

    fn fields_iterable(&self) -> Result<FieldsIterator> {
        let names: Vec<Vec<u8>> = self.inner.fields.iter().map(|(n, _)| n.clone()).collect();
        Ok(Box::new(names.into_iter()))
    }

    fn terms_iterable(&self, field: &[u8]) -> Result<TermsIterator> {
        Ok(Box::new(self.inner.terms_of_field(field).into_iter()))
    }

    fn free_mmap(&self) -> Result<()> {
        // Nothing mapped; the segment is heap resident
        Ok(())
    }
}

struct MemSegmentReader {
    inner: Arc<MemSegmentInner>,
    closed: AtomicBool,
}

impl MemSegmentReader {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SepiaError::ReaderClosed);
        }
        Ok(())
    }

    fn docs_for(&self, postings: &PostingsList) -> Vec<DocMetadata> {
        postings
            .iter()
            .filter_map(|id| self.inner.docs.get(id as usize).cloned())
            .collect()
    }
}

impl SegmentReader for MemSegmentReader {
    fn match_term(&self, field: &[u8], term: &[u8]) -> Result<PostingsList> {
        self.ensure_open()?;
        Ok(self
            .inner
            .term_dict
            .get(term_key(field, term))
            .map(|slot| self.inner.term_postings[slot as usize].clone())
            .unwrap_or_default())
    }

    fn match_regexp(&self, field: &[u8], regex: &CompiledRegex) -> Result<PostingsList> {
        self.ensure_open()?;
        let mut acc = RoaringBitmap::new();
        for (term, postings) in self.inner.terms_of_field(field) {
            if regex.is_match(&term) {
                acc |= postings.bitmap();
            }
        }
        Ok(PostingsList::from(acc))
    }

    fn match_field(&self, field: &[u8]) -> Result<PostingsList> {
        self.ensure_open()?;
        Ok(self
            .inner
            .field_postings(field)
            .cloned()
            .unwrap_or_default())
    }

    fn match_all(&self) -> Result<PostingsList> {
        self.ensure_open()?;
        Ok(PostingsList::from_range(0..self.inner.docs.len() as DocId))
    }

    fn search(&self, _query: &dyn Query, searcher: &mut dyn Searcher) -> Result<PostingsList> {
        self.ensure_open()?;
        searcher.search(self)
    }

    fn all_docs(&self) -> Result<MetadataIterator> {
        self.ensure_open()?;
        Ok(Box::new(self.inner.docs.clone().into_iter()))
    }

    fn metadata(&self, id: DocId) -> Result<DocMetadata> {
        self.ensure_open()?;
        self.inner
            .docs
            .get(id as usize)
            .cloned()
            .ok_or(SepiaError::DocNotFound(id))
    }

    fn metadata_iterator(&self, postings: &PostingsList) -> Result<MetadataIterator> {
        self.ensure_open()?;
        Ok(Box::new(self.docs_for(postings).into_iter()))
    }

    fn doc(&self, id: DocId) -> Result<DocMetadata> {
        self.metadata(id)
    }

    fn docs(&self, postings: &PostingsList) -> Result<MetadataIterator> {
        self.metadata_iterator(postings)
    }

    fn fields(&self) -> Result<FieldsIterator> {
        self.ensure_open()?;
        let names: Vec<Vec<u8>> = self.inner.fields.iter().map(|(n, _)| n.clone()).collect();
        Ok(Box::new(names.into_iter()))
    }

    fn fields_postings_list(&self) -> Result<FieldsPostingsListIterator> {
        self.ensure_open()?;
        Ok(Box::new(self.inner.fields.clone().into_iter()))
    }

    fn contains_field(&self, field: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.field_index.contains_key(field))
    }

    fn terms(&self, field: &[u8]) -> Result<TermsIterator> {
        self.ensure_open()?;
        Ok(Box::new(self.inner.terms_of_field(field).into_iter()))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SepiaError::ReaderClosed);
        }
        Ok(())
    }
}
