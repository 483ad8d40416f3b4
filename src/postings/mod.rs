//! Postings list handles
//!
//! A postings list is the set of document ids matching a predicate, in
//! document-id order. Cached postings are handed out by shared handle so a
//! hit costs an `Arc` clone, not a bitmap copy.

use std::sync::Arc;

use roaring::RoaringBitmap;

/// Dense document id within a segment (0..doc_count)
pub type DocId = u32;

/// Owning handle to a postings list.
///
/// Backed by a roaring bitmap behind an `Arc`, so clones are cheap and the
/// same decoded postings can live in the cache and in query execution at
/// once.
#[derive(Clone, Debug, Default)]
pub struct PostingsList {
    bitmap: Arc<RoaringBitmap>,
}

impl PostingsList {
    /// Create an empty postings list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a postings list covering a dense doc-id range
    pub fn from_range(range: std::ops::Range<DocId>) -> Self {
        let mut bitmap = RoaringBitmap::new();
        bitmap.insert_range(range);
        Self {
            bitmap: Arc::new(bitmap),
        }
    }

    /// Check whether a document id is present
    pub fn contains(&self, doc: DocId) -> bool {
        self.bitmap.contains(doc)
    }

    /// Number of document ids in the list
    pub fn len(&self) -> u64 {
        self.bitmap.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Iterate document ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
        self.bitmap.iter()
    }

    /// Estimate of the heap memory retained by this list.
    ///
    /// Used by the cache to account entries against a byte budget. The
    /// estimate is the bitmap's serialized size plus the handle itself; it
    /// does not need to be exact, only monotone in the real footprint.
    pub fn memory_bytes(&self) -> u64 {
        (self.bitmap.serialized_size() + std::mem::size_of::<Self>()) as u64
    }

    /// Set intersection
    pub fn intersect(&self, other: &PostingsList) -> PostingsList {
        PostingsList::from(self.bitmap.as_ref() & other.bitmap.as_ref())
    }

    /// Set union
    pub fn union(&self, other: &PostingsList) -> PostingsList {
        PostingsList::from(self.bitmap.as_ref() | other.bitmap.as_ref())
    }

    /// Access the underlying bitmap
    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }
}

impl From<RoaringBitmap> for PostingsList {
    fn from(bitmap: RoaringBitmap) -> Self {
        Self {
            bitmap: Arc::new(bitmap),
        }
    }
}

impl FromIterator<DocId> for PostingsList {
    fn from_iter<T: IntoIterator<Item = DocId>>(iter: T) -> Self {
        Self::from(RoaringBitmap::from_iter(iter))
    }
}

impl PartialEq for PostingsList {
    fn eq(&self, other: &Self) -> bool {
        self.bitmap == other.bitmap
    }
}

impl Eq for PostingsList {}
