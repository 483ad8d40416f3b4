//! Compound search queries and searchers
//!
//! A `Query` describes a predicate tree and serialises itself to a canonical
//! string; a `Searcher` executes it against a `SegmentReader`. The search
//! cache keys on the canonical string, so two structurally equal queries
//! share one slot. Searchers resolve their leaves through the reader they
//! are handed, which is what makes search read-through two-level: a search
//! miss still produces term and regexp hits against the same cache.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::postings::PostingsList;
use crate::segment::{CompiledRegex, SegmentReader};

/// A search query with a stable canonical string form.
///
/// Canonical strings must be injective over semantically distinct queries;
/// the built-in constructors use a `kind:field:pattern` form with compound
/// nodes serialising their children in order.
pub trait Query: Send + Sync + Debug {
    /// Canonical string form, used as the search cache key
    fn canonical(&self) -> String;

    /// Build a searcher executing this query
    fn searcher(&self) -> Result<Box<dyn Searcher>>;

    /// Clone this query behind a shared handle
    fn clone_arc(&self) -> Arc<dyn Query>;
}

/// Executes a query against a segment reader.
pub trait Searcher: Send {
    fn search(&mut self, reader: &dyn SegmentReader) -> Result<PostingsList>;
}

/// Run a query against a reader via its own searcher.
pub fn execute(reader: &dyn SegmentReader, query: &dyn Query) -> Result<PostingsList> {
    let mut searcher = query.searcher()?;
    reader.search(query, searcher.as_mut())
}

/// Query matching documents where a field equals a term
#[derive(Clone, Debug)]
pub struct TermQuery {
    pub field: String,
    pub term: String,
}

impl TermQuery {
    pub fn new(field: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            term: term.into(),
        }
    }
}

impl Query for TermQuery {
    fn canonical(&self) -> String {
        format!("term:{}:{}", self.field, self.term)
    }

    fn searcher(&self) -> Result<Box<dyn Searcher>> {
        Ok(Box::new(TermSearcher {
            field: self.field.clone(),
            term: self.term.clone(),
        }))
    }

    fn clone_arc(&self) -> Arc<dyn Query> {
        Arc::new(self.clone())
    }
}

struct TermSearcher {
    field: String,
    term: String,
}

impl Searcher for TermSearcher {
    fn search(&mut self, reader: &dyn SegmentReader) -> Result<PostingsList> {
        reader.match_term(self.field.as_bytes(), self.term.as_bytes())
    }
}

/// Query matching documents where a field matches a compiled pattern
#[derive(Clone, Debug)]
pub struct RegexpQuery {
    pub field: String,
    regex: CompiledRegex,
}

impl RegexpQuery {
    pub fn new(field: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            field: field.into(),
            regex: CompiledRegex::new(pattern)?,
        })
    }

    pub fn regex(&self) -> &CompiledRegex {
        &self.regex
    }
}

impl Query for RegexpQuery {
    fn canonical(&self) -> String {
        format!("regexp:{}:{}", self.field, self.regex.fst_syntax())
    }

    fn searcher(&self) -> Result<Box<dyn Searcher>> {
        Ok(Box::new(RegexpSearcher {
            field: self.field.clone(),
            regex: self.regex.clone(),
        }))
    }

    fn clone_arc(&self) -> Arc<dyn Query> {
        Arc::new(self.clone())
    }
}

struct RegexpSearcher {
    field: String,
    regex: CompiledRegex,
}

impl Searcher for RegexpSearcher {
    fn search(&mut self, reader: &dyn SegmentReader) -> Result<PostingsList> {
        reader.match_regexp(self.field.as_bytes(), &self.regex)
    }
}

/// Query matching documents that carry a field at all
#[derive(Clone, Debug)]
pub struct FieldQuery {
    pub field: String,
}

impl FieldQuery {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Query for FieldQuery {
    fn canonical(&self) -> String {
        format!("field:{}", self.field)
    }

    fn searcher(&self) -> Result<Box<dyn Searcher>> {
        let field = self.field.clone();
        Ok(Box::new(FieldSearcher { field }))
    }

    fn clone_arc(&self) -> Arc<dyn Query> {
        Arc::new(self.clone())
    }
}

struct FieldSearcher {
    field: String,
}

impl Searcher for FieldSearcher {
    fn search(&mut self, reader: &dyn SegmentReader) -> Result<PostingsList> {
        reader.match_field(self.field.as_bytes())
    }
}

/// Query matching documents satisfying every child query
#[derive(Clone, Debug, Default)]
pub struct ConjunctionQuery {
    pub queries: Vec<Arc<dyn Query>>,
}

impl ConjunctionQuery {
    pub fn new(queries: Vec<Arc<dyn Query>>) -> Self {
        Self { queries }
    }
}

impl Query for ConjunctionQuery {
    fn canonical(&self) -> String {
        let children: Vec<String> = self.queries.iter().map(|q| q.canonical()).collect();
        format!("conjunction({})", children.join(","))
    }

    fn searcher(&self) -> Result<Box<dyn Searcher>> {
        let searchers = self
            .queries
            .iter()
            .map(|q| q.searcher())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(ConjunctionSearcher { searchers }))
    }

    fn clone_arc(&self) -> Arc<dyn Query> {
        Arc::new(self.clone())
    }
}

struct ConjunctionSearcher {
    searchers: Vec<Box<dyn Searcher>>,
}

impl Searcher for ConjunctionSearcher {
    fn search(&mut self, reader: &dyn SegmentReader) -> Result<PostingsList> {
        // An empty conjunction matches everything
        let mut iter = self.searchers.iter_mut();
        let mut result = match iter.next() {
            Some(first) => first.search(reader)?,
            None => return reader.match_all(),
        };
        for searcher in iter {
            if result.is_empty() {
                break;
            }
            result = result.intersect(&searcher.search(reader)?);
        }
        Ok(result)
    }
}

/// Query matching documents satisfying any child query
#[derive(Clone, Debug, Default)]
pub struct DisjunctionQuery {
    pub queries: Vec<Arc<dyn Query>>,
}

impl DisjunctionQuery {
    pub fn new(queries: Vec<Arc<dyn Query>>) -> Self {
        Self { queries }
    }
}

impl Query for DisjunctionQuery {
    fn canonical(&self) -> String {
        let children: Vec<String> = self.queries.iter().map(|q| q.canonical()).collect();
        format!("disjunction({})", children.join(","))
    }

    fn searcher(&self) -> Result<Box<dyn Searcher>> {
        let searchers = self
            .queries
            .iter()
            .map(|q| q.searcher())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(DisjunctionSearcher { searchers }))
    }

    fn clone_arc(&self) -> Arc<dyn Query> {
        Arc::new(self.clone())
    }
}

struct DisjunctionSearcher {
    searchers: Vec<Box<dyn Searcher>>,
}

impl Searcher for DisjunctionSearcher {
    fn search(&mut self, reader: &dyn SegmentReader) -> Result<PostingsList> {
        let mut result = PostingsList::new();
        for searcher in &mut self.searchers {
            result = result.union(&searcher.search(reader)?);
        }
        Ok(result)
    }
}
