//! Core types for segments and segment-scoped caching

use std::fmt;

use uuid::Uuid;

use crate::error::Result;

/// Segment identifier, unique per segment *instance*.
///
/// Two segments opened over the same file get distinct ids, so cache entries
/// can never leak between instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(Uuid);

impl SegmentId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single field of an indexed document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl DocField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Indexed document metadata: external id plus indexed fields
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocMetadata {
    pub id: Vec<u8>,
    pub fields: Vec<DocField>,
}

impl DocMetadata {
    pub fn new(id: impl Into<Vec<u8>>, fields: Vec<DocField>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Value of the first field with the given name, if any
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_slice())
    }
}

/// A compiled regular expression with a canonical pattern string.
///
/// The canonical form is what the cache keys on: unescaped `^`/`$` anchors
/// are stripped and the body re-wrapped as `^(?:body)$`, so the anchored and
/// unanchored spellings of the same pattern collapse to one cache slot and
/// the key never depends on term-dictionary library internals.
#[derive(Clone, Debug)]
pub struct CompiledRegex {
    regex: regex::bytes::Regex,
    fst_syntax: String,
}

impl CompiledRegex {
    /// Compile a pattern. Matching is whole-term: the pattern is anchored at
    /// both ends regardless of how it was spelled.
    pub fn new(pattern: &str) -> Result<Self> {
        let fst_syntax = format!("^(?:{})$", strip_anchors(pattern));
        let regex = regex::bytes::Regex::new(&fst_syntax)?;
        Ok(Self { regex, fst_syntax })
    }

    /// The canonical pattern string used as the cache key
    pub fn fst_syntax(&self) -> &str {
        &self.fst_syntax
    }

    /// Test a term against the pattern
    pub fn is_match(&self, term: &[u8]) -> bool {
        self.regex.is_match(term)
    }
}

/// Strip an unescaped leading `^` and trailing `$` from a pattern body.
fn strip_anchors(pattern: &str) -> &str {
    let mut body = pattern.strip_prefix('^').unwrap_or(pattern);
    if body.ends_with('$') && !ends_with_escaped_dollar(body) {
        body = &body[..body.len() - 1];
    }
    body
}

/// True when the trailing `$` is escaped (preceded by an odd run of `\`).
fn ends_with_escaped_dollar(body: &str) -> bool {
    let backslashes = body[..body.len() - 1]
        .bytes()
        .rev()
        .take_while(|&b| b == b'\\')
        .count();
    backslashes % 2 == 1
}
