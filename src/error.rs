use thiserror::Error;

/// Main error type for sepia operations
#[derive(Error, Debug)]
pub enum SepiaError {
    #[error("cannot get reader from closed segment")]
    SegmentClosed,

    #[error("cannot close an already closed segment")]
    AlreadyClosed,

    #[error("reader is closed")]
    ReaderClosed,

    #[error("document not found: {0}")]
    DocNotFound(u32),

    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("term dictionary error: {0}")]
    TermDict(#[from] fst::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for sepia operations
pub type Result<T> = std::result::Result<T, SepiaError>;

impl SepiaError {
    /// Check whether the error indicates use of a closed segment or reader
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            SepiaError::SegmentClosed | SepiaError::AlreadyClosed | SepiaError::ReaderClosed
        )
    }
}
