pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod postings;
pub mod search;
pub mod segment;

pub use cache::{CachedPattern, CachedPatternsQuery, CachedPatternsResult, PatternKind, PostingsListCache};
pub use config::{CacheCapacity, PostingsCacheConfig, ReadThroughSegmentOptions};
pub use error::{Result, SepiaError};
pub use metrics::CacheMetrics;
pub use postings::{DocId, PostingsList};
pub use segment::{
    CompiledRegex, ReadThroughSegment, ReadThroughSegmentCaches, Segment, SegmentId,
    SegmentReader,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
