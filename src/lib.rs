// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod model;
pub mod relink;
pub mod search;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::IngestConfig;
pub use crate::error::{RunError, StoreError};
pub use crate::ingest::poller::{FeedFetcher, HttpFetcher};
pub use crate::ingest::{IngestOptions, IngestPipeline, IngestStats, SourceFilter};
pub use crate::matcher::KeywordMatcher;
pub use crate::relink::{RelinkJob, RelinkStats};
pub use crate::search::{ElasticSearch, MemorySearch, SearchBackend};
pub use crate::store::{MemoryStore, NewsStore, StoreTransaction};
