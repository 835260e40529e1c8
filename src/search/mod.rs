// src/search/mod.rs
//! Search-backend seam used for fuzzy duplicate detection.
//!
//! Contract: `find_similar_titles` returns hits restricted to one domain and
//! one ingestion day, each carrying a match strength in `0.0..=1.0`
//! (see [`match_strength`]). Callers apply their own threshold.

pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;

use crate::error::SearchError;
use crate::model::{DomainId, SearchDocument, SearchHit};

pub use elastic::ElasticSearch;
pub use memory::MemorySearch;

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn index_document(&self, doc: &SearchDocument) -> Result<(), SearchError>;

    async fn find_similar_titles(
        &self,
        title: &str,
        domain_id: DomainId,
        date: NaiveDate,
    ) -> Result<Vec<SearchHit>, SearchError>;

    fn name(&self) -> &'static str;
}

/// Distinct lowercase word tokens.
pub fn title_tokens(title: &str) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// "Minimum should match" strength: share of the query's tokens that also
/// occur in `candidate`.
pub fn match_strength(query: &str, candidate: &str) -> f32 {
    let q = title_tokens(query);
    if q.is_empty() {
        return 0.0;
    }
    let c = title_tokens(candidate);
    let hit = q.iter().filter(|t| c.contains(*t)).count();
    hit as f32 / q.len() as f32
}
