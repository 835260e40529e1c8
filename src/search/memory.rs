// src/search/memory.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{match_strength, SearchBackend};
use crate::error::SearchError;
use crate::model::{DomainId, SearchDocument, SearchHit};

/// In-process search index. `set_offline(true)` makes every call fail, which
/// is how fail-open behaviour is exercised.
#[derive(Debug, Default)]
pub struct MemorySearch {
    docs: Mutex<Vec<SearchDocument>>,
    offline: AtomicBool,
}

impl MemorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents<I: IntoIterator<Item = SearchDocument>>(docs: I) -> Self {
        Self {
            docs: Mutex::new(docs.into_iter().collect()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), SearchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SearchError::Unavailable("memory index offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for MemorySearch {
    async fn index_document(&self, doc: &SearchDocument) -> Result<(), SearchError> {
        self.check_online()?;
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| SearchError::Unavailable("index mutex poisoned".to_string()))?;
        docs.retain(|d| d.entry_id != doc.entry_id);
        docs.push(doc.clone());
        Ok(())
    }

    async fn find_similar_titles(
        &self,
        title: &str,
        domain_id: DomainId,
        date: NaiveDate,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.check_online()?;
        let docs = self
            .docs
            .lock()
            .map_err(|_| SearchError::Unavailable("index mutex poisoned".to_string()))?;
        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|d| d.domain_id == domain_id && d.ingested_on == date)
            .map(|d| SearchHit {
                entry_id: d.entry_id,
                title: d.title.clone(),
                score: match_strength(title, &d.title),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
