// src/ingest/dedup.rs
//! Two-tier duplicate detection: exact guid against the store, fuzzy title
//! against the search backend (same domain, same ingestion day).
//!
//! The fuzzy tier fails open: a search outage means "not a duplicate".

use metrics::counter;
use tracing::warn;

use crate::model::{EntryId, NewsEntry, SearchDocument};
use crate::search::{match_strength, SearchBackend};
use crate::store::{NewsStore, StoreResult};

#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateVerdict {
    Unique,
    ExistingGuid,
    SimilarTitle { entry_id: EntryId, strength: f32 },
}

impl DuplicateVerdict {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, DuplicateVerdict::Unique)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            DuplicateVerdict::Unique => "unique",
            DuplicateVerdict::ExistingGuid => "duplicate_guid",
            DuplicateVerdict::SimilarTitle { .. } => "duplicate_title",
        }
    }
}

pub struct DuplicateGate<'a, S: NewsStore, B: SearchBackend + ?Sized> {
    store: &'a S,
    search: &'a B,
    threshold: f32,
}

impl<'a, S: NewsStore, B: SearchBackend + ?Sized> DuplicateGate<'a, S, B> {
    pub fn new(store: &'a S, search: &'a B, threshold: f32) -> Self {
        Self {
            store,
            search,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// `staged` holds documents of the caller's uncommitted batch; they are
    /// not in the search backend yet but still count as prior entries.
    pub async fn check(
        &self,
        entry: &NewsEntry,
        staged: &[SearchDocument],
    ) -> StoreResult<DuplicateVerdict> {
        if self.store.guid_exists(&entry.guid).await? {
            return Ok(DuplicateVerdict::ExistingGuid);
        }

        let day = entry.ingested_at.date_naive();
        let staged_hit = staged
            .iter()
            .filter(|d| d.domain_id == entry.domain_id && d.ingested_on == day)
            .map(|d| (d.entry_id, match_strength(&entry.title, &d.title)))
            .find(|(_, s)| *s >= self.threshold);
        if let Some((entry_id, strength)) = staged_hit {
            return Ok(DuplicateVerdict::SimilarTitle { entry_id, strength });
        }

        match self
            .search
            .find_similar_titles(&entry.title, entry.domain_id, day)
            .await
        {
            Ok(hits) => Ok(hits
                .into_iter()
                .find(|h| h.score >= self.threshold)
                .map_or(DuplicateVerdict::Unique, |h| DuplicateVerdict::SimilarTitle {
                    entry_id: h.entry_id,
                    strength: h.score,
                })),
            Err(e) => {
                warn!(
                    error = %e,
                    guid = %entry.guid,
                    backend = self.search.name(),
                    "fuzzy dedup unavailable, treating entry as unique"
                );
                counter!("ingest_search_fail_open_total", "op" => "lookup").increment(1);
                Ok(DuplicateVerdict::Unique)
            }
        }
    }

    pub async fn is_duplicate(
        &self,
        entry: &NewsEntry,
        staged: &[SearchDocument],
    ) -> StoreResult<bool> {
        Ok(self.check(entry, staged).await?.is_duplicate())
    }
}
