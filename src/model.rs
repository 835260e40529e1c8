// src/model.rs
//! Canonical records shared by the ingestion pipeline, the relink job and the
//! storage/search seams.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SourceId);
id_newtype!(EntryId);
id_newtype!(AccountId);
id_newtype!(DomainId);

/// account id -> surface-form keyword phrases (case-insensitive).
pub type AccountKeywords = BTreeMap<AccountId, Vec<String>>;

/// topic label -> trigger phrases.
pub type CategoryRules = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    pub domain_id: DomainId,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
}

/// One entry as it came out of a feed body, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

/// Canonical news entry. `tags` holds topic labels assigned by the category
/// matcher; `source_tags` holds the syndication tags that survived filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEntry {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub posted_at: DateTime<Utc>,
    pub description: String,
    pub short_desc: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub source_tags: Vec<String>,
    pub domain_id: DomainId,
    pub source_id: SourceId,
    pub ingested_at: DateTime<Utc>,
}

/// A persisted entry as streamed back by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: EntryId,
    pub entry: NewsEntry,
    pub accounts: BTreeSet<AccountId>,
}

impl StoredEntry {
    /// Text the account matcher runs over.
    pub fn match_text(&self) -> String {
        account_match_text(&self.entry)
    }
}

pub fn account_match_text(entry: &NewsEntry) -> String {
    format!("{} {}", entry.title, entry.description)
}

/// Denormalized projection kept in the search backend for fuzzy dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub entry_id: EntryId,
    pub title: String,
    pub domain_id: DomainId,
    pub ingested_on: NaiveDate,
}

impl SearchDocument {
    pub fn from_entry(entry_id: EntryId, entry: &NewsEntry) -> Self {
        Self {
            entry_id,
            title: entry.title.clone(),
            domain_id: entry.domain_id,
            ingested_on: entry.ingested_at.date_naive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry_id: EntryId,
    pub title: String,
    /// Match strength in `0.0..=1.0`.
    pub score: f32,
}
