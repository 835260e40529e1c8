// src/store/mod.rs
//! Storage seam for feed sources, entries, account links and the
//! account-keyword dictionary.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{AccountId, AccountKeywords, EntryId, FeedSource, NewsEntry, SourceId, StoredEntry};

pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyset position for streaming entries newest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub posted_at: DateTime<Utc>,
    pub id: EntryId,
}

impl From<&StoredEntry> for PageCursor {
    fn from(e: &StoredEntry) -> Self {
        Self {
            posted_at: e.entry.posted_at,
            id: e.id,
        }
    }
}

#[async_trait]
pub trait NewsStore: Send + Sync {
    type Tx: StoreTransaction;

    async fn sources(&self) -> StoreResult<Vec<FeedSource>>;

    async fn mark_source_fetched(&self, id: SourceId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Committed entries only.
    async fn guid_exists(&self, guid: &str) -> StoreResult<bool>;

    async fn account_keywords(&self) -> StoreResult<AccountKeywords>;

    /// Entries ordered by `posted_at` desc, then id desc, strictly after `after`.
    async fn entries_page(
        &self,
        after: Option<PageCursor>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEntry>>;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One commit batch.
///
/// `insert_entry` must report a guid conflict as `StoreError::AlreadyExists`
/// and leave the transaction usable (savepoint or `ON CONFLICT DO NOTHING`
/// in SQL backends). A guid is reserved from insert until commit/rollback.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_entry(&mut self, entry: &NewsEntry) -> StoreResult<EntryId>;

    /// Idempotent. Returns `true` only when the link did not exist before.
    async fn link_account(&mut self, entry: EntryId, account: AccountId) -> StoreResult<bool>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}
