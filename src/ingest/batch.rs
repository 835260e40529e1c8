// src/ingest/batch.rs
//! Commit-batch boundary shared by ingestion and relinking.
//!
//! A `UnitOfWork` owns at most one open store transaction. Callers write
//! through it, mark each finished unit with `checkpoint`, and the batch
//! commits once `batch_size` units are pending. `flush` forces a commit
//! (end of a source, end of a job, cancellation). Search documents staged
//! for the batch are indexed only after the commit succeeded, and only on a
//! best-effort basis.

use metrics::counter;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{AccountId, EntryId, NewsEntry, SearchDocument};
use crate::search::SearchBackend;
use crate::store::{NewsStore, StoreResult, StoreTransaction};

pub struct UnitOfWork<'a, S: NewsStore, B: SearchBackend + ?Sized = dyn SearchBackend> {
    store: &'a S,
    search: Option<&'a B>,
    tx: Option<S::Tx>,
    batch_size: usize,
    pending_units: usize,
    staged_docs: Vec<SearchDocument>,
}

impl<'a, S: NewsStore, B: SearchBackend + ?Sized> UnitOfWork<'a, S, B> {
    pub fn new(store: &'a S, search: Option<&'a B>, batch_size: usize) -> Self {
        Self {
            store,
            search,
            tx: None,
            batch_size: batch_size.max(1),
            pending_units: 0,
            staged_docs: Vec::new(),
        }
    }

    async fn tx(&mut self) -> StoreResult<&mut S::Tx> {
        if self.tx.is_none() {
            self.tx = Some(self.store.begin().await?);
        }
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Backend("transaction not open".to_string()))
    }

    pub async fn insert_entry(&mut self, entry: &NewsEntry) -> StoreResult<EntryId> {
        self.tx().await?.insert_entry(entry).await
    }

    pub async fn link_account(&mut self, entry: EntryId, account: AccountId) -> StoreResult<bool> {
        self.tx().await?.link_account(entry, account).await
    }

    pub fn stage_document(&mut self, doc: SearchDocument) {
        self.staged_docs.push(doc);
    }

    /// Documents written in this batch but not yet visible in the search backend.
    pub fn staged_documents(&self) -> &[SearchDocument] {
        &self.staged_docs
    }

    pub fn pending_units(&self) -> usize {
        self.pending_units
    }

    /// Mark one unit done; commits when the batch is full.
    /// Returns the number of units committed (0 when no commit happened).
    pub async fn checkpoint(&mut self) -> StoreResult<usize> {
        self.pending_units += 1;
        if self.pending_units >= self.batch_size {
            return self.flush().await;
        }
        Ok(0)
    }

    /// Commit whatever is pending. Returns the number of units committed.
    pub async fn flush(&mut self) -> StoreResult<usize> {
        let units = std::mem::take(&mut self.pending_units);
        let docs = std::mem::take(&mut self.staged_docs);
        let Some(tx) = self.tx.take() else {
            return Ok(0);
        };
        if let Err(e) = tx.commit().await {
            // a failed commit loses the batch; `rollback` reports the count
            self.pending_units = units;
            return Err(e);
        }
        debug!(units, docs = docs.len(), "batch committed");

        if let Some(search) = self.search {
            for doc in &docs {
                if let Err(e) = search.index_document(doc).await {
                    // entry is committed; only future fuzzy-dedup recall suffers
                    warn!(
                        error = %e,
                        entry_id = %doc.entry_id,
                        backend = search.name(),
                        "search indexing failed"
                    );
                    counter!("ingest_search_fail_open_total", "op" => "index").increment(1);
                }
            }
        }
        Ok(units)
    }

    /// Discard the open batch. Returns the number of units lost.
    pub async fn rollback(&mut self) -> usize {
        let units = std::mem::take(&mut self.pending_units);
        self.staged_docs.clear();
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "rollback failed");
            }
        }
        counter!("ingest_batches_rolled_back_total").increment(1);
        units
    }
}
