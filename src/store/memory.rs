// src/store/memory.rs
//! Thread-safe in-memory store with JSON snapshots.
//!
//! Honours the full storage contract: guid uniqueness (reserved from insert
//! until commit/rollback, so concurrent workers conflict like they would on a
//! unique index), idempotent links and keyset pagination.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{NewsStore, PageCursor, StoreResult, StoreTransaction};
use crate::error::StoreError;
use crate::model::{
    AccountId, AccountKeywords, EntryId, FeedSource, NewsEntry, SearchDocument, SourceId,
    StoredEntry,
};

#[derive(Debug, Default)]
struct State {
    sources: BTreeMap<SourceId, FeedSource>,
    entries: BTreeMap<EntryId, NewsEntry>,
    guids: HashMap<String, EntryId>,
    links: BTreeSet<(EntryId, AccountId)>,
    account_keywords: AccountKeywords,
    next_entry_id: i64,
    /// guids held by open transactions
    reserved: HashSet<String>,
    /// inserts of these guids fail with a backend error
    failing_guids: HashSet<String>,
}

impl State {
    fn stored(&self, id: EntryId, entry: &NewsEntry) -> StoredEntry {
        let accounts = self
            .links
            .range((id, AccountId(i64::MIN))..=(id, AccountId(i64::MAX)))
            .map(|(_, a)| *a)
            .collect();
        StoredEntry {
            id,
            entry: entry.clone(),
            accounts,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    sources: Vec<FeedSource>,
    #[serde(default)]
    entries: Vec<SnapshotEntry>,
    #[serde(default)]
    links: Vec<SnapshotLink>,
    #[serde(default)]
    account_keywords: AccountKeywords,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    id: EntryId,
    #[serde(flatten)]
    entry: NewsEntry,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotLink {
    entry_id: EntryId,
    account_id: AccountId,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> StoreResult<MutexGuard<'_, State>> {
    state
        .lock()
        .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources<I: IntoIterator<Item = FeedSource>>(sources: I) -> Self {
        let store = Self::new();
        for s in sources {
            store.upsert_source(s);
        }
        store
    }

    fn guard(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn upsert_source(&self, source: FeedSource) {
        self.guard().sources.insert(source.id, source);
    }

    pub fn source(&self, id: SourceId) -> Option<FeedSource> {
        self.guard().sources.get(&id).cloned()
    }

    pub fn set_account_keywords(&self, keywords: AccountKeywords) {
        self.guard().account_keywords = keywords;
    }

    /// Make inserts of `guid` fail with `StoreError::Backend`.
    pub fn fail_inserts_for(&self, guid: &str) {
        self.guard().failing_guids.insert(guid.to_string());
    }

    /// All committed entries, oldest id first.
    pub fn entries(&self) -> Vec<StoredEntry> {
        let st = self.guard();
        st.entries.iter().map(|(id, e)| st.stored(*id, e)).collect()
    }

    pub fn entry_by_guid(&self, guid: &str) -> Option<StoredEntry> {
        let st = self.guard();
        let id = *st.guids.get(guid)?;
        st.entries.get(&id).map(|e| st.stored(id, e))
    }

    pub fn link_count(&self) -> usize {
        self.guard().links.len()
    }

    /// Projection of every committed entry, for rebuilding a search index.
    pub fn search_documents(&self) -> Vec<SearchDocument> {
        self.guard()
            .entries
            .iter()
            .map(|(id, e)| SearchDocument::from_entry(*id, e))
            .collect()
    }

    pub async fn load_snapshot(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let snap: Snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;

        let mut st = State::default();
        for s in snap.sources {
            st.sources.insert(s.id, s);
        }
        for SnapshotEntry { id, entry } in snap.entries {
            st.next_entry_id = st.next_entry_id.max(id.0);
            st.guids.insert(entry.guid.clone(), id);
            st.entries.insert(id, entry);
        }
        for l in snap.links {
            st.links.insert((l.entry_id, l.account_id));
        }
        st.account_keywords = snap.account_keywords;

        Ok(Self {
            state: Arc::new(Mutex::new(st)),
        })
    }

    /// Load `path` if it exists, otherwise start empty.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load_snapshot(path).await
        } else {
            Ok(Self::new())
        }
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snap = {
            let st = self.guard();
            Snapshot {
                sources: st.sources.values().cloned().collect(),
                entries: st
                    .entries
                    .iter()
                    .map(|(id, e)| SnapshotEntry {
                        id: *id,
                        entry: e.clone(),
                    })
                    .collect(),
                links: st
                    .links
                    .iter()
                    .map(|(e, a)| SnapshotLink {
                        entry_id: *e,
                        account_id: *a,
                    })
                    .collect(),
                account_keywords: st.account_keywords.clone(),
            }
        };
        let body = serde_json::to_string_pretty(&snap).context("serializing snapshot")?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    type Tx = MemoryTx;

    async fn sources(&self) -> StoreResult<Vec<FeedSource>> {
        Ok(lock(&self.state)?.sources.values().cloned().collect())
    }

    async fn mark_source_fetched(&self, id: SourceId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut st = lock(&self.state)?;
        let source = st
            .sources
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(format!("unknown source {id}")))?;
        source.last_fetched = Some(at);
        Ok(())
    }

    async fn guid_exists(&self, guid: &str) -> StoreResult<bool> {
        Ok(lock(&self.state)?.guids.contains_key(guid))
    }

    async fn account_keywords(&self) -> StoreResult<AccountKeywords> {
        Ok(lock(&self.state)?.account_keywords.clone())
    }

    async fn entries_page(
        &self,
        after: Option<PageCursor>,
        limit: usize,
    ) -> StoreResult<Vec<StoredEntry>> {
        let st = lock(&self.state)?;
        let mut keys: Vec<(DateTime<Utc>, EntryId)> = st
            .entries
            .iter()
            .map(|(id, e)| (e.posted_at, *id))
            .filter(|k| after.map_or(true, |c| *k < (c.posted_at, c.id)))
            .collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));
        keys.truncate(limit);
        Ok(keys
            .into_iter()
            .filter_map(|(_, id)| st.entries.get(&id).map(|e| st.stored(id, e)))
            .collect())
    }

    async fn begin(&self) -> StoreResult<MemoryTx> {
        Ok(MemoryTx {
            state: Arc::clone(&self.state),
            entries: Vec::new(),
            links: BTreeSet::new(),
            reserved: Vec::new(),
        })
    }
}

/// Staged writes; applied atomically on commit, released on rollback or drop.
#[derive(Debug)]
pub struct MemoryTx {
    state: Arc<Mutex<State>>,
    entries: Vec<(EntryId, NewsEntry)>,
    links: BTreeSet<(EntryId, AccountId)>,
    reserved: Vec<String>,
}

impl MemoryTx {
    fn release(&mut self, st: &mut State) {
        for guid in self.reserved.drain(..) {
            st.reserved.remove(&guid);
        }
        self.entries.clear();
        self.links.clear();
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.reserved.is_empty() {
            return;
        }
        if let Ok(mut st) = self.state.lock() {
            for guid in self.reserved.drain(..) {
                st.reserved.remove(&guid);
            }
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTx {
    async fn insert_entry(&mut self, entry: &NewsEntry) -> StoreResult<EntryId> {
        let state = Arc::clone(&self.state);
        let mut st = lock(&state)?;
        if st.failing_guids.contains(&entry.guid) {
            return Err(StoreError::Backend(format!(
                "injected failure for {}",
                entry.guid
            )));
        }
        if st.guids.contains_key(&entry.guid) || st.reserved.contains(&entry.guid) {
            return Err(StoreError::AlreadyExists(entry.guid.clone()));
        }
        st.next_entry_id += 1;
        let id = EntryId(st.next_entry_id);
        st.reserved.insert(entry.guid.clone());
        self.reserved.push(entry.guid.clone());
        self.entries.push((id, entry.clone()));
        Ok(id)
    }

    async fn link_account(&mut self, entry: EntryId, account: AccountId) -> StoreResult<bool> {
        let st = lock(&self.state)?;
        let staged_entry = self.entries.iter().any(|(id, _)| *id == entry);
        if !staged_entry && !st.entries.contains_key(&entry) {
            return Err(StoreError::Backend(format!("unknown entry {entry}")));
        }
        if st.links.contains(&(entry, account)) {
            return Ok(false);
        }
        drop(st);
        Ok(self.links.insert((entry, account)))
    }

    async fn commit(mut self) -> StoreResult<()> {
        let state = Arc::clone(&self.state);
        let mut st = lock(&state)?;
        for (id, entry) in std::mem::take(&mut self.entries) {
            st.guids.insert(entry.guid.clone(), id);
            st.entries.insert(id, entry);
        }
        for link in std::mem::take(&mut self.links) {
            st.links.insert(link);
        }
        self.release(&mut st);
        Ok(())
    }

    async fn rollback(mut self) -> StoreResult<()> {
        let state = Arc::clone(&self.state);
        let mut st = lock(&state)?;
        self.release(&mut st);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DomainId;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    fn entry(guid: &str, minutes: i64) -> NewsEntry {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        NewsEntry {
            guid: guid.to_string(),
            title: format!("title {guid}"),
            link: format!("https://x.test/{guid}"),
            posted_at: t,
            description: "d".into(),
            short_desc: "d".into(),
            image_url: None,
            tags: BTreeSet::new(),
            source_tags: vec![],
            domain_id: DomainId(1),
            source_id: SourceId(1),
            ingested_at: t,
        }
    }

    #[tokio::test]
    async fn duplicate_guid_is_reported_and_tx_stays_usable() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_entry(&entry("a", 0)).await.unwrap();
        let err = tx.insert_entry(&entry("a", 1)).await.unwrap_err();
        assert!(err.is_conflict());
        tx.insert_entry(&entry("b", 2)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.entries().len(), 2);
        assert!(store.guid_exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn open_transactions_reserve_guids() {
        let store = MemoryStore::new();
        let mut t1 = store.begin().await.unwrap();
        let mut t2 = store.begin().await.unwrap();
        t1.insert_entry(&entry("a", 0)).await.unwrap();
        assert!(t2.insert_entry(&entry("a", 0)).await.unwrap_err().is_conflict());
        t1.rollback().await.unwrap();
        t2.insert_entry(&entry("a", 0)).await.unwrap();
        drop(t2);
        // dropped without commit: nothing persisted, guid free again
        let mut t3 = store.begin().await.unwrap();
        t3.insert_entry(&entry("a", 0)).await.unwrap();
        t3.commit().await.unwrap();
        assert_eq!(store.entries().len(), 1);
    }

    #[tokio::test]
    async fn links_are_idempotent() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let id = tx.insert_entry(&entry("a", 0)).await.unwrap();
        assert!(tx.link_account(id, AccountId(1)).await.unwrap());
        assert!(!tx.link_account(id, AccountId(1)).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.link_account(id, AccountId(1)).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.link_count(), 1);
        assert_eq!(
            store.entry_by_guid("a").unwrap().accounts,
            BTreeSet::from([AccountId(1)])
        );
    }

    #[tokio::test]
    async fn pages_newest_first_without_gaps() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for i in 0..7 {
            tx.insert_entry(&entry(&format!("e{i}"), i % 3)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.entries_page(cursor, 3).await.unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(PageCursor::from);
            seen.extend(page.into_iter().map(|e| (e.entry.posted_at, e.id)));
        }
        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0] > w[1]));
    }

    #[tokio::test]
    async fn snapshot_round_trip_keeps_id_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("news.json");

        let store = MemoryStore::with_sources([FeedSource {
            id: SourceId(1),
            name: "Wire".into(),
            url: "https://wire.test/rss".into(),
            domain_id: DomainId(1),
            last_fetched: None,
        }]);
        store.set_account_keywords(AccountKeywords::from([(
            AccountId(42),
            vec!["Acme Corp".to_string()],
        )]));
        let mut tx = store.begin().await.unwrap();
        let id = tx.insert_entry(&entry("a", 0)).await.unwrap();
        tx.link_account(id, AccountId(42)).await.unwrap();
        tx.commit().await.unwrap();
        store.save_snapshot(&path).await.unwrap();

        let loaded = MemoryStore::load_snapshot(&path).await.unwrap();
        assert_eq!(loaded.entries().len(), 1);
        assert_eq!(loaded.link_count(), 1);
        assert_eq!(loaded.account_keywords().await.unwrap().len(), 1);
        let mut tx = loaded.begin().await.unwrap();
        let next = tx.insert_entry(&entry("b", 1)).await.unwrap();
        assert!(next > id);
    }
}
