// src/ingest/mod.rs
pub mod batch;
pub mod dedup;
pub mod feed;
pub mod normalize;
pub mod poller;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{PollError, RunError, StoreError};
use crate::matcher::KeywordMatcher;
use crate::model::{
    account_match_text, AccountId, DomainId, EntryId, FeedSource, NewsEntry, SearchDocument,
    SourceId,
};
use crate::search::SearchBackend;
use crate::store::{NewsStore, StoreResult};

use batch::UnitOfWork;
use dedup::{DuplicateGate, DuplicateVerdict};
use normalize::Normalizer;
use poller::{FeedFetcher, PollerOptions, SourcePoller};

/// One-time metrics registration (so series show up in the textfile).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_entries_processed_total",
            "Raw feed entries seen by the pipeline."
        );
        describe_counter!(
            "ingest_entries_inserted_total",
            "Entries committed to the store."
        );
        describe_counter!(
            "ingest_entries_skipped_total",
            "Entries dropped, labelled by reason."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Feed fetches retried after a timeout."
        );
        describe_counter!(
            "ingest_sources_failed_total",
            "Sources given up on for the current run."
        );
        describe_counter!(
            "ingest_batches_rolled_back_total",
            "Commit batches discarded after a store failure."
        );
        describe_counter!(
            "ingest_search_fail_open_total",
            "Search backend calls that failed and were ignored."
        );
        describe_counter!("relink_entries_scanned_total", "Entries scanned by relink.");
        describe_counter!("relink_links_created_total", "Account links created by relink.");
        describe_histogram!("ingest_fetch_ms", "Feed fetch time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when the pipeline last finished.");
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub processed: u64,
    pub inserted: u64,
    /// `invalid + duplicates + conflicts`
    pub skipped: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub conflicts: u64,
    pub rolled_back: u64,
    pub sources_polled: u64,
    pub sources_failed: u64,
}

#[derive(Debug, Clone, Copy)]
enum Skip {
    Invalid,
    DuplicateGuid,
    DuplicateTitle,
    Conflict,
}

impl Skip {
    fn reason(self) -> &'static str {
        match self {
            Skip::Invalid => "invalid",
            Skip::DuplicateGuid => "duplicate_guid",
            Skip::DuplicateTitle => "duplicate_title",
            Skip::Conflict => "conflict",
        }
    }
}

impl IngestStats {
    fn skip(&mut self, why: Skip) {
        self.skipped += 1;
        match why {
            Skip::Invalid => self.invalid += 1,
            Skip::DuplicateGuid | Skip::DuplicateTitle => self.duplicates += 1,
            Skip::Conflict => self.conflicts += 1,
        }
        counter!("ingest_entries_skipped_total", "reason" => why.reason()).increment(1);
    }

    fn committed(&mut self, units: usize) {
        self.inserted += units as u64;
        counter!("ingest_entries_inserted_total").increment(units as u64);
    }
}

impl AddAssign for IngestStats {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.inserted += rhs.inserted;
        self.skipped += rhs.skipped;
        self.invalid += rhs.invalid;
        self.duplicates += rhs.duplicates;
        self.conflicts += rhs.conflicts;
        self.rolled_back += rhs.rolled_back;
        self.sources_polled += rhs.sources_polled;
        self.sources_failed += rhs.sources_failed;
    }
}

/// Which sources a run covers. Empty `ids` and no `domain` means all.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub ids: Vec<SourceId>,
    pub domain: Option<DomainId>,
}

impl SourceFilter {
    pub fn matches(&self, source: &FeedSource) -> bool {
        (self.ids.is_empty() || self.ids.contains(&source.id))
            && self.domain.map_or(true, |d| d == source.domain_id)
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub similarity_threshold: f32,
    pub max_concurrent_sources: usize,
    pub dry_run: bool,
    pub cancel: Arc<AtomicBool>,
}

impl IngestOptions {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            batch_size: cfg.ingest.batch_size,
            similarity_threshold: cfg.dedup.similarity_threshold,
            max_concurrent_sources: cfg.ingest.max_concurrent_sources,
            dry_run: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Entries a dry run would have written, so in-run duplicates still count
/// as duplicates without touching the store.
#[derive(Default)]
struct DryRunLedger {
    guids: HashSet<String>,
    docs: Vec<SearchDocument>,
}

impl DryRunLedger {
    fn record(&mut self, entry: &NewsEntry) {
        let id = EntryId(-(self.docs.len() as i64) - 1);
        self.guids.insert(entry.guid.clone());
        self.docs.push(SearchDocument::from_entry(id, entry));
    }
}

pub struct IngestPipeline<'a, S, F, B: ?Sized> {
    store: &'a S,
    search: &'a B,
    poller: SourcePoller<F>,
    normalizer: Normalizer,
    categories: KeywordMatcher<String>,
    options: IngestOptions,
}

impl<'a, S, F, B> IngestPipeline<'a, S, F, B>
where
    S: NewsStore,
    F: FeedFetcher,
    B: SearchBackend + ?Sized,
{
    pub fn new(
        store: &'a S,
        search: &'a B,
        fetcher: F,
        cfg: &IngestConfig,
        options: IngestOptions,
    ) -> Result<Self, RunError> {
        let poller = SourcePoller::new(
            fetcher,
            PollerOptions {
                max_attempts: cfg.ingest.max_fetch_attempts,
                retry_delay: cfg.ingest.retry_delay(),
                read_only: options.dry_run,
            },
        );
        Ok(Self {
            store,
            search,
            poller,
            normalizer: Normalizer::new(&cfg.known_tags),
            categories: KeywordMatcher::from_rules(&cfg.categories)?,
            options,
        })
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    fn cancelled(&self) -> bool {
        self.options.cancel.load(Ordering::Relaxed)
    }

    /// Poll every source the store knows that passes `filter`.
    pub async fn run_all(&self, filter: &SourceFilter) -> Result<IngestStats, RunError> {
        let sources: Vec<FeedSource> = self
            .store
            .sources()
            .await?
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        self.run(&sources).await
    }

    /// Ingest `sources`. Per-source failures are absorbed into the stats;
    /// only reading the account dictionary can fail the run.
    pub async fn run(&self, sources: &[FeedSource]) -> Result<IngestStats, RunError> {
        ensure_metrics_described();

        // rebuilt every run so dictionary edits take effect without a restart
        let keywords = self.store.account_keywords().await?;
        let accounts = KeywordMatcher::build(keywords.iter())?;
        debug!(
            accounts = keywords.len(),
            phrases = accounts.phrase_count(),
            categories = self.categories.phrase_count(),
            "matchers built"
        );

        let workers = self.options.max_concurrent_sources.max(1);
        let accounts = &accounts;
        let mut results = stream::iter(sources)
            .map(move |source| self.ingest_source(source, accounts))
            .buffer_unordered(workers);

        let mut total = IngestStats::default();
        while let Some(stats) = results.next().await {
            total += stats;
        }

        gauge!("ingest_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            processed = total.processed,
            inserted = total.inserted,
            skipped = total.skipped,
            sources_failed = total.sources_failed,
            dry_run = self.options.dry_run,
            "ingest run finished"
        );
        Ok(total)
    }

    async fn ingest_source(
        &self,
        source: &FeedSource,
        accounts: &KeywordMatcher<AccountId>,
    ) -> IngestStats {
        let mut stats = IngestStats::default();
        if self.cancelled() {
            return stats;
        }
        stats.sources_polled = 1;

        let raws = match self.poller.poll(self.store, source).await {
            Ok(raws) => raws,
            Err(e) => {
                let reason = match &e {
                    PollError::Exhausted { .. } => "exhausted",
                    PollError::Fetch(_) => "fetch",
                    PollError::Bookkeeping(_) => "bookkeeping",
                };
                warn!(error = %e, source_id = %source.id, source = %source.name, "source skipped");
                counter!("ingest_sources_failed_total", "reason" => reason).increment(1);
                stats.sources_failed = 1;
                return stats;
            }
        };

        let gate = DuplicateGate::new(self.store, self.search, self.options.similarity_threshold);
        let mut uow: UnitOfWork<'_, S, B> =
            UnitOfWork::new(self.store, Some(self.search), self.options.batch_size);
        let mut ledger = DryRunLedger::default();
        let ingested_at = Utc::now();

        for raw in &raws {
            if self.cancelled() {
                info!(source_id = %source.id, "cancelled, flushing current batch");
                break;
            }
            stats.processed += 1;
            counter!("ingest_entries_processed_total").increment(1);

            let mut entry = match self.normalizer.normalize(raw, source, ingested_at) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, source_id = %source.id, guid = ?raw.guid, "invalid entry");
                    stats.skip(Skip::Invalid);
                    continue;
                }
            };

            let verdict = if self.options.dry_run && ledger.guids.contains(&entry.guid) {
                Ok(DuplicateVerdict::ExistingGuid)
            } else {
                let staged = if self.options.dry_run {
                    ledger.docs.as_slice()
                } else {
                    uow.staged_documents()
                };
                gate.check(&entry, staged).await
            };
            match verdict {
                Ok(DuplicateVerdict::Unique) => {}
                Ok(v) => {
                    debug!(guid = %entry.guid, reason = v.reason(), "duplicate entry");
                    stats.skip(match v {
                        DuplicateVerdict::ExistingGuid => Skip::DuplicateGuid,
                        _ => Skip::DuplicateTitle,
                    });
                    continue;
                }
                Err(e) => {
                    self.abort_source(source, &mut uow, &mut stats, &e).await;
                    return stats;
                }
            }

            entry.tags = self.categories.extract(&entry.title);
            let matched = accounts.extract(&account_match_text(&entry));

            if self.options.dry_run {
                ledger.record(&entry);
                stats.inserted += 1;
                continue;
            }

            match write_entry(&mut uow, &entry, &matched).await {
                Ok(id) => uow.stage_document(SearchDocument::from_entry(id, &entry)),
                Err(e) if e.is_conflict() => {
                    debug!(guid = %entry.guid, "guid taken by a concurrent insert");
                    stats.skip(Skip::Conflict);
                    continue;
                }
                Err(e) => {
                    self.abort_source(source, &mut uow, &mut stats, &e).await;
                    return stats;
                }
            }

            match uow.checkpoint().await {
                Ok(units) => stats.committed(units),
                Err(e) => {
                    self.abort_source(source, &mut uow, &mut stats, &e).await;
                    return stats;
                }
            }
        }

        match uow.flush().await {
            Ok(units) => stats.committed(units),
            Err(e) => self.abort_source(source, &mut uow, &mut stats, &e).await,
        }
        stats
    }

    async fn abort_source(
        &self,
        source: &FeedSource,
        uow: &mut UnitOfWork<'_, S, B>,
        stats: &mut IngestStats,
        err: &StoreError,
    ) {
        let lost = uow.rollback().await;
        error!(
            error = %err,
            source_id = %source.id,
            source = %source.name,
            lost,
            "store failure, batch rolled back and source aborted"
        );
        counter!("ingest_sources_failed_total", "reason" => "store").increment(1);
        stats.rolled_back += lost as u64;
        stats.sources_failed = 1;
    }
}

async fn write_entry<S, B>(
    uow: &mut UnitOfWork<'_, S, B>,
    entry: &NewsEntry,
    accounts: &BTreeSet<AccountId>,
) -> StoreResult<EntryId>
where
    S: NewsStore,
    B: SearchBackend + ?Sized,
{
    let id = uow.insert_entry(entry).await?;
    for account in accounts {
        uow.link_account(id, *account).await?;
    }
    Ok(id)
}
