// tests/ingest_pipeline.rs
mod common;

use chrono::{TimeZone, Utc};
use common::{fixture, rss, source, ScriptedFetcher};
use news_ingest::error::FetchError;
use news_ingest::model::{AccountId, AccountKeywords, DomainId, SourceId};
use news_ingest::{
    IngestConfig, IngestOptions, IngestPipeline, IngestStats, MemorySearch, MemoryStore,
    SourceFilter,
};
use std::sync::atomic::Ordering;

fn config() -> IngestConfig {
    let mut cfg = IngestConfig::default();
    cfg.ingest.retry_delay_ms = 0;
    cfg
}

fn keywords() -> AccountKeywords {
    AccountKeywords::from([
        (AccountId(42), vec!["Acme Corp".to_string()]),
        (AccountId(7), vec!["Beta Inc".to_string()]),
    ])
}

async fn run_with(
    store: &MemoryStore,
    search: &MemorySearch,
    fetcher: &ScriptedFetcher,
    cfg: &IngestConfig,
    options: IngestOptions,
) -> IngestStats {
    let pipeline = IngestPipeline::new(store, search, fetcher, cfg, options).unwrap();
    pipeline.run_all(&SourceFilter::default()).await.unwrap()
}

async fn run(store: &MemoryStore, search: &MemorySearch, fetcher: &ScriptedFetcher) -> IngestStats {
    let cfg = config();
    run_with(store, search, fetcher, &cfg, IngestOptions::from_config(&cfg)).await
}

#[tokio::test]
async fn wire_feed_is_normalized_tagged_and_linked() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    store.set_account_keywords(keywords());
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(&source(1, 10).url, &fixture("wire_rss.xml"));

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.inserted, 3);
    assert_eq!(stats.invalid, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.sources_polled, 1);
    assert_eq!(stats.sources_failed, 0);
    assert!(store.entry_by_guid("wire-1003").is_none());

    let acme = store.entry_by_guid("wire-1001").unwrap();
    assert_eq!(
        acme.entry.posted_at,
        Utc.with_ymd_and_hms(2024, 3, 6, 14, 30, 0).unwrap()
    );
    assert_eq!(acme.entry.short_desc, "Acme Corp beat estimates as markets cheered.");
    assert_eq!(
        acme.entry.image_url.as_deref(),
        Some("https://img.wire.test/acme.jpg")
    );
    assert_eq!(acme.entry.source_tags, vec!["Federal Reserve".to_string()]);
    assert_eq!(acme.entry.domain_id, DomainId(10));
    assert_eq!(acme.entry.source_id, SourceId(1));
    assert!(acme.entry.tags.is_empty());
    assert_eq!(acme.accounts.iter().copied().collect::<Vec<_>>(), vec![AccountId(42)]);

    let markets = store.entry_by_guid("wire-1002").unwrap();
    assert!(markets.entry.tags.contains("financial"));
    assert!(markets.entry.tags.contains("markets"));
    assert!(markets.accounts.is_empty());

    let beta = store.entry_by_guid("wire-1004").unwrap();
    assert_eq!(beta.accounts.iter().copied().collect::<Vec<_>>(), vec![AccountId(7)]);

    assert_eq!(search.len(), 3);
    assert!(store.source(SourceId(1)).unwrap().last_fetched.is_some());
}

#[tokio::test]
async fn re_ingesting_an_unchanged_feed_adds_nothing() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(&source(1, 10).url, &fixture("wire_rss.xml"));

    let first = run(&store, &search, &fetcher).await;
    let before: Vec<_> = store.entries().into_iter().map(|e| e.entry.guid).collect();

    let second = run(&store, &search, &fetcher).await;
    let after: Vec<_> = store.entries().into_iter().map(|e| e.entry.guid).collect();

    assert_eq!(first.inserted, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 3);
    assert_eq!(second.invalid, 1);
    assert_eq!(before, after);
    assert_eq!(search.len(), 3);
}

#[tokio::test]
async fn near_identical_title_same_domain_and_day_is_suppressed() {
    let store = MemoryStore::with_sources([source(1, 10), source(2, 10), source(3, 20)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new()
        .body(
            &source(1, 10).url,
            &rss(&[("a-1", "Acme Corp posts record quarterly profits")]),
        )
        .body(
            &source(2, 10).url,
            &rss(&[("b-1", "ACME Corp Posts Record Quarterly Profits!")]),
        )
        .body(
            &source(3, 20).url,
            &rss(&[("c-1", "Acme Corp posts record quarterly profits")]),
        );

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.duplicates, 1);
    assert!(store.entry_by_guid("a-1").is_some());
    assert!(store.entry_by_guid("b-1").is_none());
    // other domain is not compared
    assert!(store.entry_by_guid("c-1").is_some());
}

#[tokio::test]
async fn near_duplicates_within_one_batch_are_suppressed() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(
        &source(1, 10).url,
        &rss(&[
            ("a-1", "Fed holds rates steady"),
            ("a-2", "Fed holds rates steady"),
        ]),
    );

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.duplicates, 1);
}

#[tokio::test]
async fn repeated_guid_in_one_batch_is_a_conflict_not_a_failure() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(
        &source(1, 10).url,
        &rss(&[
            ("same", "Fed holds rates steady"),
            ("same", "Treasury yields climb to new high"),
            ("other", "Oil prices slide on supply glut"),
        ]),
    );

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.conflicts, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.sources_failed, 0);
    assert_eq!(
        store.entry_by_guid("same").unwrap().entry.title,
        "Fed holds rates steady"
    );
}

#[tokio::test]
async fn store_failure_rolls_back_only_the_current_source() {
    let store = MemoryStore::with_sources([source(1, 10), source(2, 10)]);
    store.fail_inserts_for("wire-1002");
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new()
        .body(&source(1, 10).url, &fixture("wire_rss.xml"))
        .body(&source(2, 10).url, &fixture("agency_atom.xml"));

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.sources_polled, 2);
    assert_eq!(stats.sources_failed, 1);
    // wire-1001 was pending in the same batch
    assert_eq!(stats.rolled_back, 1);
    assert!(store.entry_by_guid("wire-1001").is_none());
    assert!(store.entry_by_guid("wire-1004").is_none());

    assert_eq!(stats.inserted, 2);
    let treasury = store
        .entry_by_guid("tag:agency.test,2024:release-77")
        .unwrap();
    assert_eq!(treasury.entry.link, "https://agency.test/releases/77");
    assert!(treasury.entry.tags.contains("financial"));
    assert_eq!(
        treasury.entry.source_tags,
        vec!["Department of the Treasury".to_string()]
    );
    assert!(store
        .entry_by_guid("tag:agency.test,2024:release-78")
        .is_some());
    // only committed entries reach the search backend
    assert_eq!(search.len(), 2);
}

#[tokio::test]
async fn committed_batches_survive_a_later_failure() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    store.fail_inserts_for("wire-1002");
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(&source(1, 10).url, &fixture("wire_rss.xml"));

    let mut cfg = config();
    cfg.ingest.batch_size = 1;
    let stats = run_with(&store, &search, &fetcher, &cfg, IngestOptions::from_config(&cfg)).await;

    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.rolled_back, 0);
    assert_eq!(stats.sources_failed, 1);
    assert!(store.entry_by_guid("wire-1001").is_some());
    assert!(store.entry_by_guid("wire-1004").is_none());
}

#[tokio::test]
async fn exhausted_source_does_not_stop_the_run() {
    let store = MemoryStore::with_sources([source(1, 10), source(2, 10)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new()
        .script(&source(1, 10).url, vec![Err(FetchError::Timeout)])
        .body(&source(2, 10).url, &rss(&[("b-1", "Fed holds rates steady")]));

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.inserted, 1);
    assert!(store.source(SourceId(1)).unwrap().last_fetched.is_none());
    assert!(store.source(SourceId(2)).unwrap().last_fetched.is_some());

    let first_source_calls = fetcher
        .calls()
        .iter()
        .filter(|u| **u == source(1, 10).url)
        .count();
    assert_eq!(first_source_calls, 3);
}

#[tokio::test]
async fn search_outage_fails_open() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    let search = MemorySearch::new();
    search.set_offline(true);
    let fetcher = ScriptedFetcher::new().body(&source(1, 10).url, &fixture("wire_rss.xml"));

    let stats = run(&store, &search, &fetcher).await;
    assert_eq!(stats.inserted, 3);
    assert_eq!(store.entries().len(), 3);
    assert!(search.is_empty());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    store.set_account_keywords(keywords());
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(
        &source(1, 10).url,
        &rss(&[
            ("a-1", "Acme Corp posts record quarterly profits"),
            ("a-1", "Acme Corp opens new plant"),
            ("a-2", "Acme Corp posts record quarterly profits"),
            ("a-3", "Beta Inc names new chief executive"),
        ]),
    );

    let cfg = config();
    let mut options = IngestOptions::from_config(&cfg);
    options.dry_run = true;
    let stats = run_with(&store, &search, &fetcher, &cfg, options).await;

    assert_eq!(stats.processed, 4);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.duplicates, 2);
    assert!(store.entries().is_empty());
    assert_eq!(store.link_count(), 0);
    assert!(search.is_empty());
    assert!(store.source(SourceId(1)).unwrap().last_fetched.is_none());
}

#[tokio::test]
async fn filter_limits_the_sources_polled() {
    let store = MemoryStore::with_sources([source(1, 10), source(2, 20)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new()
        .body(&source(1, 10).url, &rss(&[("a-1", "Fed holds rates steady")]))
        .body(&source(2, 20).url, &rss(&[("b-1", "Oil prices slide")]));

    let cfg = config();
    let pipeline =
        IngestPipeline::new(&store, &search, &fetcher, &cfg, IngestOptions::from_config(&cfg))
            .unwrap();
    let stats = pipeline
        .run_all(&SourceFilter {
            ids: vec![],
            domain: Some(DomainId(20)),
        })
        .await
        .unwrap();

    assert_eq!(stats.sources_polled, 1);
    assert!(store.entry_by_guid("a-1").is_none());
    assert!(store.entry_by_guid("b-1").is_some());
    assert_eq!(fetcher.calls(), vec![source(2, 20).url]);
}

#[tokio::test]
async fn cancelled_run_polls_nothing() {
    let store = MemoryStore::with_sources([source(1, 10)]);
    let search = MemorySearch::new();
    let fetcher = ScriptedFetcher::new().body(&source(1, 10).url, &fixture("wire_rss.xml"));

    let cfg = config();
    let options = IngestOptions::from_config(&cfg);
    options.cancel.store(true, Ordering::Relaxed);
    let stats = run_with(&store, &search, &fetcher, &cfg, options).await;

    assert_eq!(stats, IngestStats::default());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn concurrent_workers_ingest_every_source() {
    let sources: Vec<_> = (1..=6).map(|id| source(id, id)).collect();
    let store = MemoryStore::with_sources(sources.clone());
    let search = MemorySearch::new();
    let mut fetcher = ScriptedFetcher::new();
    for s in &sources {
        let guid = format!("s{}-1", s.id);
        let title = format!("Headline number {} for desk", s.id);
        fetcher = fetcher.body(&s.url, &rss(&[(guid.as_str(), title.as_str())]));
    }

    let mut cfg = config();
    cfg.ingest.max_concurrent_sources = 3;
    let stats = run_with(&store, &search, &fetcher, &cfg, IngestOptions::from_config(&cfg)).await;

    assert_eq!(stats.sources_polled, 6);
    assert_eq!(stats.inserted, 6);
    assert_eq!(store.entries().len(), 6);
}
