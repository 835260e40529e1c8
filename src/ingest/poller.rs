// src/ingest/poller.rs
//! Fetch one feed source with a bounded timeout-retry budget.
//!
//! `Pending -> Fetching -> {Success, Exhausted}`. Only timeouts are retried;
//! any other fetch error ends the attempt for this cycle. A successful fetch
//! stamps `last_fetched` no matter how many entries the body yields, and an
//! unparsable or empty body counts as zero entries.

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::feed::parse_feed;
use crate::error::{FetchError, PollError};
use crate::model::{FeedSource, RawEntry};
use crate::store::NewsStore;

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Body of `url` on success.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Fetching { attempt: u32 },
    Success,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Skip `last_fetched` bookkeeping (dry run).
    pub read_only: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            read_only: false,
        }
    }
}

pub struct SourcePoller<F> {
    fetcher: F,
    options: PollerOptions,
}

impl<F: FeedFetcher> SourcePoller<F> {
    pub fn new(fetcher: F, options: PollerOptions) -> Self {
        Self { fetcher, options }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch the body, retrying timeouts only.
    async fn fetch_body(&self, source: &FeedSource) -> Result<String, PollError> {
        let max = self.options.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(source_id = %source.id, state = ?PollState::Fetching { attempt }, "fetching");

            let t0 = Instant::now();
            let res = self.fetcher.fetch(&source.url).await;
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match res {
                Ok(body) => {
                    debug!(source_id = %source.id, attempt, state = ?PollState::Success, "fetched");
                    return Ok(body);
                }
                Err(FetchError::Timeout) if attempt < max => {
                    warn!(source_id = %source.id, attempt, max, "fetch timed out, retrying");
                    counter!("ingest_fetch_retries_total").increment(1);
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(FetchError::Timeout) => {
                    warn!(
                        source_id = %source.id,
                        attempts = attempt,
                        state = ?PollState::Exhausted,
                        "fetch retries exhausted"
                    );
                    return Err(PollError::Exhausted { attempts: attempt });
                }
                Err(e) => return Err(PollError::Fetch(e)),
            }
        }
    }

    /// Fetch + parse one source and record the fetch time.
    pub async fn poll<S: NewsStore>(
        &self,
        store: &S,
        source: &FeedSource,
    ) -> Result<Vec<RawEntry>, PollError> {
        let body = self.fetch_body(source).await?;

        let entries = match parse_feed(&body) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "unparsable feed body, treating as empty");
                Vec::new()
            }
        };
        if entries.is_empty() {
            info!(source_id = %source.id, "feed has no entries");
        }

        if !self.options.read_only {
            store
                .mark_source_fetched(source.id, Utc::now())
                .await
                .map_err(|e| PollError::Bookkeeping(e.to_string()))?;
        }
        Ok(entries)
    }
}
