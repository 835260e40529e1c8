// src/relink.rs
//! Retroactive account linking over historical entries.
//!
//! Streams every entry newest-first in keyset pages, re-runs the account
//! matcher over `title + " " + description` and adds the links that are
//! missing. Purely additive: links are never removed.

use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RelinkSection;
use crate::error::{RunError, StoreError};
use crate::ingest::batch::UnitOfWork;
use crate::ingest::ensure_metrics_described;
use crate::matcher::KeywordMatcher;
use crate::model::{AccountId, AccountKeywords};
use crate::store::{NewsStore, PageCursor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelinkStats {
    pub scanned: u64,
    pub new_links: u64,
}

pub struct RelinkJob<'a, S> {
    store: &'a S,
    page_size: usize,
    commit_every: usize,
    dry_run: bool,
    cancel: Arc<AtomicBool>,
}

impl<'a, S: NewsStore> RelinkJob<'a, S> {
    pub fn new(store: &'a S, cfg: &RelinkSection) -> Self {
        Self {
            store,
            page_size: cfg.page_size.max(1),
            commit_every: cfg.commit_every.max(1),
            dry_run: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Relink with the dictionary currently held by the store.
    pub async fn run(&self) -> Result<RelinkStats, RunError> {
        let keywords = self.store.account_keywords().await?;
        self.relink(&keywords).await
    }

    /// A store failure rolls back the open batch and ends the job; batches
    /// committed before it stay.
    pub async fn relink(&self, keywords: &AccountKeywords) -> Result<RelinkStats, RunError> {
        ensure_metrics_described();
        let matcher = KeywordMatcher::build(keywords.iter())?;
        let mut stats = RelinkStats::default();
        if matcher.is_empty() {
            // still stream the pages so `scanned` reports the entries seen
            info!("account dictionary is empty, no links will be added");
        }

        let mut uow: UnitOfWork<'_, S> = UnitOfWork::new(self.store, None, self.commit_every);
        match self.scan(&matcher, &mut uow, &mut stats).await {
            Ok(()) => {
                if let Err(e) = uow.flush().await {
                    return Err(self.fail(&mut uow, e).await);
                }
            }
            Err(e) => return Err(self.fail(&mut uow, e).await),
        }

        info!(
            scanned = stats.scanned,
            new_links = stats.new_links,
            dry_run = self.dry_run,
            "relink finished"
        );
        Ok(stats)
    }

    async fn scan(
        &self,
        matcher: &KeywordMatcher<AccountId>,
        uow: &mut UnitOfWork<'_, S>,
        stats: &mut RelinkStats,
    ) -> Result<(), StoreError> {
        let mut cursor: Option<PageCursor> = None;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!(scanned = stats.scanned, "relink cancelled, flushing current batch");
                return Ok(());
            }
            let page = self.store.entries_page(cursor, self.page_size).await?;
            let Some(last) = page.last() else {
                return Ok(());
            };
            cursor = Some(PageCursor::from(last));
            debug!(entries = page.len(), "relink page");

            for stored in &page {
                stats.scanned += 1;
                counter!("relink_entries_scanned_total").increment(1);

                let missing = matcher
                    .extract(&stored.match_text())
                    .into_iter()
                    .filter(|a| !stored.accounts.contains(a));
                for account in missing {
                    if self.dry_run {
                        stats.new_links += 1;
                        continue;
                    }
                    if uow.link_account(stored.id, account).await? {
                        stats.new_links += 1;
                        counter!("relink_links_created_total").increment(1);
                        uow.checkpoint().await?;
                    }
                }
            }

            if page.len() < self.page_size {
                return Ok(());
            }
        }
    }

    async fn fail(&self, uow: &mut UnitOfWork<'_, S>, err: StoreError) -> RunError {
        let lost = uow.rollback().await;
        warn!(error = %err, lost, "relink aborted by store failure");
        err.into()
    }
}
