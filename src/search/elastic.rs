// src/search/elastic.rs
//! Elasticsearch/OpenSearch-compatible backend over plain HTTP.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{match_strength, SearchBackend};
use crate::error::SearchError;
use crate::model::{DomainId, SearchDocument, SearchHit};

const MAX_HITS: usize = 5;

#[derive(Clone)]
pub struct ElasticSearch {
    base_url: String,
    index: String,
    client: Client,
    timeout: Duration,
    /// Sent as `minimum_should_match`; hits are rescored locally anyway.
    min_should_match: f32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_source")]
    source: SearchDocument,
}

impl ElasticSearch {
    pub fn new(base_url: &str, index: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            min_should_match: 0.9,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_min_should_match(mut self, threshold: f32) -> Self {
        self.min_should_match = threshold.clamp(0.0, 1.0);
        self
    }

    /// Query body: `multi_match` on title with "minimum should match",
    /// filtered to one domain and one ingestion day.
    pub fn similar_titles_query(&self, title: &str, domain_id: DomainId, date: NaiveDate) -> Value {
        let msm = format!("{}%", (self.min_should_match * 100.0).round() as u32);
        json!({
            "size": MAX_HITS,
            "query": {
                "bool": {
                    "must": [{
                        "multi_match": {
                            "query": title,
                            "fields": ["title"],
                            "minimum_should_match": msm
                        }
                    }],
                    "filter": [
                        { "term": { "domain_id": domain_id.0 } },
                        { "term": { "ingested_on": date.format("%Y-%m-%d").to_string() } }
                    ]
                }
            }
        })
    }
}

#[async_trait]
impl SearchBackend for ElasticSearch {
    async fn index_document(&self, doc: &SearchDocument) -> Result<(), SearchError> {
        let url = format!("{}/{}/_doc/{}", self.base_url, self.index, doc.entry_id);
        self.client
            .put(&url)
            .timeout(self.timeout)
            .json(doc)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn find_similar_titles(
        &self,
        title: &str,
        domain_id: DomainId,
        date: NaiveDate,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let body = self.similar_titles_query(title, domain_id, date);
        let resp: SearchResponse = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut hits: Vec<SearchHit> = resp
            .hits
            .hits
            .into_iter()
            .map(|h| SearchHit {
                score: match_strength(title, &h.source.title),
                entry_id: h.source.entry_id,
                title: h.source.title,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "elasticsearch"
    }
}
