// src/config.rs
//! Job configuration: `$NEWS_INGEST_CONFIG`, then `config/ingest.toml`, then defaults.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::CategoryRules;

pub const ENV_CONFIG_PATH: &str = "NEWS_INGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub ingest: PipelineSection,
    pub dedup: DedupSection,
    pub relink: RelinkSection,
    pub search: SearchSection,
    pub categories: CategoryRules,
    pub known_tags: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ingest: PipelineSection::default(),
            dedup: DedupSection::default(),
            relink: RelinkSection::default(),
            search: SearchSection::default(),
            categories: default_categories(),
            known_tags: default_known_tags(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub batch_size: usize,
    pub fetch_timeout_secs: u64,
    pub max_fetch_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_concurrent_sources: usize,
    pub user_agent: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: 100,
            fetch_timeout_secs: 20,
            max_fetch_attempts: 3,
            retry_delay_ms: 1_000,
            max_concurrent_sources: 1,
            user_agent: concat!("news-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PipelineSection {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub similarity_threshold: f32,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelinkSection {
    pub page_size: usize,
    pub commit_every: usize,
}

impl Default for RelinkSection {
    fn default() -> Self {
        Self {
            page_size: 500,
            commit_every: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackendKind {
    Memory,
    Elasticsearch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub backend: SearchBackendKind,
    pub url: String,
    pub index: String,
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            backend: SearchBackendKind::Memory,
            url: "http://localhost:9200".to_string(),
            index: "news_entries".to_string(),
            timeout_secs: 5,
        }
    }
}

pub fn default_categories() -> CategoryRules {
    let mut rules = CategoryRules::new();
    let mut add = |label: &str, phrases: &[&str]| {
        rules.insert(
            label.to_string(),
            phrases.iter().map(|p| p.to_string()).collect(),
        );
    };
    add("financial", &["financial", "finance", "bank", "banking"]);
    add("markets", &["markets", "stock market", "stocks", "equities", "bonds"]);
    add("business", &["business", "earnings", "merger", "acquisition"]);
    add("economy", &["economy", "economic", "gdp", "inflation", "unemployment"]);
    rules
}

/// Agency/tag names a raw syndication tag must be a substring of to be kept.
pub fn default_known_tags() -> Vec<String> {
    [
        "federal reserve",
        "securities and exchange commission",
        "department of the treasury",
        "department of commerce",
        "department of labor",
        "department of energy",
        "department of defense",
        "department of justice",
        "department of state",
        "environmental protection agency",
        "food and drug administration",
        "federal trade commission",
        "federal communications commission",
        "internal revenue service",
        "small business administration",
        "bureau of labor statistics",
        "commodity futures trading commission",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl IngestConfig {
    /// Load from an explicit TOML file and sanitize.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: IngestConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks:
    /// 1) $NEWS_INGEST_CONFIG
    /// 2) config/ingest.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load_from(&fallback);
        }
        Ok(Self::default())
    }

    fn sanitized(mut self) -> Self {
        let p = &mut self.ingest;
        p.batch_size = p.batch_size.max(1);
        p.max_fetch_attempts = p.max_fetch_attempts.max(1);
        p.max_concurrent_sources = p.max_concurrent_sources.max(1);
        if p.fetch_timeout_secs == 0 {
            p.fetch_timeout_secs = PipelineSection::default().fetch_timeout_secs;
        }
        self.dedup.similarity_threshold = self.dedup.similarity_threshold.clamp(0.0, 1.0);
        self.relink.page_size = self.relink.page_size.max(1);
        self.relink.commit_every = self.relink.commit_every.max(1);
        self.known_tags = self
            .known_tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }
}
