// src/telemetry.rs
//! Logging and Prometheus textfile output for the batch jobs.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "NEWS_INGEST_LOG_JSON";
pub const ENV_METRICS_PATH: &str = "NEWS_INGEST_METRICS_PATH";
pub const DEFAULT_LOG_FILTER: &str = "news_ingest=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// JSON output when `json` is set or `NEWS_INGEST_LOG_JSON=1`.
pub fn init_tracing(json: bool) {
    let json = json
        || std::env::var(ENV_LOG_JSON)
            .ok()
            .is_some_and(|v| v == "1");

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // stdout carries the stats JSON
    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialised: {e}");
    }
}

/// Prometheus recorder whose snapshot is written to a textfile at exit,
/// for node_exporter's textfile collector.
pub struct Metrics {
    pub handle: PrometheusHandle,
    path: PathBuf,
}

impl Metrics {
    /// Install the recorder when `NEWS_INGEST_METRICS_PATH` is set.
    /// Without it, metric macros stay no-ops.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(ENV_METRICS_PATH) {
            Ok(p) if !p.trim().is_empty() => Self::install(PathBuf::from(p)).map(Some),
            _ => Ok(None),
        }
    }

    pub fn install(path: PathBuf) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        Ok(Self { handle, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the exposition text next to the target, then rename over it.
    pub async fn write_textfile(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("prom.tmp");
        tokio::fs::write(&tmp, self.render())
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
