// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use news_ingest::error::FetchError;
use news_ingest::model::{DomainId, FeedSource, SourceId};
use news_ingest::FeedFetcher;
use std::collections::HashMap;
use std::sync::Mutex;

/// Replies per URL, consumed in order; the last reply repeats forever.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Vec<Result<String, FetchError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(self, url: &str, body: &str) -> Self {
        self.script(url, vec![Ok(body.to_string())])
    }

    pub fn script(self, url: &str, replies: Vec<Result<String, FetchError>>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), replies);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut replies = self.replies.lock().unwrap();
        let queue = replies
            .get_mut(url)
            .ok_or_else(|| FetchError::Status(404))?;
        match queue.len() {
            0 => Err(FetchError::Status(404)),
            1 => queue[0].clone(),
            _ => queue.remove(0),
        }
    }
}

pub fn source(id: i64, domain: i64) -> FeedSource {
    FeedSource {
        id: SourceId(id),
        name: format!("source-{id}"),
        url: format!("https://feeds.test/{id}.xml"),
        domain_id: DomainId(domain),
        last_fetched: None,
    }
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))).expect("fixture")
}

/// Minimal RSS body from `(guid, title)` pairs.
pub fn rss(items: &[(&str, &str)]) -> String {
    let mut body = String::from("<rss version=\"2.0\"><channel><title>t</title>");
    for (guid, title) in items {
        body.push_str(&format!(
            "<item><guid>{guid}</guid><title>{title}</title>\
             <link>https://feeds.test/{guid}</link>\
             <pubDate>Wed, 06 Mar 2024 10:00:00 GMT</pubDate>\
             <description>About {title}</description></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

#[async_trait]
impl<'a> FeedFetcher for &'a ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}
