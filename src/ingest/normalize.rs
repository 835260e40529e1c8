// src/ingest/normalize.rs
//! Raw feed entry -> canonical `NewsEntry`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::model::{FeedSource, NewsEntry, RawEntry};

pub const SHORT_DESC_CHARS: usize = 250;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]*>").expect("tag regex"));
static RE_DROP_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("block regex")
});
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("img regex")
});

/// Strip HTML markup: drop script/style blocks and tags, decode entities,
/// collapse whitespace.
pub fn strip_html(s: &str) -> String {
    let out = RE_DROP_BLOCKS.replace_all(s, " ");
    let out = RE_TAGS.replace_all(&out, " ");
    let out = html_escape::decode_html_entities(&out).replace('\u{00A0}', " ");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// `src` of the first `<img>` element, entity-decoded.
pub fn first_image_src(s: &str) -> Option<String> {
    let caps = RE_IMG_SRC.captures(s)?;
    let raw = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    let src = html_escape::decode_html_entities(raw.as_str()).trim().to_string();
    (!src.is_empty()).then_some(src)
}

/// Parse a feed timestamp and convert it to UTC.
///
/// Some sources emit the weekday as "Wes"; it is patched to "Wed" first.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim().replace("Wes", "Wed");
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn non_empty(field: Option<&String>) -> Option<String> {
    field
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Lowercased reference names; a raw tag is kept when it is a substring of one.
    known_tags: Vec<String>,
}

impl Normalizer {
    pub fn new<I, S>(known_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            known_tags: known_tags
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    fn keep_tag(&self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        !tag.is_empty() && self.known_tags.iter().any(|known| known.contains(&tag))
    }

    /// Build the canonical entry. `tags` is left empty; topic labels are the
    /// category matcher's job.
    pub fn normalize(
        &self,
        raw: &RawEntry,
        source: &FeedSource,
        ingested_at: DateTime<Utc>,
    ) -> Result<NewsEntry, ValidationError> {
        let guid = non_empty(raw.guid.as_ref()).ok_or(ValidationError::MissingField("guid"))?;
        let title = non_empty(raw.title.as_ref()).ok_or(ValidationError::MissingField("title"))?;
        let link = non_empty(raw.link.as_ref()).ok_or(ValidationError::MissingField("link"))?;

        let posted_raw = non_empty(raw.published.as_ref())
            .or_else(|| non_empty(raw.updated.as_ref()))
            .ok_or(ValidationError::MissingField("posted_at"))?;
        let posted_at = parse_timestamp(&posted_raw).ok_or(ValidationError::BadTimestamp)?;

        let description = non_empty(raw.description.as_ref())
            .or_else(|| non_empty(raw.summary.as_ref()))
            .ok_or(ValidationError::MissingField("description"))?;

        let short_desc: String = strip_html(&description)
            .chars()
            .take(SHORT_DESC_CHARS)
            .collect();
        let image_url = first_image_src(&description);

        let mut seen = BTreeSet::new();
        let source_tags = raw
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| self.keep_tag(t))
            .filter(|t| seen.insert(t.to_lowercase()))
            .map(str::to_string)
            .collect();

        Ok(NewsEntry {
            guid,
            title,
            link,
            posted_at,
            description,
            short_desc,
            image_url,
            tags: BTreeSet::new(),
            source_tags,
            domain_id: source.domain_id,
            source_id: source.id,
            ingested_at,
        })
    }
}
