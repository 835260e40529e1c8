// src/ingest/feed.rs
//! RSS 2.0 / Atom body -> `RawEntry` list.
//!
//! Event-driven on purpose: feeds in the wild mix namespaces, repeat and
//! interleave elements, and embed HTML entities that XML itself does not
//! define. Unknown elements are ignored.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;

use crate::error::FeedParseError;
use crate::model::RawEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Guid,
    Title,
    Link,
    Published,
    Updated,
    Description,
    Summary,
    Category,
}

struct ItemState {
    raw: RawEntry,
    /// nesting depth of the item element itself
    depth: usize,
    field: Option<(Field, usize)>,
    buf: String,
    atom: bool,
    /// `raw.link` came from an `href`, so RSS `<link>` text may replace it
    link_from_href: bool,
}

pub fn parse_feed(xml: &str) -> Result<Vec<RawEntry>, FeedParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut item: Option<ItemState> = None;
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| FeedParseError(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => {
                depth += 1;
                saw_root = true;
                let name = local_name(&e);
                match item.as_mut() {
                    None if name == "item" || name == "entry" => {
                        item = Some(ItemState {
                            raw: RawEntry::default(),
                            depth,
                            field: None,
                            buf: String::new(),
                            atom: name == "entry",
                            link_from_href: false,
                        });
                    }
                    Some(st) if st.field.is_none() && depth == st.depth + 1 => {
                        if let Some(field) = field_for(&name, st.atom) {
                            st.buf.clear();
                            st.field = Some((field, depth));
                            start_attributes(st, field, &e);
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                saw_root = true;
                if let Some(st) = item.as_mut() {
                    if st.field.is_none() && depth == st.depth {
                        let name = local_name(&e);
                        if let Some(field) = field_for(&name, st.atom) {
                            st.buf.clear();
                            start_attributes(st, field, &e);
                            finish_field(st, field);
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some(st) = item.as_mut() {
                    if st.field.is_some() {
                        push_text(&mut st.buf, &text_of(&t));
                    }
                }
            }
            Event::CData(c) => {
                if let Some(st) = item.as_mut() {
                    if st.field.is_some() {
                        push_text(&mut st.buf, &String::from_utf8_lossy(&c));
                    }
                }
            }
            Event::End(_) => {
                if let Some(st) = item.as_mut() {
                    if let Some((field, field_depth)) = st.field {
                        if depth == field_depth {
                            finish_field(st, field);
                            st.field = None;
                        }
                    }
                    if depth == st.depth {
                        if let Some(done) = item.take() {
                            out.push(done.raw);
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(FeedParseError("empty document".to_string()));
    }
    Ok(out)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

fn field_for(name: &str, atom: bool) -> Option<Field> {
    let field = match (name, atom) {
        ("guid", false) | ("id", true) => Field::Guid,
        ("title", _) => Field::Title,
        ("link", _) => Field::Link,
        ("pubdate", false) | ("published", _) | ("date", _) | ("issued", true) => {
            Field::Published
        }
        ("updated", _) | ("modified", true) => Field::Updated,
        ("description", _) | ("content", true) | ("encoded", false) => Field::Description,
        ("summary", _) => Field::Summary,
        ("category", _) | ("subject", _) => Field::Category,
        _ => return None,
    };
    Some(field)
}

/// Atom carries link targets and category terms in attributes.
fn start_attributes(st: &mut ItemState, field: Field, e: &BytesStart<'_>) {
    match field {
        Field::Link => {
            let Some(href) = attr(e, "href") else {
                return;
            };
            let rel = attr(e, "rel");
            let alternate = rel.as_deref().map_or(true, |r| r == "alternate");
            if st.atom {
                if alternate || st.raw.link.is_none() {
                    st.raw.link = Some(href);
                }
                // attribute link wins over any element text
                st.field = None;
            } else if alternate && st.raw.link.is_none() {
                // `atom:link` inside an RSS item; `rel="self"` points at the feed
                st.raw.link = Some(href);
                st.link_from_href = true;
            }
        }
        Field::Category => {
            if let Some(term) = attr(e, "term") {
                st.buf = term;
            }
        }
        _ => {}
    }
}

fn finish_field(st: &mut ItemState, field: Field) {
    let value = std::mem::take(&mut st.buf).trim().to_string();
    if value.is_empty() {
        return;
    }
    let raw = &mut st.raw;
    match field {
        Field::Guid => set_once(&mut raw.guid, value),
        Field::Title => set_once(&mut raw.title, value),
        Field::Link if st.link_from_href => {
            raw.link = Some(value);
            st.link_from_href = false;
        }
        Field::Link => set_once(&mut raw.link, value),
        Field::Published => set_once(&mut raw.published, value),
        Field::Updated => set_once(&mut raw.updated, value),
        // `content:encoded` and `description` both land here; keep the first
        Field::Description => set_once(&mut raw.description, value),
        Field::Summary => set_once(&mut raw.summary, value),
        Field::Category => raw.tags.push(value),
    }
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// XML-unescape, falling back to HTML entity decoding for entities XML does
/// not define (`&nbsp;`, `&rsquo;`, ...).
fn text_of(t: &BytesText<'_>) -> String {
    match t.unescape() {
        Ok(s) => s.into_owned(),
        Err(_) => html_escape::decode_html_entities(&String::from_utf8_lossy(t)).into_owned(),
    }
}

fn push_text(buf: &mut String, s: &str) {
    if !buf.is_empty() && !buf.ends_with(char::is_whitespace) {
        buf.push(' ');
    }
    buf.push_str(s);
}
