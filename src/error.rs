// src/error.rs
//! Error taxonomy for the ingestion and relink jobs.
//!
//! Only `StoreError::Backend` is allowed to abort work (the current source for
//! ingestion, the whole job for relinking). Every other error degrades a
//! single entry or a single source.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("gave up after {attempts} timed-out attempts")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("recording fetch time failed: {0}")]
    Bookkeeping(String),
}

#[derive(Debug, Error)]
#[error("feed body is not valid RSS/Atom: {0}")]
pub struct FeedParseError(pub String);

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),

    #[error("timestamp could not be parsed")]
    BadTimestamp,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entry with guid {0:?} already exists")]
    AlreadyExists(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected search backend response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SearchError::Response(err.to_string())
        } else {
            SearchError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
#[error("keyword automaton could not be built: {0}")]
pub struct MatcherError(#[from] pub aho_corasick::BuildError);

/// Failure that stops a whole ingestion or relink run before or between
/// sources (dictionary read, matcher build, relink store failure).
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Matcher(#[from] MatcherError),
}
