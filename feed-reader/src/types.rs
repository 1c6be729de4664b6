use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the list used when the caller does not pick one.
pub const DEFAULT_LIST: &str = "default";

/// Converts unix seconds into a UTC timestamp, falling back to the epoch.
pub fn from_unix(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

/// The zero value used for timestamps that were never set.
pub fn epoch() -> DateTime<Utc> {
    from_unix(0)
}

/// One subscription record inside a named list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub added_at: DateTime<Utc>,
    pub address: String,
}

/// Per-URL fetch bookkeeping shared by every list that follows the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfoItem {
    pub url: String,
    pub last_check: DateTime<Utc>,
    pub etag: String,
    pub fetch_after: DateTime<Utc>,
}

impl CacheInfoItem {
    /// Lazily created entry for a URL that has never been fetched.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_check: epoch(),
            etag: String::new(),
            fetch_after: epoch(),
        }
    }

    pub fn has_been_checked(&self) -> bool {
        self.last_check.timestamp() != 0
    }
}

/// Cache-info table keyed by URL.
pub type CacheInfo = BTreeMap<String, CacheInfoItem>;

/// URL set resolved from one or more lists.
pub type UrlSet = BTreeMap<String, ListEntry>;

/// A single item ready for display, produced fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub feed_title: String,
    pub item_title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub is_new: bool,
    pub feed_color: u8,
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: String,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

/// Options for a single display run.
#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Lists to read from; empty means every list.
    pub lists: Vec<String>,
    /// Maximum number of items returned, 0 for no limit.
    pub limit: usize,
    pub since: Option<DateTime<Utc>>,
}

/// Statistics collected while running the pipeline once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub feeds_count: usize,
    pub feeds_cached: usize,
    pub feeds_fetched: usize,
    pub feeds_failed: usize,
    pub items_count: usize,
    pub items_shown: usize,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub max_concurrency: usize,
    pub accept: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("feedr/v{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 30,
            max_redirects: 5,
            max_concurrency: 16,
            accept: "application/rss+xml, application/atom+xml, application/xml, application/json, text/xml"
                .to_string(),
        }
    }
}

/// User settings persisted as `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: bool,
    #[serde(default)]
    pub color_map: BTreeMap<u8, u8>,
}

impl Config {
    pub fn map_color(&self, color: u8) -> u8 {
        self.color_map.get(&color).copied().unwrap_or(color)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid list name: {0:?}")]
    InvalidListName(String),

    #[error("No items in list: {0}")]
    EmptyList(String),

    #[error("List not found: {0}")]
    ListNotFound(String),

    #[error("List already exists: {0}")]
    ListExists(String),

    #[error("Invalid {kind} line: {line}")]
    Corrupt { kind: &'static str, line: String },

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("No feeds to display")]
    NoFeeds,

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid datetime: {0}")]
    InvalidDateTime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Feed task failed: {0}")]
    TaskFailed(String),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
