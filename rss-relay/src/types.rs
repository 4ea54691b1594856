use chrono::{DateTime, Utc};

/// One syndication source as returned by a single fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub url: String,
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

impl Feed {
    /// Keep only the first `limit` entries, preserving source order.
    pub fn truncate(&mut self, limit: usize) {
        self.entries.truncate(limit);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
}

/// A persisted entry. `link` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub link: String,
    pub title: String,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of one fetch cycle, handed from the fetch stage to the ingest stage.
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub feeds: Vec<Feed>,
}

impl FeedBatch {
    pub fn new(feeds: Vec<Feed>) -> Self {
        Self { feeds }
    }

    pub fn item_count(&self) -> usize {
        self.feeds.iter().map(|feed| feed.entries.len()).sum()
    }

    /// Iterate every entry across every feed, feed by feed in source order.
    pub fn entries(&self) -> impl Iterator<Item = &FeedEntry> {
        self.feeds.iter().flat_map(|feed| feed.entries.iter())
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "RSS-Relay/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("{0}")]
    InvalidCommand(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
