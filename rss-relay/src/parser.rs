use crate::types::{Feed, FeedEntry, RelayError, Result};
use feed_rs::parser;
use tracing::debug;

/// Turns raw RSS / Atom / JSON Feed bytes into a [`Feed`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed(&self, url: &str, content: &[u8]) -> Result<Feed> {
        debug!("Parsing feed content from {} ({} bytes)", url, content.len());

        let feed = parser::parse(content)
            .map_err(|e| RelayError::Parse(format!("failed to parse {}: {}", url, e)))?;

        let title = feed.title.map(|t| t.content);
        let entries: Vec<FeedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.parse_entry(entry))
            .collect();

        debug!("Parsed {} entries from {}", entries.len(), url);

        Ok(Feed {
            url: url.to_string(),
            title,
            entries,
        })
    }

    fn parse_entry(&self, entry: feed_rs::model::Entry) -> Option<FeedEntry> {
        // Without a link there is nothing to dedup on.
        let Some(link) = entry.links.first().map(|l| l.href.trim().to_string()) else {
            debug!("Skipping entry without link: {}", entry.id);
            return None;
        };
        if link.is_empty() {
            return None;
        }

        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        Some(FeedEntry { title, link })
    }
}
