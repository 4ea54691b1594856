use crate::types::{Feed, Result};
use async_trait::async_trait;

/// Capability to retrieve and parse one syndication source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the feed at `url`. Entries come back in source order.
    async fn fetch(&self, url: &str) -> Result<Feed>;
}

/// Capability to deliver a text message to a fixed destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<()>;
}
