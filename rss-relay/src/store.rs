use crate::types::{FeedBatch, FeedItem, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

const SELECT_ITEM: &str = "SELECT link, title, sent, created_at FROM rss";

/// Persistent table of seen items. The only shared mutable state in the relay.
///
/// Every call commits on its own; there are no cross-call transactions.
pub struct ItemStore {
    db: SqlitePool,
}

impl ItemStore {
    /// Open (and create if missing) the SQLite database at `database_url`.
    pub async fn open(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!("Opened item store at {}", database_url);
        Ok(Self { db })
    }

    pub fn from_pool(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create the `rss` table if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Item store schema is up to date");
        Ok(())
    }

    /// Insert every entry of the batch unless its link is already stored.
    ///
    /// Stops at the first failing insert; rows inserted before it stay committed.
    /// Returns the number of rows that were actually new.
    pub async fn insert_batch(&self, batch: &FeedBatch) -> Result<u64> {
        let mut inserted = 0;

        for entry in batch.entries() {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO rss (link, title, sent, created_at)
                VALUES ($1, $2, 0, $3)
                "#,
            )
            .bind(&entry.link)
            .bind(&entry.title)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

            inserted += result.rows_affected();
        }

        debug!("Stored {} new items out of {}", inserted, batch.item_count());
        Ok(inserted)
    }

    /// Up to `limit` unsent items, most recently created first.
    pub async fn list_unsent(&self, limit: usize) -> Result<Vec<FeedItem>> {
        let query = format!(
            "{} WHERE sent = 0 ORDER BY created_at DESC, rowid DESC LIMIT $1",
            SELECT_ITEM
        );
        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Flag each item as delivered. Already-sent items are left alone.
    ///
    /// Every item is attempted; the first failure is returned once all have been tried.
    pub async fn mark_sent(&self, items: &[FeedItem]) -> Result<u64> {
        let mut updated = 0;
        let mut first_error = None;

        for item in items {
            let result = sqlx::query("UPDATE rss SET sent = 1 WHERE link = $1 AND sent = 0")
                .bind(&item.link)
                .execute(&self.db)
                .await;

            match result {
                Ok(result) => updated += result.rows_affected(),
                Err(e) => {
                    warn!("Failed to mark {} as sent: {}", item.link, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(updated),
        }
    }

    pub async fn get(&self, link: &str) -> Result<Option<FeedItem>> {
        let query = format!("{} WHERE link = $1", SELECT_ITEM);
        let row = sqlx::query(&query)
            .bind(link)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn stats(&self) -> Result<HashMap<String, i64>> {
        let mut stats = HashMap::new();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rss")
            .fetch_one(&self.db)
            .await?;
        stats.insert("total_items".to_string(), total);

        let unsent: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rss WHERE sent = 0")
            .fetch_one(&self.db)
            .await?;
        stats.insert("unsent_items".to_string(), unsent);

        Ok(stats)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

fn item_from_row(row: &SqliteRow) -> Result<FeedItem> {
    Ok(FeedItem {
        link: row.try_get("link")?,
        title: row.try_get("title")?,
        sent: row.try_get("sent")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}
