use crate::config::RuntimeConfig;
use crate::store::ItemStore;
use crate::traits::{FeedSource, Notifier};
use crate::types::{FeedBatch, FeedItem};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Unsent items loaded per delivery cycle, independent of the per-feed limit.
pub const DELIVERY_BATCH_SIZE: usize = 10;

/// Slots between two stages. tokio has no zero-capacity channel; one slot
/// is the closest thing to a rendezvous.
pub const HANDOFF_CAPACITY: usize = 1;

/// Counters for the `/stats` command.
#[derive(Debug, Default)]
pub struct PipelineStats {
    fetch_cycles: AtomicU64,
    fetch_failures: AtomicU64,
    items_inserted: AtomicU64,
    delivery_cycles: AtomicU64,
    items_delivered: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub fetch_cycles: u64,
    pub fetch_failures: u64,
    pub items_inserted: u64,
    pub delivery_cycles: u64,
    pub items_delivered: u64,
    pub send_failures: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fetch_cycles: self.fetch_cycles.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            items_inserted: self.items_inserted.load(Ordering::Relaxed),
            delivery_cycles: self.delivery_cycles.load(Ordering::Relaxed),
            items_delivered: self.items_delivered.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// A sent item travelling to the acknowledgment stage. `recorded` fires once
/// the store has been updated, successfully or not.
#[derive(Debug)]
pub struct Delivered {
    pub item: FeedItem,
    recorded: oneshot::Sender<()>,
}

/// Fetch -> ingest -> store <- delivery -> ack -> store.
pub struct RelayPipeline {
    store: Arc<ItemStore>,
    source: Arc<dyn FeedSource>,
    notifier: Arc<dyn Notifier>,
    config: Arc<RuntimeConfig>,
    feed_urls: Arc<[String]>,
    stats: Arc<PipelineStats>,
}

impl RelayPipeline {
    pub fn new(
        store: Arc<ItemStore>,
        source: Arc<dyn FeedSource>,
        notifier: Arc<dyn Notifier>,
        config: Arc<RuntimeConfig>,
        feed_urls: Vec<String>,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            config,
            feed_urls: feed_urls.into(),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn config(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.config)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn fetch_stage(&self) -> FetchStage {
        FetchStage {
            source: Arc::clone(&self.source),
            feed_urls: Arc::clone(&self.feed_urls),
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn ingest_stage(&self) -> IngestStage {
        IngestStage {
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn delivery_stage(&self) -> DeliveryStage {
        DeliveryStage {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn ack_stage(&self) -> AckStage {
        AckStage {
            store: Arc::clone(&self.store),
        }
    }

    /// Run all four stages until `shutdown` fires and every stage has drained.
    pub async fn run(&self, shutdown: CancellationToken) {
        let (batch_tx, batch_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (sent_tx, sent_rx) = mpsc::channel(HANDOFF_CAPACITY);

        let mut stages = JoinSet::new();
        stages.spawn(self.fetch_stage().run(shutdown.clone(), batch_tx));
        stages.spawn(self.ingest_stage().run(batch_rx));
        stages.spawn(self.delivery_stage().run(shutdown, sent_tx));
        stages.spawn(self.ack_stage().run(sent_rx));

        info!("Pipeline started");
        while let Some(joined) = stages.join_next().await {
            if let Err(e) = joined {
                error!("Pipeline stage aborted: {}", e);
            }
        }
        info!("Pipeline stopped");
    }
}

pub struct FetchStage {
    source: Arc<dyn FeedSource>,
    feed_urls: Arc<[String]>,
    config: Arc<RuntimeConfig>,
    stats: Arc<PipelineStats>,
}

impl FetchStage {
    /// Dropping `batches` on return is what stops the ingest stage.
    ///
    /// The hand-off holds one batch, so this stage may finish the next cycle
    /// and park its batch while ingest is still writing the previous one. It
    /// can never run more than that one batch ahead.
    pub async fn run(self, shutdown: CancellationToken, batches: mpsc::Sender<FeedBatch>) {
        info!("Fetch stage started for {} feeds", self.feed_urls.len());

        loop {
            let delay = self.config.fetch_interval();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let batch = self.fetch_cycle().await;
            if batches.send(batch).await.is_err() {
                warn!("Ingest stage has stopped, ending fetch stage");
                break;
            }
        }

        info!("Fetch stage stopped");
    }

    /// Fetch every feed concurrently and cut each down to the items limit.
    ///
    /// The limit is read once, so a change made mid-cycle applies from the
    /// next cycle. One task is spawned per URL; fine for a handful of feeds,
    /// not meant for large source lists.
    pub async fn fetch_cycle(&self) -> FeedBatch {
        let limit = self.config.items_limit();

        let mut tasks = JoinSet::new();
        for url in self.feed_urls.iter() {
            let source = Arc::clone(&self.source);
            let url = url.clone();
            tasks.spawn(async move {
                let result = source.fetch(&url).await;
                (url, result)
            });
        }

        let mut feeds = Vec::with_capacity(self.feed_urls.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(mut feed))) => {
                    feed.truncate(limit);
                    feeds.push(feed);
                }
                Ok((url, Err(e))) => {
                    PipelineStats::bump(&self.stats.fetch_failures, 1);
                    warn!("Failed to fetch feed {}: {}", url, e);
                }
                Err(e) => {
                    PipelineStats::bump(&self.stats.fetch_failures, 1);
                    error!("Fetch task aborted: {}", e);
                }
            }
        }

        PipelineStats::bump(&self.stats.fetch_cycles, 1);
        info!("feeds fetched: {}", feeds.len());
        FeedBatch::new(feeds)
    }
}

pub struct IngestStage {
    store: Arc<ItemStore>,
    stats: Arc<PipelineStats>,
}

impl IngestStage {
    /// Persist batches until the fetch stage closes the channel.
    pub async fn run(self, mut batches: mpsc::Receiver<FeedBatch>) {
        info!("Ingest stage started");

        while let Some(batch) = batches.recv().await {
            match self.store.insert_batch(&batch).await {
                Ok(inserted) => {
                    PipelineStats::bump(&self.stats.items_inserted, inserted);
                    debug!("Inserted {} new items", inserted);
                }
                Err(e) => error!("Failed to insert batch: {}", e),
            }
        }

        info!("Ingest stage stopped");
    }
}

pub struct DeliveryStage {
    store: Arc<ItemStore>,
    notifier: Arc<dyn Notifier>,
    config: Arc<RuntimeConfig>,
    stats: Arc<PipelineStats>,
}

impl DeliveryStage {
    /// Dropping `delivered` on return is what stops the acknowledgment stage.
    pub async fn run(self, shutdown: CancellationToken, delivered: mpsc::Sender<Delivered>) {
        info!("Delivery stage started");

        loop {
            let delay = self.config.delivery_interval();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = self.delivery_cycle(&delivered).await {
                warn!(
                    "Acknowledgment stage has stopped, {} stays unsent",
                    e.0.item.link
                );
                break;
            }
        }

        info!("Delivery stage stopped");
    }

    /// Send up to [`DELIVERY_BATCH_SIZE`] unsent items, one at a time, newest first.
    ///
    /// Returns once every successfully sent item has been recorded, so the
    /// next cycle never reloads an item that is still waiting for its ack.
    pub async fn delivery_cycle(
        &self,
        delivered: &mpsc::Sender<Delivered>,
    ) -> Result<(), mpsc::error::SendError<Delivered>> {
        PipelineStats::bump(&self.stats.delivery_cycles, 1);

        let items = match self.store.list_unsent(DELIVERY_BATCH_SIZE).await {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to load unsent items, skipping cycle: {}", e);
                return Ok(());
            }
        };
        info!("items to send: {}", items.len());

        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            if let Err(e) = self.notifier.send_message(&format_message(&item)).await {
                PipelineStats::bump(&self.stats.send_failures, 1);
                warn!("Failed to send message for {}: {}", item.link, e);
                continue;
            }
            PipelineStats::bump(&self.stats.items_delivered, 1);

            let (recorded, ack) = oneshot::channel();
            delivered.send(Delivered { item, recorded }).await?;
            pending.push(ack);
        }

        for ack in pending {
            // An Err only means the ack stage dropped the item without replying.
            let _ = ack.await;
        }

        Ok(())
    }
}

pub struct AckStage {
    store: Arc<ItemStore>,
}

impl AckStage {
    /// Mark items sent until the delivery stage closes the channel.
    pub async fn run(self, mut delivered: mpsc::Receiver<Delivered>) {
        info!("Acknowledgment stage started");

        while let Some(Delivered { item, recorded }) = delivered.recv().await {
            if let Err(e) = self.store.mark_sent(std::slice::from_ref(&item)).await {
                error!("Failed to mark {} as sent: {}", item.link, e);
            }
            let _ = recorded.send(());
        }

        info!("Acknowledgment stage stopped");
    }
}

/// Title on the first line, link on the second.
pub fn format_message(item: &FeedItem) -> String {
    format!("{}\n{}", item.title, item.link)
}
