use anyhow::{bail, Context};
use clap::Parser;
use rss_relay::{
    parse_duration, CommandHandler, CommandListener, FetchConfig, Fetcher, ItemStore,
    RelayPipeline, RuntimeConfig, TelegramClient, TelegramNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_FEEDS: &[&str] = &[
    "https://blog.golang.org/feed.atom",
    "https://www.cockroachlabs.com/blog/index.xml",
    "https://matklad.github.io/feed.xml",
    "https://envoy.engineering/feed",
    "https://eng.lyft.com/feed",
];

/// Polls a fixed set of feeds and relays unseen entries to a Telegram chat.
#[derive(Debug, Parser)]
#[command(name = "rss-relay", version)]
struct Cli {
    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: String,

    /// Chat that receives feed items
    #[arg(long, env = "TELEGRAM_CHAT_ID", allow_hyphen_values = true)]
    chat_id: i64,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://config/rss.db")]
    database_url: String,

    /// Feed URL to poll; repeat or comma-separate for several
    #[arg(long = "feed", env = "FEED_URLS", value_delimiter = ',')]
    feeds: Vec<String>,

    #[arg(long, env = "FETCH_INTERVAL", default_value = "13s", value_parser = parse_interval)]
    fetch_interval: Duration,

    #[arg(long, env = "DELIVERY_INTERVAL", default_value = "24s", value_parser = parse_interval)]
    delivery_interval: Duration,

    /// Maximum items taken from each feed per fetch
    #[arg(long, env = "ITEMS_LIMIT", default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    items_limit: u32,

    #[arg(long, env = "RSS_RELAY_USER_AGENT", default_value = "RSS-Relay/1.0")]
    user_agent: String,
}

fn parse_interval(text: &str) -> Result<Duration, String> {
    parse_duration(text).map_err(|e| e.to_string())
}

/// Validate http(s) URLs and drop repeats, keeping the first occurrence.
fn feed_urls(raw: &[String]) -> anyhow::Result<Vec<String>> {
    let raw: Vec<String> = if raw.is_empty() {
        DEFAULT_FEEDS.iter().map(|url| url.to_string()).collect()
    } else {
        raw.iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect()
    };

    let mut urls: Vec<String> = Vec::with_capacity(raw.len());
    for url in raw {
        let parsed = Url::parse(&url).with_context(|| format!("invalid feed URL {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("feed URL must be http or https: {}", url);
        }
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    if urls.is_empty() {
        bail!("no feed URLs configured");
    }
    Ok(urls)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let feeds = feed_urls(&cli.feeds)?;

    info!("Starting RSS relay with {} feeds", feeds.len());

    let store = Arc::new(
        ItemStore::open(&cli.database_url)
            .await
            .with_context(|| format!("failed to open item store at {}", cli.database_url))?,
    );
    store.migrate().await.context("failed to create item store schema")?;

    let fetcher = Fetcher::new(FetchConfig {
        user_agent: cli.user_agent.clone(),
        ..FetchConfig::default()
    })
    .context("failed to build HTTP client")?;

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build Telegram HTTP client")?;
    let telegram = Arc::new(TelegramClient::new(http, cli.telegram_token.clone()));
    let notifier = TelegramNotifier::new(Arc::clone(&telegram), cli.chat_id);

    let config = Arc::new(RuntimeConfig::new(
        cli.fetch_interval,
        cli.delivery_interval,
        cli.items_limit as usize,
    ));
    let pipeline = RelayPipeline::new(
        Arc::clone(&store),
        Arc::new(fetcher),
        Arc::new(notifier),
        config,
        feeds,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let handler = CommandHandler::new(pipeline.config(), pipeline.stats(), Arc::clone(&store));
    let listener = tokio::spawn(CommandListener::new(telegram, handler).run(shutdown.clone()));

    pipeline.run(shutdown).await;

    if let Err(e) = listener.await {
        error!("Command listener aborted: {}", e);
    }
    store.close().await;

    info!("RSS relay finished");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("Received shutdown signal, draining pipeline");
    shutdown.cancel();
}
