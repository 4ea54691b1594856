pub mod bot;
pub mod commands;
pub mod config;
pub mod fetcher;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod telegram;
pub mod traits;
pub mod types;

pub use bot::CommandListener;
pub use commands::{Command, CommandHandler};
pub use config::{format_duration, parse_duration, ConfigSnapshot, RuntimeConfig};
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use pipeline::{PipelineStats, RelayPipeline, StatsSnapshot};
pub use store::ItemStore;
pub use telegram::{TelegramClient, TelegramNotifier};
pub use traits::{FeedSource, Notifier};
pub use types::*;
