use crate::config::{format_duration, parse_duration, RuntimeConfig};
use crate::pipeline::PipelineStats;
use crate::store::ItemStore;
use crate::types::{RelayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const HELP_TEXT: &str = "Available commands:\n\
/setfd <duration> - set fetch delay (e.g. 30s, 5m)\n\
/setsd <duration> - set send delay\n\
/setlim <number> - set feed items limit\n\
/config - show current configuration\n\
/stats - show delivery statistics\n\
/help - show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetFetchInterval(Duration),
    SetDeliveryInterval(Duration),
    SetItemsLimit(usize),
    ShowConfig,
    ShowStats,
    Help,
}

impl Command {
    /// Parse a chat message. `Ok(None)` means the text is not a command at all.
    pub fn parse(text: &str) -> Result<Option<Command>> {
        let text = text.trim();
        let Some(body) = text.strip_prefix('/') else {
            return Ok(None);
        };

        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        // "/setfd@my_bot 10s" is how group chats address a specific bot.
        let name = name.split('@').next().unwrap_or(name);

        let command = match name {
            "setfd" => Command::SetFetchInterval(parse_duration(args)?),
            "setsd" => Command::SetDeliveryInterval(parse_duration(args)?),
            "setlim" => Command::SetItemsLimit(parse_limit(args)?),
            "config" => Command::ShowConfig,
            "stats" => Command::ShowStats,
            "help" | "start" => Command::Help,
            other => {
                return Err(RelayError::InvalidCommand(format!(
                    "unknown command /{}, try /help",
                    other
                )))
            }
        };

        Ok(Some(command))
    }
}

fn parse_limit(args: &str) -> Result<usize> {
    let limit: usize = args
        .parse()
        .map_err(|_| RelayError::InvalidCommand(format!("invalid number \"{}\"", args)))?;
    if limit == 0 {
        return Err(RelayError::InvalidCommand(
            "items limit must be at least 1".to_string(),
        ));
    }
    Ok(limit)
}

/// Applies operator commands to the running relay and builds the reply text.
pub struct CommandHandler {
    config: Arc<RuntimeConfig>,
    stats: Arc<PipelineStats>,
    store: Arc<ItemStore>,
}

impl CommandHandler {
    pub fn new(config: Arc<RuntimeConfig>, stats: Arc<PipelineStats>, store: Arc<ItemStore>) -> Self {
        Self {
            config,
            stats,
            store,
        }
    }

    /// Reply for `text`, or `None` when the message is not a command.
    /// Bad input yields an `Error: ...` reply and leaves the configuration alone.
    pub async fn handle(&self, text: &str) -> Option<String> {
        match Command::parse(text) {
            Ok(Some(command)) => Some(self.execute(command).await),
            Ok(None) => None,
            Err(e) => {
                warn!("Rejected command {:?}: {}", text, e);
                Some(format!("Error: {}", e))
            }
        }
    }

    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::SetFetchInterval(interval) => {
                self.config.set_fetch_interval(interval);
                info!("Fetch delay set to {:?}", interval);
                format!("Fetch delay set to {}", format_duration(interval))
            }
            Command::SetDeliveryInterval(interval) => {
                self.config.set_delivery_interval(interval);
                info!("Send delay set to {:?}", interval);
                format!("Send delay set to {}", format_duration(interval))
            }
            Command::SetItemsLimit(limit) => {
                self.config.set_items_limit(limit);
                info!("Feed items limit set to {}", limit);
                format!("Feed items limit set to {}", limit)
            }
            Command::ShowConfig => {
                let snapshot = self.config.snapshot();
                format!(
                    "Fetch delay: {}\nSend delay: {}\nFeed items limit: {}",
                    format_duration(snapshot.fetch_interval),
                    format_duration(snapshot.delivery_interval),
                    snapshot.items_limit
                )
            }
            Command::ShowStats => self.stats_text().await,
            Command::Help => HELP_TEXT.to_string(),
        }
    }

    async fn stats_text(&self) -> String {
        let counters = self.stats.snapshot();
        let mut lines = Vec::new();

        match self.store.stats().await {
            Ok(store_stats) => {
                let total = store_stats.get("total_items").copied().unwrap_or(0);
                let unsent = store_stats.get("unsent_items").copied().unwrap_or(0);
                lines.push(format!("Stored items: {}", total));
                lines.push(format!("Unsent items: {}", unsent));
            }
            Err(e) => {
                warn!("Failed to read store stats: {}", e);
                lines.push(format!("Store unavailable: {}", e));
            }
        }

        lines.push(format!("Fetch cycles: {}", counters.fetch_cycles));
        lines.push(format!("Fetch failures: {}", counters.fetch_failures));
        lines.push(format!("Items inserted: {}", counters.items_inserted));
        lines.push(format!("Delivery cycles: {}", counters.delivery_cycles));
        lines.push(format!("Items delivered: {}", counters.items_delivered));
        lines.push(format!("Send failures: {}", counters.send_failures));
        lines.join("\n")
    }
}
