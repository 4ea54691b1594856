use crate::commands::CommandHandler;
use crate::telegram::{TelegramClient, Update};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Long-polls the bot for operator commands and answers them in the same chat.
pub struct CommandListener {
    client: Arc<TelegramClient>,
    handler: CommandHandler,
}

impl CommandListener {
    pub fn new(client: Arc<TelegramClient>, handler: CommandHandler) -> Self {
        Self { client, handler }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Command listener started");
        let mut offset = 0;

        loop {
            let updates = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                updates = self.client.get_updates(offset, POLL_TIMEOUT) => updates,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.dispatch(update).await;
                    }
                }
                Err(e) => {
                    warn!("Failed to poll for commands: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_PAUSE) => {}
                    }
                }
            }
        }

        info!("Command listener stopped");
    }

    async fn dispatch(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let Some(reply) = self.handler.handle(text).await else {
            return;
        };

        debug!("Replying to command in chat {}", message.chat.id);
        if let Err(e) = self.client.send_message(message.chat.id, &reply).await {
            warn!("Failed to reply to command: {}", e);
        }
    }
}
