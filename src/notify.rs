//! Operator notification sink.
//!
//! Fire-and-forget: a failed delivery is logged and never affects the
//! pipeline outcome.

use async_trait::async_trait;
use teloxide::prelude::Requester;
use teloxide::types::ChatId;
use teloxide::Bot;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Delivers messages to the operator Telegram channel.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(bot_token),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        if let Err(err) = self.bot.send_message(self.chat_id, message).await {
            warn!(?err, "failed to deliver operator notification");
        }
    }
}

/// Fallback sink used when the Telegram channel is disabled.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!(%message, "operator notification");
    }
}
