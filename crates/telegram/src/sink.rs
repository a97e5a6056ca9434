use async_trait::async_trait;
use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    types::{ChatId, ParseMode},
    utils::html,
    Bot,
};

use common::{Error, NotificationSink, Result};

/// Wrap a pre-rendered table so Telegram shows it monospaced.
pub fn pre_block(table: &str) -> String {
    format!("<pre>{}</pre>", html::escape(table))
}

/// Delivers alerts as Telegram messages; the subscriber id is the chat id.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, subscriber_id: i64, text: &str, is_table: bool) -> Result<()> {
        let chat = ChatId(subscriber_id);
        let request = if is_table {
            self.bot
                .send_message(chat, pre_block(text))
                .parse_mode(ParseMode::Html)
        } else {
            self.bot.send_message(chat, text)
        };

        request
            .await
            .map(|_| ())
            .map_err(|e| Error::Notify(format!("chat {subscriber_id}: {e}")))
    }
}
