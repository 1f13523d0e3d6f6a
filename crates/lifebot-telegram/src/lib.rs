//! Telegram adapter (teloxide).
//!
//! Implements the `lifebot-core` MessagingPort over the Telegram Bot API and
//! decodes incoming updates into core `InboundEvent`s.

use async_trait::async_trait;

use teloxide::prelude::*;

use tokio::time::sleep;

pub mod router;

use lifebot_core::{
    domain::ChatId,
    errors::Error,
    messaging::{port::MessagingPort, types::MessagingCapabilities},
    Result,
};

/// Telegram's hard limit on message text length.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::warn!("telegram rate limit hit, retrying in {d:?}");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: TELEGRAM_MAX_MESSAGE_LEN,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;
        Ok(())
    }
}
