use async_trait::async_trait;

use crate::{domain::ChatId, messaging::types::MessagingCapabilities, Result};

/// Outbound messaging port.
///
/// Telegram is the only implementation; scheduler jobs and the dispatcher
/// reply through this trait so neither depends on the transport crate.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;

    /// Send `text`, split into chunks that fit the transport's message limit.
    async fn send_long_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let limit = self.capabilities().max_message_len;
        for chunk in crate::messaging::types::split_message(text, limit) {
            self.send_text(chat_id, &chunk).await?;
        }
        Ok(())
    }
}
