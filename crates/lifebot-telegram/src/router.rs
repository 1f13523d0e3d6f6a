use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::Message};
use tokio_util::sync::CancellationToken;

use lifebot_core::{
    domain::{ChatId, InboundEvent, Principal},
    messaging::port::MessagingPort,
    pipeline::Pipeline,
};

use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub messenger: Arc<dyn MessagingPort>,
}

/// Decode a Telegram message into the core event model.
///
/// Only text messages from an identified sender become `TextCommand`.
pub fn decode_message(msg: &Message) -> InboundEvent {
    let (Some(user), Some(text)) = (msg.from(), msg.text()) else {
        return InboundEvent::Other;
    };

    InboundEvent::TextCommand {
        chat_id: ChatId(msg.chat.id.0),
        principal: Principal::new(user.id.0 as i64, user.username.as_deref()),
        text: text.to_string(),
        timestamp: msg.date,
    }
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let event = decode_message(&msg);
    let Some(reply) = state.pipeline.process(event).await else {
        return Ok(());
    };

    if let Err(e) = state
        .messenger
        .send_long_text(reply.chat_id, &reply.text)
        .await
    {
        tracing::warn!(chat_id = reply.chat_id.0, "failed to send reply: {e}");
    }
    Ok(())
}

/// Long-poll Telegram until `cancel` fires.
pub async fn run_polling(
    messenger: TelegramMessenger,
    pipeline: Pipeline,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let bot = messenger.bot();

    match bot.get_me().await {
        Ok(me) => tracing::info!("lifebot started as @{}", me.username()),
        Err(e) => return Err(anyhow::anyhow!("telegram get_me failed: {e}")),
    }

    let state = Arc::new(AppState {
        pipeline,
        messenger: Arc::new(messenger),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    let watcher = tokio::spawn(async move {
        cancel.cancelled().await;
        loop {
            // Errors only while the dispatcher is not running yet.
            match token.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    dispatcher.dispatch().await;
    watcher.abort();
    tracing::info!("telegram dispatcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_message_decodes_to_command() {
        let msg = message(json!({
            "message_id": 1,
            "date": 1_700_000_000,
            "chat": { "id": 42, "type": "private", "first_name": "Ann" },
            "from": { "id": 42, "is_bot": false, "first_name": "Ann", "username": "ann" },
            "text": "/note hello"
        }));

        let InboundEvent::TextCommand {
            chat_id,
            principal,
            text,
            timestamp,
        } = decode_message(&msg)
        else {
            panic!("expected text command");
        };
        assert_eq!(chat_id, ChatId(42));
        assert_eq!(principal, Principal::new(42, Some("ann")));
        assert_eq!(text, "/note hello");
        assert_eq!(timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_username_is_unknown() {
        let msg = message(json!({
            "message_id": 2,
            "date": 1_700_000_000,
            "chat": { "id": 7, "type": "private", "first_name": "Bo" },
            "from": { "id": 7, "is_bot": false, "first_name": "Bo" },
            "text": "hi"
        }));
        let InboundEvent::TextCommand { principal, .. } = decode_message(&msg) else {
            panic!("expected text command");
        };
        assert_eq!(principal.username, "unknown");
    }

    #[test]
    fn non_text_message_is_other() {
        let msg = message(json!({
            "message_id": 3,
            "date": 1_700_000_000,
            "chat": { "id": 7, "type": "private", "first_name": "Bo" },
            "from": { "id": 7, "is_bot": false, "first_name": "Bo" },
            "location": { "latitude": 1.0, "longitude": 2.0 }
        }));
        assert!(matches!(decode_message(&msg), InboundEvent::Other));
    }
}
