use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// An identified user of the bot, as observed on an inbound event.
///
/// Never persisted; admin status is derived from the policy on every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: UserId,
    pub username: String,
}

impl Principal {
    pub fn new(id: i64, username: Option<&str>) -> Self {
        Self {
            id: UserId(id),
            username: username
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// Inbound update model, decoded once at the transport boundary.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    TextCommand {
        chat_id: ChatId,
        principal: Principal,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// Anything the pipeline does not act on (stickers, edits, service messages).
    Other,
}

impl InboundEvent {
    pub fn text(chat_id: i64, principal: Principal, text: impl Into<String>) -> Self {
        Self::TextCommand {
            chat_id: ChatId(chat_id),
            principal,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-request context attached by the auth middleware.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
    pub chat_id: ChatId,
    pub timestamp: DateTime<Utc>,
}

/// Plain-text reply sent back through the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: ChatId,
    pub text: String,
}

impl Reply {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_without_username_is_unknown() {
        assert_eq!(Principal::new(7, None).username, "unknown");
        assert_eq!(Principal::new(7, Some("  ")).username, "unknown");
        assert_eq!(Principal::new(7, Some("ann")).username, "ann");
    }
}
