//! Inbound event pipeline: auth middleware, then dispatcher.

use crate::{
    auth::{AuthDecision, AuthMiddleware},
    dispatch::Dispatcher,
    domain::{InboundEvent, Reply},
};

#[derive(Clone)]
pub struct Pipeline {
    auth: AuthMiddleware,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(auth: AuthMiddleware, dispatcher: Dispatcher) -> Self {
        Self { auth, dispatcher }
    }

    pub fn auth(&self) -> &AuthMiddleware {
        &self.auth
    }

    /// Process one event. `None` means nothing should be sent back.
    pub async fn process(&self, event: InboundEvent) -> Option<Reply> {
        let InboundEvent::TextCommand {
            chat_id,
            principal,
            text,
            timestamp,
        } = event
        else {
            return None;
        };

        match self.auth.authorize(chat_id, &principal, &text, timestamp) {
            AuthDecision::Deny(reply) => Some(reply),
            AuthDecision::Allow(ctx) => Some(self.dispatcher.dispatch(&ctx, &text).await),
        }
    }
}
