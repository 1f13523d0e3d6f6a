//! Access policy and the auth middleware that gates every inbound event.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    audit::{AuditEntry, AuditLogger},
    config::Config,
    domain::{ChatId, Principal, Reply, RequestContext, UserId},
    errors::Error,
    Result,
};

pub const UNAUTHORIZED_REPLY: &str = "Unauthorized. Contact the bot owner for access.";

/// Allowed and admin principal IDs. Read-only after startup.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    allowed: HashSet<i64>,
    admins: HashSet<i64>,
}

impl AccessPolicy {
    /// Build a policy; admins must be a subset of a non-empty allow-list.
    pub fn new(
        allowed: impl IntoIterator<Item = i64>,
        admins: impl IntoIterator<Item = i64>,
    ) -> Result<Self> {
        let allowed: HashSet<i64> = allowed.into_iter().collect();
        let admins: HashSet<i64> = admins.into_iter().collect();

        if !allowed.is_empty() {
            let mut stray: Vec<i64> = admins.difference(&allowed).copied().collect();
            if !stray.is_empty() {
                stray.sort_unstable();
                let list = stray
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Error::Config(format!(
                    "admin_users must be a subset of allowed_users; not allowed: {list}"
                )));
            }
        }

        Ok(Self { allowed, admins })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.allowed_users.iter().copied(),
            cfg.admin_users.iter().copied(),
        )
    }

    /// Empty allow-list means open door.
    pub fn is_allowed(&self, user: UserId) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&user.0)
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user.0)
    }

    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed.len()
    }

    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    /// Sorted admin IDs (stable notification order).
    pub fn admins(&self) -> Vec<i64> {
        let mut v: Vec<i64> = self.admins.iter().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn allowed(&self) -> Vec<i64> {
        let mut v: Vec<i64> = self.allowed.iter().copied().collect();
        v.sort_unstable();
        v
    }
}

#[derive(Clone, Debug)]
pub enum AuthDecision {
    Allow(RequestContext),
    Deny(Reply),
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

#[derive(Clone, Debug)]
pub struct AuthMiddleware {
    policy: Arc<AccessPolicy>,
    audit: Arc<AuditLogger>,
}

impl AuthMiddleware {
    pub fn new(policy: Arc<AccessPolicy>, audit: Arc<AuditLogger>) -> Self {
        Self { policy, audit }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Audit the attempt, then allow or deny.
    ///
    /// Every call writes one `command_attempt` entry before returning; a denial
    /// adds one `unauthorized_access` entry.
    pub fn authorize(
        &self,
        chat_id: ChatId,
        principal: &Principal,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> AuthDecision {
        let command = first_token(text);
        self.audit.record(AuditEntry::command_attempt(
            principal.id,
            &principal.username,
            command,
        ));

        let is_admin = self.policy.is_admin(principal.id);

        if !self.policy.is_allowed(principal.id) {
            tracing::warn!(
                user_id = principal.id.0,
                username = %principal.username,
                command,
                "unauthorized access"
            );
            self.audit.record(AuditEntry::unauthorized(
                principal.id,
                &principal.username,
                command,
            ));
            return AuthDecision::Deny(Reply::new(chat_id, UNAUTHORIZED_REPLY));
        }

        AuthDecision::Allow(RequestContext {
            user_id: principal.id,
            username: principal.username.clone(),
            is_admin,
            chat_id,
            timestamp,
        })
    }
}

/// First whitespace-delimited token of a message (empty for blank text).
pub fn first_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}
