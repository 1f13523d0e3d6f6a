//! Command table and dispatcher.
//!
//! The table is built once at startup and shared behind an `Arc`; nothing is
//! registered after the bot starts serving.

use std::{collections::HashMap, fmt::Write as _, sync::Arc};

use async_trait::async_trait;

use crate::{
    audit::{AuditEntry, AuditLogger},
    domain::{Reply, RequestContext},
    errors::Error,
    Result,
};

pub const HANDLER_ERROR_REPLY: &str = "Something went wrong while handling that command.";

/// Command that receives plain (non-slash) text, when registered.
pub const PLAIN_TEXT_COMMAND: &str = "note";

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// One-line usage shown in help, e.g. `<text> - log a health entry`.
    fn description(&self) -> &str;

    fn admin_only(&self) -> bool {
        false
    }

    async fn handle(&self, ctx: &RequestContext, args: &str) -> Result<String>;
}

struct Registered {
    name: String,
    aliases: Vec<String>,
    handler: Arc<dyn CommandHandler>,
}

#[derive(Default)]
pub struct CommandTable {
    commands: Vec<Registered>,
    index: HashMap<String, usize>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        aliases: &[&str],
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        let keys: Vec<String> = std::iter::once(name)
            .chain(aliases.iter().copied())
            .map(str::to_lowercase)
            .collect();
        if let Some(dup) = keys
            .iter()
            .find(|k| is_builtin(k) || self.index.contains_key(k.as_str()))
        {
            return Err(Error::Config(format!("command registered twice: /{dup}")));
        }

        let idx = self.commands.len();
        for key in keys {
            self.index.insert(key, idx);
        }
        self.commands.push(Registered {
            name: name.to_lowercase(),
            aliases: aliases.iter().map(|a| a.to_lowercase()).collect(),
            handler,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.index.get(name).map(|&i| &self.commands[i].handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        is_builtin(name) || self.index.contains_key(name)
    }

    /// Primary names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn help_text(&self, is_admin: bool) -> String {
        let mut out = String::from("Available commands:\n/help - show this message\n");
        for c in &self.commands {
            if c.handler.admin_only() && !is_admin {
                continue;
            }
            let _ = write!(out, "/{}", c.name);
            for a in &c.aliases {
                let _ = write!(out, " (/{a})");
            }
            let _ = writeln!(out, " {}", c.handler.description());
        }
        if self.index.contains_key(PLAIN_TEXT_COMMAND) {
            out.push_str("\nPlain text without a command is saved as a note.");
        }
        out.trim_end().to_string()
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(name, "help" | "start")
}

/// Split `/cmd@botname args` into a lowercased command name and the rest.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<CommandTable>,
    audit: Arc<AuditLogger>,
}

impl Dispatcher {
    pub fn new(table: Arc<CommandTable>, audit: Arc<AuditLogger>) -> Self {
        Self { table, audit }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Route one authenticated message to at most one handler.
    pub async fn dispatch(&self, ctx: &RequestContext, text: &str) -> Reply {
        let text = text.trim();

        let (cmd, args) = if text.starts_with('/') {
            parse_command(text)
        } else if !text.is_empty() && self.table.index.contains_key(PLAIN_TEXT_COMMAND) {
            (PLAIN_TEXT_COMMAND.to_string(), text.to_string())
        } else {
            return self.help(ctx, None);
        };

        if is_builtin(&cmd) {
            return self.help(ctx, None);
        }
        let Some(handler) = self.table.lookup(&cmd) else {
            return self.help(ctx, Some(&cmd));
        };

        tracing::debug!(user_id = ctx.user_id.0, command = %cmd, "dispatching");
        match handler.handle(ctx, &args).await {
            Ok(text) => Reply::new(ctx.chat_id, text),
            Err(e) => {
                tracing::error!(
                    user_id = ctx.user_id.0,
                    command = %cmd,
                    "command handler failed: {e}"
                );
                self.audit.record(AuditEntry::handler_error(
                    ctx.user_id,
                    &format!("/{cmd}"),
                    &e.to_string(),
                ));
                Reply::new(ctx.chat_id, HANDLER_ERROR_REPLY)
            }
        }
    }

    fn help(&self, ctx: &RequestContext, unknown: Option<&str>) -> Reply {
        let help = self.table.help_text(ctx.is_admin);
        let text = match unknown {
            Some(cmd) if !cmd.is_empty() => format!("Unknown command /{cmd}.\n\n{help}"),
            _ => help,
        };
        Reply::new(ctx.chat_id, text)
    }
}
