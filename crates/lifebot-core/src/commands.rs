//! Built-in command handlers and the startup table builder.

use std::{fmt::Write as _, sync::Arc};

use async_trait::async_trait;
use chrono::{Duration, Local};

use crate::{
    auth::AccessPolicy,
    config::Features,
    dispatch::{CommandHandler, CommandTable},
    domain::RequestContext,
    jobs::local_midnight,
    journal::{EntryKind, Journal, MAX_ENTRY_LEN},
    scheduler::Scheduler,
    Result,
};

pub const ADMIN_ONLY_REPLY: &str = "This command is only available to admins.";

/// Shared state handed to the handlers at table build time.
#[derive(Clone)]
pub struct CommandDeps {
    pub journal: Arc<Journal>,
    pub scheduler: Scheduler,
    pub policy: Arc<AccessPolicy>,
}

/// Register every command enabled by `features`.
pub fn build_command_table(features: Features, deps: &CommandDeps) -> Result<CommandTable> {
    let mut table = CommandTable::new();

    table.register("whoami", &[], Arc::new(WhoAmI))?;
    if features.health_logging {
        table.register("health", &[], journal_command(EntryKind::Health, deps))?;
    }
    if features.learning_logging {
        table.register("learn", &[], journal_command(EntryKind::Learning, deps))?;
    }
    if features.tasks {
        table.register("add_task", &["task"], journal_command(EntryKind::Task, deps))?;
    }
    if features.notes {
        table.register("note", &[], journal_command(EntryKind::Note, deps))?;
    }
    table.register(
        "today",
        &[],
        Arc::new(Today {
            journal: Arc::clone(&deps.journal),
        }),
    )?;

    table.register(
        "jobs",
        &[],
        Arc::new(Jobs {
            scheduler: deps.scheduler.clone(),
        }),
    )?;
    table.register(
        "run_job",
        &[],
        Arc::new(RunJob {
            scheduler: deps.scheduler.clone(),
        }),
    )?;
    table.register(
        "policy",
        &[],
        Arc::new(Policy {
            policy: Arc::clone(&deps.policy),
        }),
    )?;

    Ok(table)
}

fn journal_command(kind: EntryKind, deps: &CommandDeps) -> Arc<dyn CommandHandler> {
    Arc::new(JournalCommand {
        kind,
        journal: Arc::clone(&deps.journal),
    })
}

struct WhoAmI;

#[async_trait]
impl CommandHandler for WhoAmI {
    fn description(&self) -> &str {
        "- show your id and access level"
    }

    async fn handle(&self, ctx: &RequestContext, _args: &str) -> Result<String> {
        Ok(format!(
            "id: {}\nusername: {}\nadmin: {}",
            ctx.user_id.0,
            ctx.username,
            if ctx.is_admin { "yes" } else { "no" }
        ))
    }
}

struct JournalCommand {
    kind: EntryKind,
    journal: Arc<Journal>,
}

impl JournalCommand {
    fn usage(&self) -> &'static str {
        match self.kind {
            EntryKind::Health => "Usage: /health <what you did, e.g. ran 5k, slept 7h>",
            EntryKind::Learning => "Usage: /learn <what you learned>",
            EntryKind::Task => "Usage: /add_task <task description>",
            EntryKind::Note => "Usage: /note <text>",
        }
    }

    fn confirmation(&self, text: &str) -> String {
        match self.kind {
            EntryKind::Health => format!("Health entry logged: {text}"),
            EntryKind::Learning => format!("Learning logged: {text}"),
            EntryKind::Task => format!("Task added: {text}"),
            EntryKind::Note => "Noted.".to_string(),
        }
    }
}

#[async_trait]
impl CommandHandler for JournalCommand {
    fn description(&self) -> &str {
        match self.kind {
            EntryKind::Health => "<text> - log a health entry",
            EntryKind::Learning => "<text> - log something you learned",
            EntryKind::Task => "<text> - add a task",
            EntryKind::Note => "<text> - save a quick note",
        }
    }

    async fn handle(&self, ctx: &RequestContext, args: &str) -> Result<String> {
        if args.trim().is_empty() {
            return Ok(self.usage().to_string());
        }
        let len = args.trim().chars().count();
        if len > MAX_ENTRY_LEN {
            return Ok(format!(
                "That entry is too long ({len} characters, max {MAX_ENTRY_LEN}).\n{}",
                self.usage()
            ));
        }
        let entry = self
            .journal
            .append(self.kind, ctx.user_id, args, ctx.timestamp)?;
        tracing::info!(user_id = ctx.user_id.0, kind = %self.kind, "journal entry added");
        Ok(self.confirmation(&entry.text))
    }
}

struct Today {
    journal: Arc<Journal>,
}

#[async_trait]
impl CommandHandler for Today {
    fn description(&self) -> &str {
        "- list what you logged today"
    }

    async fn handle(&self, ctx: &RequestContext, _args: &str) -> Result<String> {
        let day = ctx.timestamp.with_timezone(&Local).date_naive();
        let entries = self
            .journal
            .entries_between(local_midnight(day)?, local_midnight(day + Duration::days(1))?)?;

        let mine: Vec<_> = entries
            .iter()
            .filter(|e| e.principal_id == ctx.user_id.0)
            .collect();
        if mine.is_empty() {
            return Ok("Nothing logged today.".to_string());
        }

        let mut out = format!("Today ({}):\n", day.format("%Y-%m-%d"));
        for e in mine {
            let at = e.timestamp.with_timezone(&Local).format("%H:%M");
            let _ = writeln!(out, "{at} [{}] {}", e.kind, e.text);
        }
        Ok(out.trim_end().to_string())
    }
}

struct Jobs {
    scheduler: Scheduler,
}

#[async_trait]
impl CommandHandler for Jobs {
    fn description(&self) -> &str {
        "- list scheduled jobs (admin)"
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &RequestContext, _args: &str) -> Result<String> {
        if !ctx.is_admin {
            return Ok(ADMIN_ONLY_REPLY.to_string());
        }

        let statuses = self.scheduler.statuses().await;
        if statuses.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }

        let mut out = String::from("Scheduled jobs:\n");
        for s in statuses {
            let next = s
                .next_run
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            let _ = write!(
                out,
                "\n{} ({})\n  next: {next}\n  runs: {}, failures: {} ({} in a row)",
                s.name, s.trigger, s.runs, s.failures, s.consecutive_failures
            );
            if s.running {
                out.push_str("\n  running now");
            }
            if s.degraded {
                out.push_str("\n  DEGRADED");
            }
            if let Some(err) = &s.last_error {
                let _ = write!(out, "\n  last error: {err}");
            }
            out.push('\n');
        }
        Ok(out.trim_end().to_string())
    }
}

struct RunJob {
    scheduler: Scheduler,
}

#[async_trait]
impl CommandHandler for RunJob {
    fn description(&self) -> &str {
        "<name> - run a job now (admin)"
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &RequestContext, args: &str) -> Result<String> {
        if !ctx.is_admin {
            return Ok(ADMIN_ONLY_REPLY.to_string());
        }

        let name = args.trim();
        if name.is_empty() {
            return Ok(format!(
                "Usage: /run_job <name>\nJobs: {}",
                self.scheduler.job_names().join(", ")
            ));
        }
        if !self.scheduler.trigger(name) {
            return Ok(format!("Unknown job: {name}"));
        }
        tracing::info!(user_id = ctx.user_id.0, job = name, "job triggered manually");
        Ok(format!("Started {name}."))
    }
}

struct Policy {
    policy: Arc<AccessPolicy>,
}

#[async_trait]
impl CommandHandler for Policy {
    fn description(&self) -> &str {
        "- show access policy (admin)"
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &RequestContext, _args: &str) -> Result<String> {
        if !ctx.is_admin {
            return Ok(ADMIN_ONLY_REPLY.to_string());
        }

        let allowed = if self.policy.is_open() {
            "everyone (allow-list empty)".to_string()
        } else {
            format!("{} users", self.policy.allowed_count())
        };
        Ok(format!(
            "Allowed: {allowed}\nAdmins: {}",
            self.policy.admin_count()
        ))
    }
}
