use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use lifebot_core::{
    audit::AuditLogger,
    auth::{AccessPolicy, AuthMiddleware},
    commands::{build_command_table, CommandDeps},
    config::{config_path_from_env, load_dotenv, Config},
    dispatch::Dispatcher,
    health::{self, HealthState},
    jobs::{build_jobs, forward_signals, summary_recipients},
    journal::Journal,
    messaging::port::MessagingPort,
    pipeline::Pipeline,
    scheduler::Scheduler,
    secrets::{generate_key, SecretStore},
};
use lifebot_telegram::{router::run_polling, TelegramMessenger};

#[derive(Debug, Parser)]
#[command(name = "lifebot", about = "Personal life-automation Telegram bot", version)]
struct Cli {
    /// Config file (default: $LIFEBOT_CONFIG or lifebot.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the bot, scheduler and health endpoint (default).
    Run,
    /// Encrypt a value with LIFEBOT_SECRET_KEY for use in the config file.
    Encrypt { value: String },
    /// Print a fresh random secret key.
    GenKey,
    /// Load and validate the config, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // .env may carry RUST_LOG and LIFEBOT_CONFIG, so it goes first.
    let dotenv = load_dotenv();
    lifebot_core::logging::init("lifebot")?;
    match dotenv {
        Ok(Some(path)) => tracing::debug!("loaded {}", path.display()),
        Ok(None) => {}
        Err(e) => tracing::warn!("{e}"),
    }

    let config_path = cli.config.unwrap_or_else(config_path_from_env);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config_path).await,
        Command::Encrypt { value } => {
            let store = SecretStore::from_env();
            let sealed = store
                .encrypt(&value)
                .context("encryption failed (is LIFEBOT_SECRET_KEY set?)")?;
            println!("{sealed}");
            Ok(())
        }
        Command::GenKey => {
            println!("{}", generate_key());
            Ok(())
        }
        Command::CheckConfig => {
            let cfg = Config::load(&config_path)
                .with_context(|| format!("invalid config {}", config_path.display()))?;
            println!(
                "config ok: {} allowed users, {} admins, {} jobs, health on {}",
                cfg.allowed_users.len(),
                cfg.admin_users.len(),
                cfg.jobs.iter().filter(|j| j.enabled).count(),
                cfg.health_bind
            );
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let cfg = Config::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    cfg.ensure_dirs().context("failed to create data directories")?;

    let policy = Arc::new(AccessPolicy::from_config(&cfg)?);
    if policy.is_open() {
        tracing::warn!("allowed_users is empty: every Telegram user can use this bot");
    }
    tracing::info!(
        allowed = policy.allowed_count(),
        admins = policy.admin_count(),
        "access policy loaded"
    );

    let audit = Arc::new(AuditLogger::new(cfg.audit_log_path.clone()));
    let journal = Arc::new(Journal::new(cfg.journal_path()));

    let telegram = TelegramMessenger::from_token(cfg.telegram_bot_token.clone());
    let messenger: Arc<dyn MessagingPort> = Arc::new(telegram.clone());

    let jobs = build_jobs(&cfg, Arc::clone(&journal), Arc::clone(&messenger), &policy)?;
    let scheduler = Scheduler::new(jobs);

    let table = build_command_table(
        cfg.features,
        &CommandDeps {
            journal,
            scheduler: scheduler.clone(),
            policy: Arc::clone(&policy),
        },
    )?;
    tracing::info!(commands = ?table.names(), "command table built");

    let pipeline = Pipeline::new(
        AuthMiddleware::new(Arc::clone(&policy), Arc::clone(&audit)),
        Dispatcher::new(Arc::new(table), audit),
    );

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

    tasks.spawn({
        let cancel = cancel.clone();
        async move { ("telegram", run_polling(telegram, pipeline, cancel).await) }
    });

    tasks.spawn({
        let cancel = cancel.clone();
        let scheduler = scheduler.clone();
        let alerts = forward_signals(
            scheduler.subscribe(),
            messenger,
            summary_recipients(&policy),
            cancel.clone(),
        );
        async move {
            let (res, ()) = tokio::join!(scheduler.run(cancel), alerts);
            ("scheduler", res.map_err(anyhow::Error::from))
        }
    });

    tasks.spawn({
        let cancel = cancel.clone();
        let state = HealthState::new(scheduler);
        let bind = cfg.health_bind;
        async move {
            (
                "health",
                health::serve(bind, state, cancel)
                    .await
                    .map_err(anyhow::Error::from),
            )
        }
    });

    supervise(tasks, cancel).await
}

/// Wait for Ctrl-C or the first task to exit, then cancel and drain the rest.
async fn supervise(
    mut tasks: JoinSet<(&'static str, Result<()>)>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut first_error: Option<anyhow::Error> = None;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("failed to listen for ctrl-c: {e}");
            }
            tracing::info!("shutdown requested");
        }
        Some(joined) = tasks.join_next() => {
            record_exit(joined, &mut first_error);
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        record_exit(joined, &mut first_error);
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn record_exit(
    joined: std::result::Result<(&'static str, Result<()>), tokio::task::JoinError>,
    first_error: &mut Option<anyhow::Error>,
) {
    let err = match joined {
        Ok((name, Ok(()))) => {
            tracing::info!(task = name, "task stopped");
            return;
        }
        Ok((name, Err(e))) => e.context(format!("{name} task failed")),
        Err(e) => anyhow::anyhow!("task panicked: {e}"),
    };
    tracing::error!("{err:#}");
    if first_error.is_none() {
        *first_error = Some(err);
    }
}
