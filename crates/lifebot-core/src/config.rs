use std::{
    collections::HashSet,
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    auth::AccessPolicy,
    errors::Error,
    jobs::{DAILY_SUMMARY, WEEKLY_SUMMARY},
    scheduler::{Trigger, MAX_INTERVAL_SECS},
    secrets::{validate_credential, CredentialFormat, SecretStore},
    Result,
};

pub const CONFIG_ENV: &str = "LIFEBOT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "lifebot.toml";

/// Typed, validated configuration. Built once at startup; immutable afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,

    // Access
    pub allowed_users: Vec<i64>,
    pub admin_users: Vec<i64>,

    pub features: Features,

    // Health endpoint
    pub health_bind: SocketAddr,

    // Storage
    pub data_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub reports_dir: PathBuf,

    pub jobs: Vec<JobConfig>,
}

/// Feature toggles; a disabled feature's commands are never registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Features {
    pub health_logging: bool,
    pub learning_logging: bool,
    pub tasks: bool,
    pub notes: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            health_logging: true,
            learning_logging: true,
            tasks: true,
            notes: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobConfig {
    pub name: String,
    pub trigger: Trigger,
    pub enabled: bool,
}

// === On-disk shape ===

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    telegram: TelegramSection,
    access: AccessSection,
    features: Features,
    health: HealthSection,
    storage: StorageSection,
    scheduler: SchedulerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TelegramSection {
    bot_token: Option<String>,
    bot_token_encrypted: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccessSection {
    allowed_users: Vec<i64>,
    admin_users: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HealthSection {
    bind: String,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StorageSection {
    data_dir: Option<PathBuf>,
    audit_log: Option<PathBuf>,
    reports_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SchedulerSection {
    jobs: Vec<JobSection>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            jobs: vec![
                JobSection {
                    name: DAILY_SUMMARY.to_string(),
                    cron: Some("0 21 * * *".to_string()),
                    every_secs: None,
                    enabled: true,
                },
                JobSection {
                    name: WEEKLY_SUMMARY.to_string(),
                    cron: Some("0 18 * * 0".to_string()),
                    every_secs: None,
                    enabled: true,
                },
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobSection {
    name: String,
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    every_secs: Option<u64>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load `.env` (if present), then the TOML file at `path`.
    ///
    /// Any failure here is fatal: the process must not start serving.
    pub fn load(path: &Path) -> Result<Self> {
        if let Err(e) = load_dotenv() {
            tracing::warn!("{e}");
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;

        let overrides = EnvOverrides::from_env();
        Self::from_toml_str(&content, &SecretStore::from_env(), &overrides)
    }

    pub fn from_toml_str(
        content: &str,
        secrets: &SecretStore,
        overrides: &EnvOverrides,
    ) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;

        let telegram_bot_token = resolve_bot_token(&file.telegram, secrets, overrides)?;

        let allowed_users = overrides
            .allowed_users
            .clone()
            .unwrap_or(file.access.allowed_users);
        let admin_users = overrides
            .admin_users
            .clone()
            .unwrap_or(file.access.admin_users);
        AccessPolicy::new(allowed_users.iter().copied(), admin_users.iter().copied())?;

        let health_bind: SocketAddr = file.health.bind.trim().parse().map_err(|e| {
            Error::Config(format!("invalid health.bind '{}': {e}", file.health.bind))
        })?;

        let data_dir = file
            .storage
            .data_dir
            .unwrap_or_else(|| PathBuf::from("data"));
        let audit_log_path = file
            .storage
            .audit_log
            .unwrap_or_else(|| data_dir.join("audit.log"));
        let reports_dir = file
            .storage
            .reports_dir
            .unwrap_or_else(|| data_dir.join("reports"));

        let jobs = parse_jobs(file.scheduler.jobs)?;

        Ok(Self {
            telegram_bot_token,
            allowed_users,
            admin_users,
            features: file.features,
            health_bind,
            data_dir,
            audit_log_path,
            reports_dir,
            jobs,
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }

    /// Create the data/report directories the bot writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.reports_dir)?;
        if let Some(parent) = self.audit_log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Environment values that take precedence over the file.
#[derive(Clone, Debug, Default)]
pub struct EnvOverrides {
    pub bot_token: Option<String>,
    pub allowed_users: Option<Vec<i64>>,
    pub admin_users: Option<Vec<i64>>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            bot_token: env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty),
            allowed_users: env_str("LIFEBOT_ALLOWED_USERS").map(|v| parse_csv_i64(Some(v))),
            admin_users: env_str("LIFEBOT_ADMIN_USERS").map(|v| parse_csv_i64(Some(v))),
        }
    }
}

/// Load `.env` from the working directory (or a parent). Variables already
/// set in the environment win.
///
/// Runs before logging is installed, so the caller reports the error.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    dotenv_result(dotenvy::dotenv())
}

pub fn load_dotenv_file(path: &Path) -> Result<Option<PathBuf>> {
    dotenv_result(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn dotenv_result(res: std::result::Result<PathBuf, dotenvy::Error>) -> Result<Option<PathBuf>> {
    match res {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(Error::Config(format!("failed to load .env: {e}"))),
    }
}

pub fn config_path_from_env() -> PathBuf {
    env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn resolve_bot_token(
    section: &TelegramSection,
    secrets: &SecretStore,
    overrides: &EnvOverrides,
) -> Result<String> {
    let token = if let Some(t) = overrides.bot_token.clone() {
        t
    } else if let Some(t) = section.bot_token.clone().and_then(non_empty) {
        t
    } else if let Some(sealed) = section.bot_token_encrypted.as_deref() {
        secrets.decrypt(sealed)?
    } else {
        return Err(Error::Config(
            "telegram bot token missing (TELEGRAM_BOT_TOKEN, telegram.bot_token or telegram.bot_token_encrypted)"
                .to_string(),
        ));
    };

    let (ok, reason) = validate_credential(&token, &CredentialFormat::TelegramBotToken);
    if !ok {
        return Err(Error::Config(format!("invalid telegram bot token: {reason}")));
    }
    Ok(token.trim().to_string())
}

fn parse_jobs(sections: Vec<JobSection>) -> Result<Vec<JobConfig>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(sections.len());

    for job in sections {
        let name = job.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Config("scheduler job missing name".to_string()));
        }
        if name != DAILY_SUMMARY && name != WEEKLY_SUMMARY {
            return Err(Error::Config(format!("unknown scheduler job: {name}")));
        }
        if !seen.insert(name.clone()) {
            return Err(Error::Config(format!("duplicate scheduler job: {name}")));
        }

        let trigger = match (job.cron.as_deref(), job.every_secs) {
            (Some(expr), None) => Trigger::cron(expr)
                .map_err(|e| Error::Config(format!("job {name}: invalid cron: {e}")))?,
            (None, Some(0)) => {
                return Err(Error::Config(format!("job {name}: every_secs must be > 0")))
            }
            (None, Some(secs)) if secs > MAX_INTERVAL_SECS => {
                return Err(Error::Config(format!(
                    "job {name}: every_secs must be at most {MAX_INTERVAL_SECS} (one year)"
                )))
            }
            (None, Some(secs)) => Trigger::every_secs(secs),
            _ => {
                return Err(Error::Config(format!(
                    "job {name}: exactly one of cron / every_secs is required"
                )))
            }
        };

        out.push(JobConfig {
            name,
            trigger,
            enabled: job.enabled,
        });
    }

    Ok(out)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> String {
        format!("123456:{}", "a".repeat(35))
    }

    fn no_secrets() -> SecretStore {
        SecretStore::from_key_material(None)
    }

    fn load(toml: &str) -> Result<Config> {
        Config::from_toml_str(toml, &no_secrets(), &EnvOverrides::default())
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = load(&format!("[telegram]\nbot_token = \"{}\"\n", token())).unwrap();
        assert!(cfg.allowed_users.is_empty());
        assert_eq!(cfg.features, Features::default());
        assert_eq!(cfg.health_bind.port(), 8080);
        assert_eq!(cfg.audit_log_path, PathBuf::from("data/audit.log"));
        assert_eq!(cfg.reports_dir, PathBuf::from("data/reports"));
        let names: Vec<_> = cfg.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["daily_summary", "weekly_summary"]);
    }

    #[test]
    fn full_file_parses() {
        let cfg = load(&format!(
            r#"
[telegram]
bot_token = "{}"

[access]
allowed_users = [1, 2]
admin_users = [2]

[features]
notes = false

[health]
bind = "0.0.0.0:9000"

[storage]
data_dir = "/var/lib/lifebot"

[[scheduler.jobs]]
name = "daily_summary"
every_secs = 3600
enabled = false
"#,
            token()
        ))
        .unwrap();

        assert_eq!(cfg.allowed_users, vec![1, 2]);
        assert_eq!(cfg.admin_users, vec![2]);
        assert!(!cfg.features.notes);
        assert!(cfg.features.tasks);
        assert_eq!(cfg.health_bind.port(), 9000);
        assert_eq!(
            cfg.journal_path(),
            PathBuf::from("/var/lib/lifebot/journal.jsonl")
        );
        assert_eq!(cfg.jobs.len(), 1);
        assert!(!cfg.jobs[0].enabled);
    }

    #[test]
    fn admin_outside_allow_list_is_rejected() {
        let err = load(&format!(
            "[telegram]\nbot_token = \"{}\"\n[access]\nallowed_users = [1]\nadmin_users = [1, 5]\n",
            token()
        ))
        .unwrap_err();
        assert!(err.to_string().contains("not allowed: 5"), "{err}");
    }

    #[test]
    fn admin_with_open_allow_list_is_accepted() {
        let cfg = load(&format!(
            "[telegram]\nbot_token = \"{}\"\n[access]\nadmin_users = [42]\n",
            token()
        ))
        .unwrap();
        assert_eq!(cfg.admin_users, vec![42]);
    }

    #[test]
    fn missing_or_bad_token_is_fatal() {
        assert!(matches!(load(""), Err(Error::Config(_))));
        assert!(matches!(
            load("[telegram]\nbot_token = \"nope\"\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn encrypted_token_is_decrypted() {
        let secrets = SecretStore::from_key_material(Some("k"));
        let sealed = secrets.encrypt(&token()).unwrap();
        let cfg = Config::from_toml_str(
            &format!("[telegram]\nbot_token_encrypted = \"{sealed}\"\n"),
            &secrets,
            &EnvOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.telegram_bot_token, token());

        let err = Config::from_toml_str(
            &format!("[telegram]\nbot_token_encrypted = \"{sealed}\"\n"),
            &no_secrets(),
            &EnvOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Secret(_)));
    }

    #[test]
    fn env_overrides_win() {
        let overrides = EnvOverrides {
            bot_token: Some(token()),
            allowed_users: Some(vec![9]),
            admin_users: Some(vec![]),
        };
        let cfg = Config::from_toml_str(
            "[access]\nallowed_users = [1]\n",
            &no_secrets(),
            &overrides,
        )
        .unwrap();
        assert_eq!(cfg.allowed_users, vec![9]);
    }

    #[test]
    fn bad_jobs_are_rejected() {
        let base = format!("[telegram]\nbot_token = \"{}\"\n", token());
        for jobs in [
            "[[scheduler.jobs]]\nname = \"daily_summary\"\n",
            "[[scheduler.jobs]]\nname = \"daily_summary\"\ncron = \"* * *\"\n",
            "[[scheduler.jobs]]\nname = \"daily_summary\"\nevery_secs = 0\n",
            "[[scheduler.jobs]]\nname = \"daily_summary\"\nevery_secs = 5\ncron = \"* * * * *\"\n",
            "[[scheduler.jobs]]\nname = \"daily_summary\"\nevery_secs = 5\n[[scheduler.jobs]]\nname = \"daily_summary\"\nevery_secs = 6\n",
            "[[scheduler.jobs]]\nname = \"backup\"\nevery_secs = 60\n",
        ] {
            assert!(load(&format!("{base}{jobs}")).is_err(), "accepted: {jobs}");
        }
    }

    #[test]
    fn dotenv_file_feeds_config_path() {
        if env::var_os(CONFIG_ENV).is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        fs::write(&env_file, "LIFEBOT_CONFIG=from-dotenv.toml\n").unwrap();

        assert_eq!(load_dotenv_file(&env_file).unwrap(), Some(env_file));
        assert_eq!(config_path_from_env(), PathBuf::from("from-dotenv.toml"));

        assert_eq!(load_dotenv_file(&dir.path().join("missing.env")).unwrap(), None);
    }

    #[test]
    fn interval_is_capped_at_one_year() {
        let base = format!("[telegram]\nbot_token = \"{}\"\n", token());
        let job = |secs: u64| {
            format!("{base}[[scheduler.jobs]]\nname = \"daily_summary\"\nevery_secs = {secs}\n")
        };

        let err = load(&job(1_000_000_000_000_000)).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("at most")));
        assert!(load(&job(MAX_INTERVAL_SECS + 1)).is_err());

        let cfg = load(&job(MAX_INTERVAL_SECS)).unwrap();
        assert!(cfg.jobs[0].trigger.next_after(chrono::Local::now()).is_some());
    }

    #[test]
    fn never_matching_cron_is_a_config_error() {
        let base = format!("[telegram]\nbot_token = \"{}\"\n", token());
        let err = load(&format!(
            "{base}[[scheduler.jobs]]\nname = \"daily_summary\"\ncron = \"0 0 31 2 *\"\n"
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let cfg = load(&format!(
            "{base}[[scheduler.jobs]]\nname = \"daily_summary\"\ncron = \"0 9 29 2 *\"\n"
        ))
        .unwrap();
        assert!(cfg.jobs[0].trigger.next_after(chrono::Local::now()).is_some());
    }

    #[test]
    fn csv_parsing_skips_garbage() {
        assert_eq!(parse_csv_i64(Some(" 1, x,3,,".to_string())), vec![1, 3]);
    }
}
