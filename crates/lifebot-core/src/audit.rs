//! Append-only audit log: one JSON object per line.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{domain::UserId, errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CommandAttempt,
    UnauthorizedAccess,
    HandlerError,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_kind: AuditKind,
    pub principal_id: i64,
    pub details: Value,
}

impl AuditEntry {
    pub fn command_attempt(user: UserId, username: &str, command: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind: AuditKind::CommandAttempt,
            principal_id: user.0,
            details: json!({ "username": username, "command": command }),
        }
    }

    pub fn unauthorized(user: UserId, username: &str, command: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind: AuditKind::UnauthorizedAccess,
            principal_id: user.0,
            details: json!({ "username": username, "command": command }),
        }
    }

    pub fn handler_error(user: UserId, command: &str, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_kind: AuditKind::HandlerError,
            principal_id: user.0,
            details: json!({ "command": command, "error": error }),
        }
    }
}

#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    // Serializes appends so concurrent events never interleave within a line.
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut entry: AuditEntry) -> Result<()> {
        entry.details = truncate_json_strings(&entry.details, AUDIT_MAX_TEXT);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::External("audit lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Best-effort write: failures are reported through tracing only.
    pub fn record(&self, entry: AuditEntry) {
        let kind = entry.event_kind;
        if let Err(e) = self.write(entry) {
            tracing::error!(?kind, path = %self.path.display(), "failed to write audit entry: {e}");
        }
    }

    /// Read back every entry (missing file = empty log).
    pub fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Error::from))
            .collect()
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn truncate_json_strings(v: &Value, max_str_len: usize) -> Value {
    match v {
        Value::String(s) => Value::String(truncate_text(s, max_str_len)),
        Value::Array(xs) => Value::Array(
            xs.iter()
                .map(|x| truncate_json_strings(x, max_str_len))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_json_strings(v, max_str_len)))
                .collect(),
        ),
        other => other.clone(),
    }
}
