//! Append-only journal of health / learning / task / note entries.

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::UserId, errors::Error, Result};

pub const MAX_ENTRY_LEN: usize = 2_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Health,
    Learning,
    Task,
    Note,
}

impl EntryKind {
    pub const ALL: [EntryKind; 4] = [Self::Health, Self::Learning, Self::Task, Self::Note];

    pub fn label(self) -> &'static str {
        match self {
            Self::Health => "Health",
            Self::Learning => "Learning",
            Self::Task => "Tasks",
            Self::Note => "Notes",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Health => "health",
            Self::Learning => "learning",
            Self::Task => "task",
            Self::Note => "note",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub principal_id: i64,
    pub text: String,
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        kind: EntryKind,
        user: UserId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<JournalEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::External("journal entry text is empty".to_string()));
        }
        if text.chars().count() > MAX_ENTRY_LEN {
            return Err(Error::External(format!(
                "journal entry too long (max {MAX_ENTRY_LEN} characters)"
            )));
        }

        let entry = JournalEntry {
            timestamp,
            kind,
            principal_id: user.0,
            text: text.to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::External("journal lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        Ok(entry)
    }

    /// Entries with `from <= timestamp < to`, in file (chronological) order.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn entries_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(e) if e.timestamp >= from && e.timestamp < to => out.push(e),
                Ok(_) => {}
                Err(e) => tracing::warn!(line = idx + 1, "skipping corrupt journal line: {e}"),
            }
        }
        Ok(out)
    }
}
