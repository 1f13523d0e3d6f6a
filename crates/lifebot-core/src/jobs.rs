//! Built-in scheduled jobs: daily and weekly journal summaries.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::AccessPolicy,
    config::Config,
    domain::ChatId,
    errors::Error,
    journal::{EntryKind, Journal, JournalEntry},
    messaging::port::MessagingPort,
    scheduler::{Job, SchedulerSignal, Trigger},
    Result,
};

pub const DAILY_SUMMARY: &str = "daily_summary";
pub const WEEKLY_SUMMARY: &str = "weekly_summary";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryPeriod {
    Daily,
    Weekly,
}

impl SummaryPeriod {
    pub fn job_name(self) -> &'static str {
        match self {
            Self::Daily => DAILY_SUMMARY,
            Self::Weekly => WEEKLY_SUMMARY,
        }
    }
}

/// A rendered summary ready to be written and delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub file_name: String,
    pub body: String,
}

/// Renders a journal summary into `reports_dir` and sends it to recipients.
pub struct SummaryJob {
    period: SummaryPeriod,
    journal: Arc<Journal>,
    reports_dir: PathBuf,
    messenger: Arc<dyn MessagingPort>,
    recipients: Vec<ChatId>,
}

impl SummaryJob {
    pub fn new(
        period: SummaryPeriod,
        journal: Arc<Journal>,
        reports_dir: impl Into<PathBuf>,
        messenger: Arc<dyn MessagingPort>,
        recipients: Vec<ChatId>,
    ) -> Self {
        Self {
            period,
            journal,
            reports_dir: reports_dir.into(),
            messenger,
            recipients,
        }
    }

    pub fn period(&self) -> SummaryPeriod {
        self.period
    }

    /// Build, persist, and deliver the summary as of `now`.
    pub async fn run_at(&self, now: DateTime<Local>) -> Result<PathBuf> {
        let summary = match self.period {
            SummaryPeriod::Daily => {
                let day = now.date_naive();
                let entries = self
                    .journal
                    .entries_between(local_midnight(day)?, local_midnight(day + Duration::days(1))?)?;
                render_daily(day, &entries)
            }
            SummaryPeriod::Weekly => {
                let end = now.date_naive() + Duration::days(1);
                let start = end - Duration::days(7);
                let entries = self
                    .journal
                    .entries_between(local_midnight(start)?, local_midnight(end)?)?;
                render_weekly(start, now.date_naive(), &entries)
            }
        };

        let path = write_report(&self.reports_dir, &summary)?;
        tracing::info!(job = self.period.job_name(), path = %path.display(), "summary written");

        if self.recipients.is_empty() {
            tracing::info!(job = self.period.job_name(), "no recipients configured; report saved only");
            return Ok(path);
        }

        let mut failed = Vec::new();
        for chat in &self.recipients {
            if let Err(e) = self.messenger.send_long_text(*chat, &summary.body).await {
                tracing::warn!(chat_id = chat.0, "failed to deliver summary: {e}");
                failed.push(chat.0);
            }
        }
        if failed.len() == self.recipients.len() {
            return Err(Error::External(format!(
                "summary delivery failed for all recipients: {failed:?}"
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl Job for SummaryJob {
    fn name(&self) -> &str {
        self.period.job_name()
    }

    async fn run(&self) -> Result<()> {
        self.run_at(Local::now()).await.map(|_| ())
    }
}

/// Admins receive summaries; with no admins, every allowed user does.
pub fn summary_recipients(policy: &AccessPolicy) -> Vec<ChatId> {
    let ids = if policy.admin_count() > 0 {
        policy.admins()
    } else {
        policy.allowed()
    };
    ids.into_iter().map(ChatId).collect()
}

/// Instantiate every enabled job from config.
pub fn build_jobs(
    cfg: &Config,
    journal: Arc<Journal>,
    messenger: Arc<dyn MessagingPort>,
    policy: &AccessPolicy,
) -> Result<Vec<(Arc<dyn Job>, Trigger)>> {
    let recipients = summary_recipients(policy);
    let mut out: Vec<(Arc<dyn Job>, Trigger)> = Vec::new();

    for job in cfg.jobs.iter().filter(|j| j.enabled) {
        let period = match job.name.as_str() {
            DAILY_SUMMARY => SummaryPeriod::Daily,
            WEEKLY_SUMMARY => SummaryPeriod::Weekly,
            other => return Err(Error::Config(format!("unknown scheduler job: {other}"))),
        };
        let built: Arc<dyn Job> = Arc::new(SummaryJob::new(
            period,
            Arc::clone(&journal),
            cfg.reports_dir.clone(),
            Arc::clone(&messenger),
            recipients.clone(),
        ));
        out.push((built, job.trigger.clone()));
    }

    Ok(out)
}

/// Relay degraded/recovered transitions to `recipients` until cancelled.
pub async fn forward_signals(
    mut signals: broadcast::Receiver<SchedulerSignal>,
    messenger: Arc<dyn MessagingPort>,
    recipients: Vec<ChatId>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => return,
            res = signals.recv() => match res {
                Ok(s) => s,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("dropped {n} scheduler signals");
                    continue;
                }
                Err(RecvError::Closed) => return,
            },
        };

        let text = match &signal {
            SchedulerSignal::Degraded {
                job,
                consecutive_failures,
                last_error,
            } => format!(
                "Job {job} is degraded after {consecutive_failures} failed runs.\nLast error: {last_error}"
            ),
            SchedulerSignal::Recovered { job } => format!("Job {job} recovered."),
        };
        for chat in &recipients {
            if let Err(e) = messenger.send_text(*chat, &text).await {
                tracing::warn!(chat_id = chat.0, "failed to send job alert: {e}");
            }
        }
    }
}

pub fn render_daily(day: NaiveDate, entries: &[JournalEntry]) -> Summary {
    let mut body = format!("# Daily summary: {}\n", day.format("%Y-%m-%d"));

    if entries.is_empty() {
        body.push_str("\nNothing logged today.\n");
    } else {
        for (kind, items) in group_by_kind(entries) {
            let _ = write!(body, "\n## {}\n", kind.label());
            for e in items {
                let at = e.timestamp.with_timezone(&Local).format("%H:%M");
                let _ = writeln!(body, "- {at} {}", e.text);
            }
        }
    }

    Summary {
        file_name: format!("daily-{}.md", day.format("%Y-%m-%d")),
        body,
    }
}

pub fn render_weekly(start: NaiveDate, end: NaiveDate, entries: &[JournalEntry]) -> Summary {
    let iso = end.iso_week();
    let mut body = format!(
        "# Weekly summary: {}-W{:02} ({} to {})\n\n",
        iso.year(),
        iso.week(),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );

    let grouped = group_by_kind(entries);
    for kind in EntryKind::ALL {
        let n = grouped.get(&kind).map_or(0, Vec::len);
        let _ = writeln!(body, "- {}: {n}", kind.label());
    }

    let tasks = grouped.get(&EntryKind::Task).cloned().unwrap_or_default();
    if !tasks.is_empty() {
        body.push_str("\n## Tasks\n");
        for e in tasks {
            let at = e.timestamp.with_timezone(&Local).format("%a %H:%M");
            let _ = writeln!(body, "- [ ] {} ({at})", e.text);
        }
    }

    Summary {
        file_name: format!("weekly-{}-W{:02}.md", iso.year(), iso.week()),
        body,
    }
}

fn group_by_kind(entries: &[JournalEntry]) -> BTreeMap<EntryKind, Vec<&JournalEntry>> {
    let mut out: BTreeMap<EntryKind, Vec<&JournalEntry>> = BTreeMap::new();
    for e in entries {
        out.entry(e.kind).or_default().push(e);
    }
    out
}

fn write_report(dir: &Path, summary: &Summary) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(&summary.file_name);
    fs::write(&path, &summary.body)?;
    Ok(path)
}

/// Start of `day` in local time, as UTC.
pub fn local_midnight(day: NaiveDate) -> Result<DateTime<Utc>> {
    let naive = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::External(format!("invalid date: {day}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::External(format!("no local midnight for {day}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use crate::messaging::types::MessagingCapabilities;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(ChatId, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessagingPort for Recorder {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 4096,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
            if self.fail {
                return Err(Error::External("telegram down".to_string()));
            }
            self.sent.lock().await.push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn noon(day: NaiveDate) -> DateTime<Local> {
        Local
            .from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap())
            .earliest()
            .unwrap()
    }

    #[tokio::test]
    async fn daily_summary_writes_report_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::new(dir.path().join("journal.jsonl")));
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let now = noon(day);

        journal
            .append(EntryKind::Health, UserId(1), "ran 5k", (now - Duration::hours(2)).with_timezone(&Utc))
            .unwrap();
        journal
            .append(EntryKind::Task, UserId(1), "file taxes", (now - Duration::days(1)).with_timezone(&Utc))
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let job = SummaryJob::new(
            SummaryPeriod::Daily,
            journal,
            dir.path().join("reports"),
            recorder.clone(),
            vec![ChatId(10), ChatId(11)],
        );
        let path = job.run_at(now).await.unwrap();

        assert!(path.ends_with("daily-2026-03-10.md"));
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("## Health"));
        assert!(body.contains("ran 5k"));
        assert!(!body.contains("file taxes"));

        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, ChatId(10));
        assert_eq!(sent[1].1, body);
    }

    #[tokio::test]
    async fn weekly_summary_counts_kinds_and_lists_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::new(dir.path().join("journal.jsonl")));
        let day = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let now = noon(day);
        for (kind, text, days_ago) in [
            (EntryKind::Task, "renew passport", 1),
            (EntryKind::Learning, "tokio select", 3),
            (EntryKind::Learning, "axum extractors", 6),
            (EntryKind::Note, "too old", 9),
        ] {
            let ts = (now - Duration::days(days_ago)).with_timezone(&Utc);
            journal.append(kind, UserId(1), text, ts).unwrap();
        }

        let job = SummaryJob::new(
            SummaryPeriod::Weekly,
            journal,
            dir.path().join("reports"),
            Arc::new(Recorder::default()),
            Vec::new(),
        );
        let path = job.run_at(now).await.unwrap();
        assert!(path.ends_with("weekly-2026-W11.md"));

        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("- Learning: 2"));
        assert!(body.contains("- Tasks: 1"));
        assert!(body.contains("- Notes: 0"));
        assert!(body.contains("- [ ] renew passport"));
        assert!(!body.contains("too old"));
    }

    #[tokio::test]
    async fn delivery_failure_to_everyone_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::new(dir.path().join("journal.jsonl")));
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let job = SummaryJob::new(
            SummaryPeriod::Daily,
            journal,
            dir.path().join("reports"),
            recorder,
            vec![ChatId(1)],
        );
        assert!(job.run().await.is_err());
        // The report is still on disk.
        assert_eq!(fs::read_dir(dir.path().join("reports")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn degraded_signal_is_forwarded() {
        let (tx, rx) = broadcast::channel(4);
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(forward_signals(
            rx,
            recorder.clone(),
            vec![ChatId(9)],
            cancel.clone(),
        ));

        tx.send(SchedulerSignal::Degraded {
            job: "daily_summary".to_string(),
            consecutive_failures: 3,
            last_error: "disk full".to_string(),
        })
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChatId(9));
        assert!(sent[0].1.contains("daily_summary is degraded"));
    }

    #[test]
    fn recipients_fall_back_to_allowed_users() {
        let with_admins = AccessPolicy::new([1, 2, 3], [3]).unwrap();
        assert_eq!(summary_recipients(&with_admins), vec![ChatId(3)]);

        let no_admins = AccessPolicy::new([5, 4], []).unwrap();
        assert_eq!(summary_recipients(&no_admins), vec![ChatId(4), ChatId(5)]);

        let open = AccessPolicy::new([], []).unwrap();
        assert!(summary_recipients(&open).is_empty());
    }

    #[test]
    fn empty_day_renders_placeholder() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let s = render_daily(day, &[]);
        assert_eq!(s.file_name, "daily-2026-01-02.md");
        assert!(s.body.contains("Nothing logged today."));
    }
}
