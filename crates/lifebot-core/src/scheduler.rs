//! Timer-driven job scheduler.
//!
//! - Jobs are registered once at startup with a cron or fixed-interval trigger
//! - Each job runs in its own task; a run never blocks the dispatcher or health endpoint
//! - A failed run is logged and the job waits for its next trigger (no in-interval retry)
//! - `DEGRADED_AFTER` consecutive failures flag the job degraded and emit a signal
//! - Overlapping runs of the same job are skipped

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinSet,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{errors::Error, Result};

pub const DEGRADED_AFTER: u32 = 3;

/// Longest accepted fixed interval (one leap year).
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// Two leap cycles plus a day: `29 2` still matches across a skipped
/// century leap year (2096 -> 2104).
const MAX_SCAN_DAYS: u32 = 8 * 366 + 1;

/// A named unit of periodic work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronExpr),
    Every(Duration),
}

impl Trigger {
    pub fn cron(expr: &str) -> Result<Self> {
        Ok(Self::Cron(CronExpr::parse(expr)?))
    }

    pub fn every_secs(secs: u64) -> Self {
        Self::Every(Duration::from_secs(secs))
    }

    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Self::Cron(expr) => expr.next_after(now),
            Self::Every(d) => chrono::Duration::from_std(*d)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Cron(expr) => format!("cron '{}'", expr.source()),
            Self::Every(d) => format!("every {}s", d.as_secs()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct JobStatus {
    pub name: String,
    pub trigger: String,
    pub next_run: Option<DateTime<Local>>,
    pub last_run: Option<DateTime<Local>>,
    pub last_duration: Option<Duration>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub degraded: bool,
    pub running: bool,
}

/// Health transitions broadcast to subscribers (e.g. admin notifications).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerSignal {
    Degraded {
        job: String,
        consecutive_failures: u32,
        last_error: String,
    },
    Recovered {
        job: String,
    },
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    jobs: Vec<ScheduledJob>,
    status: Mutex<Vec<JobStatus>>,
    signals: broadcast::Sender<SchedulerSignal>,
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    trigger: Trigger,
}

impl Scheduler {
    pub fn new(jobs: Vec<(Arc<dyn Job>, Trigger)>) -> Self {
        let status = jobs
            .iter()
            .map(|(job, trigger)| JobStatus {
                name: job.name().to_string(),
                trigger: trigger.describe(),
                next_run: trigger.next_after(Local::now()),
                ..JobStatus::default()
            })
            .collect();
        let jobs = jobs
            .into_iter()
            .map(|(job, trigger)| ScheduledJob { job, trigger })
            .collect();
        let (signals, _) = broadcast::channel(32);

        Self {
            inner: Arc::new(SchedulerInner {
                jobs,
                status: Mutex::new(status),
                signals,
            }),
        }
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.inner
            .jobs
            .iter()
            .map(|j| j.job.name().to_string())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerSignal> {
        self.inner.signals.subscribe()
    }

    pub async fn statuses(&self) -> Vec<JobStatus> {
        self.inner.status.lock().await.clone()
    }

    pub async fn degraded_jobs(&self) -> Vec<String> {
        self.inner
            .status
            .lock()
            .await
            .iter()
            .filter(|s| s.degraded)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Run every job loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.inner.jobs.is_empty() {
            info!("no scheduled jobs configured");
        } else {
            info!("starting {} scheduled jobs", self.inner.jobs.len());
        }

        let mut loops = JoinSet::new();
        for idx in 0..self.inner.jobs.len() {
            let scheduler = self.clone();
            let cancel = cancel.clone();
            loops.spawn(async move { scheduler.job_loop(idx, cancel).await });
        }

        while let Some(res) = loops.join_next().await {
            if let Err(e) = res {
                error!("job loop crashed: {e}");
            }
        }

        // Loops only end early when a trigger has no next run; keep the task
        // alive so the supervisor does not read that as a shutdown.
        cancel.cancelled().await;
        info!("scheduler stopped");
        Ok(())
    }

    /// Run a job now and wait for it to finish. Returns `false` if it was
    /// skipped because a run is already in flight.
    pub async fn run_now(&self, name: &str) -> Result<bool> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| Error::External(format!("unknown job: {name}")))?;
        Ok(self.execute(idx).await)
    }

    /// Start a job in the background. Returns `false` for unknown names.
    pub fn trigger(&self, name: &str) -> bool {
        let Some(idx) = self.index_of(name) else {
            return false;
        };
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.execute(idx).await;
        });
        true
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.jobs.iter().position(|j| j.job.name() == name)
    }

    async fn job_loop(&self, idx: usize, cancel: CancellationToken) {
        let entry = &self.inner.jobs[idx];
        let name = entry.job.name().to_string();

        loop {
            let now = Local::now();
            let Some(next) = entry.trigger.next_after(now) else {
                warn!(job = %name, "job has no next run (stopping)");
                break;
            };
            self.inner.status.lock().await[idx].next_run = Some(next);

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(job = %name, next = %next, "job scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {
                    self.execute(idx).await;
                }
            }
        }
    }

    async fn execute(&self, idx: usize) -> bool {
        let entry = &self.inner.jobs[idx];
        let name = entry.job.name().to_string();

        {
            let mut st = self.inner.status.lock().await;
            let s = &mut st[idx];
            if s.running {
                info!(job = %name, "previous run still in progress, skipping");
                return false;
            }
            s.running = true;
            s.last_run = Some(Local::now());
        }

        info!(job = %name, "running scheduled job");
        let started = Instant::now();
        let job = Arc::clone(&entry.job);
        // Run on its own task so a panic is contained to this run.
        let outcome = match tokio::spawn(async move { job.run().await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("job task panicked: {e}")),
        };
        let elapsed = started.elapsed();

        let signal = {
            let mut st = self.inner.status.lock().await;
            let s = &mut st[idx];
            s.running = false;
            s.runs += 1;
            s.last_duration = Some(elapsed);
            record_outcome(s, outcome)
        };

        if let Some(signal) = signal {
            // No receivers is fine.
            let _ = self.inner.signals.send(signal);
        }
        true
    }
}

fn record_outcome(s: &mut JobStatus, outcome: std::result::Result<(), String>) -> Option<SchedulerSignal> {
    match outcome {
        Ok(()) => {
            info!(job = %s.name, "job completed");
            s.last_error = None;
            s.consecutive_failures = 0;
            if s.degraded {
                s.degraded = false;
                info!(job = %s.name, "job recovered");
                return Some(SchedulerSignal::Recovered {
                    job: s.name.clone(),
                });
            }
            None
        }
        Err(e) => {
            s.failures += 1;
            s.consecutive_failures += 1;
            s.last_error = Some(e.clone());
            error!(
                job = %s.name,
                consecutive_failures = s.consecutive_failures,
                "job failed: {e}"
            );
            if s.consecutive_failures == DEGRADED_AFTER {
                s.degraded = true;
                warn!(
                    job = %s.name,
                    "degraded job: {} consecutive failures", s.consecutive_failures
                );
                return Some(SchedulerSignal::Degraded {
                    job: s.name.clone(),
                    consecutive_failures: s.consecutive_failures,
                    last_error: e,
                });
            }
            None
        }
    }
}

// === Cron expression engine ===

/// Standard 5-field cron expression: `min hour dom mon dow`.
///
/// Supports `*`, lists, ranges, and steps. Day-of-week accepts 0-7 (both 0 and
/// 7 are Sunday). When both day fields are restricted a time matches if
/// either one does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: Field,
    hours: Field,
    days: Field,
    months: Field,
    weekdays: Field,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [min, hour, dom, mon, dow] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "expected 5 fields, got {}",
                parts.len()
            )));
        };

        let expr = Self {
            source: parts.join(" "),
            minutes: Field::parse(min, 0, 59)?,
            hours: Field::parse(hour, 0, 23)?,
            days: Field::parse(dom, 1, 31)?,
            months: Field::parse(mon, 1, 12)?,
            weekdays: Field::parse_weekdays(dow)?,
        };
        if !expr.can_match() {
            return Err(Error::Config(format!(
                "'{}' never matches: no selected month has the selected days",
                expr.source
            )));
        }
        Ok(expr)
    }

    // Only a day-of-month restriction without a weekday one can be empty,
    // e.g. `0 0 31 2 *`.
    fn can_match(&self) -> bool {
        if !self.days.restricted || self.weekdays.restricted {
            return true;
        }
        self.months.values(1, 12).any(|m| {
            let last = match m {
                2 => 29,
                4 | 6 | 9 | 11 => 30,
                _ => 31,
            };
            self.days.values(1, last).next().is_some()
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, dt: DateTime<Local>) -> bool {
        self.minutes.has(dt.minute())
            && self.hours.has(dt.hour())
            && self.day_matches(dt.date_naive())
    }

    fn day_matches(&self, day: NaiveDate) -> bool {
        if !self.months.has(day.month()) {
            return false;
        }

        let dom = self.days.has(day.day());
        let dow = self.weekdays.has(day.weekday().num_days_from_sunday());
        match (self.days.restricted, self.weekdays.restricted) {
            (false, false) => true,
            (false, true) => dow,
            (true, false) => dom,
            (true, true) => dom || dow,
        }
    }

    /// First matching minute strictly after `now`.
    ///
    /// Walks whole days and only expands hours and minutes on matching ones,
    /// so far-off dates (leap days) stay cheap.
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut day = now.date_naive();
        for _ in 0..MAX_SCAN_DAYS {
            if self.day_matches(day) {
                if let Some(t) = self.first_time_on(day, now) {
                    return Some(t);
                }
            }
            day = day.succ_opt()?;
        }
        None
    }

    fn first_time_on(&self, day: NaiveDate, now: DateTime<Local>) -> Option<DateTime<Local>> {
        for hour in self.hours.values(0, 23) {
            for minute in self.minutes.values(0, 59) {
                let Some(naive) = day.and_hms_opt(hour, minute, 0) else {
                    continue;
                };
                // Wall-clock times skipped by a DST jump have no instant.
                let Some(t) = Local.from_local_datetime(&naive).earliest() else {
                    continue;
                };
                if t > now {
                    return Some(t);
                }
            }
        }
        None
    }
}

impl Field {
    fn parse(raw: &str, lo: u32, hi: u32) -> Result<Self> {
        let bits = parse_bits(raw, lo, hi)?;
        Ok(Self {
            bits,
            restricted: bits != span(lo, hi),
        })
    }

    fn parse_weekdays(raw: &str) -> Result<Self> {
        let mut bits = parse_bits(raw, 0, 7)?;
        if bits & (1 << 7) != 0 {
            bits = (bits & !(1 << 7)) | 1;
        }
        Ok(Self {
            bits,
            restricted: bits != span(0, 6),
        })
    }

    fn has(&self, v: u32) -> bool {
        v < 64 && self.bits & (1 << v) != 0
    }

    fn values(self, lo: u32, hi: u32) -> impl Iterator<Item = u32> {
        (lo..=hi).filter(move |v| self.has(*v))
    }
}

fn span(lo: u32, hi: u32) -> u64 {
    (lo..=hi).fold(0, |acc, v| acc | (1 << v))
}

fn parse_bits(raw: &str, lo: u32, hi: u32) -> Result<u64> {
    let mut bits = 0u64;

    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(Error::Config(format!("empty list item in '{raw}'")));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid step: {step}")))?;
                if step == 0 {
                    return Err(Error::Config("step must be > 0".to_string()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, lo, hi)?, parse_value(b, lo, hi)?)
        } else {
            let v = parse_value(range, lo, hi)?;
            // `5/15` means "from 5 to the end, every 15".
            (v, if step.is_some() { hi } else { v })
        };

        if start > end {
            return Err(Error::Config(format!("invalid range: {range}")));
        }

        let step = step.unwrap_or(1) as usize;
        for v in (start..=end).step_by(step) {
            bits |= 1 << v;
        }
    }

    Ok(bits)
}

fn parse_value(s: &str, lo: u32, hi: u32) -> Result<u32> {
    let v: u32 = s
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid number: {s}")))?;
    if v < lo || v > hi {
        return Err(Error::Config(format!("{v} out of range {lo}-{hi}")));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn cron_expr_parses_and_matches_basic() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        assert!(expr.matches(at(2026, 1, 1, 10, 0, 0)));
        assert!(!expr.matches(at(2026, 1, 1, 10, 1, 0)));
    }

    #[test]
    fn cron_expr_next_after_finds_next_minute_boundary() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let next = expr.next_after(at(2026, 1, 1, 10, 1, 30)).unwrap();
        assert_eq!(next.minute(), 5);
        assert_eq!(next.second(), 0);

        // Strictly after: an exact match moves to the following slot.
        let next = expr.next_after(at(2026, 1, 1, 10, 5, 0)).unwrap();
        assert_eq!(next.minute(), 10);
    }

    #[test]
    fn weekly_expression_lands_on_sunday() {
        // 2026-01-01 is a Thursday.
        let expr = CronExpr::parse("0 18 * * 0").unwrap();
        let next = expr.next_after(at(2026, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!((next.day(), next.hour()), (4, 18));

        let seven = CronExpr::parse("0 18 * * 7").unwrap();
        assert_eq!(seven.next_after(at(2026, 1, 1, 12, 0, 0)), Some(next));
    }

    #[test]
    fn restricted_dom_and_dow_match_either() {
        // 1st of the month OR Mondays.
        let expr = CronExpr::parse("0 9 1 * 1").unwrap();
        assert!(expr.matches(at(2026, 1, 1, 9, 0, 0))); // Thursday the 1st
        assert!(expr.matches(at(2026, 1, 5, 9, 0, 0))); // Monday
        assert!(!expr.matches(at(2026, 1, 6, 9, 0, 0)));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let expr = CronExpr::parse("0,30 9-17/4 * * 1-5").unwrap();
        assert!(expr.matches(at(2026, 1, 5, 13, 30, 0)));
        assert!(!expr.matches(at(2026, 1, 5, 11, 0, 0)));
        assert!(!expr.matches(at(2026, 1, 3, 9, 0, 0))); // Saturday
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        for bad in [
            "* * * *",
            "60 * * * *",
            "* 24 * * *",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
            "1,,2 * * * *",
            "* * 0 * *",
        ] {
            assert!(CronExpr::parse(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn impossible_date_is_rejected_at_parse() {
        for never in ["0 0 31 2 *", "0 0 30,31 2 *", "0 0 31 4,6,9,11 *"] {
            assert!(CronExpr::parse(never).is_err(), "accepted {never}");
        }
        // A weekday restriction makes the day fields either-match.
        assert!(CronExpr::parse("0 0 31 2 1").is_ok());
        assert!(CronExpr::parse("0 0 31 1,2 *").is_ok());
    }

    #[test]
    fn leap_day_expression_finds_next_leap_year() {
        let expr = CronExpr::parse("0 9 29 2 *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 10, 18, 12, 0, 0)),
            Some(at(2028, 2, 29, 9, 0, 0))
        );
        // 2100 is not a leap year.
        assert_eq!(
            expr.next_after(at(2096, 3, 1, 0, 0, 0)),
            Some(at(2104, 2, 29, 9, 0, 0))
        );
    }

    #[test]
    fn next_after_crosses_year_end() {
        let expr = CronExpr::parse("30 6 1 1 *").unwrap();
        assert_eq!(
            expr.next_after(at(2026, 1, 1, 6, 30, 0)),
            Some(at(2027, 1, 1, 6, 30, 0))
        );
        assert_eq!(
            expr.next_after(at(2026, 12, 31, 23, 59, 59)),
            Some(at(2027, 1, 1, 6, 30, 0))
        );
    }

    #[test]
    fn interval_trigger_adds_duration() {
        let now = at(2026, 1, 1, 10, 0, 0);
        let t = Trigger::every_secs(90);
        assert_eq!(t.next_after(now), Some(at(2026, 1, 1, 10, 1, 30)));
        assert_eq!(t.describe(), "every 90s");
    }

    #[test]
    fn overflowing_interval_has_no_next_run() {
        let t = Trigger::every_secs(1_000_000_000_000_000);
        assert_eq!(t.next_after(at(2026, 1, 1, 10, 0, 0)), None);
        assert_eq!(t.next_after(Local::now()), None);

        let max = Trigger::every_secs(MAX_INTERVAL_SECS);
        assert!(max.next_after(Local::now()).is_some());
    }

    struct Flaky {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Job for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::External(format!("boom {n}")));
            }
            Ok(())
        }
    }

    fn flaky(fail_first: u32) -> Scheduler {
        let job: Arc<dyn Job> = Arc::new(Flaky {
            fail_first,
            calls: AtomicU32::new(0),
        });
        Scheduler::new(vec![(job, Trigger::every_secs(3600))])
    }

    #[tokio::test]
    async fn failure_keeps_job_scheduled_and_degrades_after_three() {
        let scheduler = flaky(3);
        let mut signals = scheduler.subscribe();

        for expected in 1..=2u32 {
            assert!(scheduler.run_now("flaky").await.unwrap());
            let st = &scheduler.statuses().await[0];
            assert_eq!(st.consecutive_failures, expected);
            assert!(!st.degraded);
        }
        assert!(signals.try_recv().is_err());

        scheduler.run_now("flaky").await.unwrap();
        assert_eq!(scheduler.degraded_jobs().await, vec!["flaky".to_string()]);
        assert_eq!(
            signals.try_recv().unwrap(),
            SchedulerSignal::Degraded {
                job: "flaky".to_string(),
                consecutive_failures: 3,
                last_error: "external error: boom 2".to_string(),
            }
        );

        scheduler.run_now("flaky").await.unwrap();
        let st = &scheduler.statuses().await[0];
        assert!(!st.degraded);
        assert_eq!(st.consecutive_failures, 0);
        assert_eq!(st.runs, 4);
        assert_eq!(st.failures, 3);
        assert_eq!(
            signals.try_recv().unwrap(),
            SchedulerSignal::Recovered {
                job: "flaky".to_string()
            }
        );
    }

    struct Panics;

    #[async_trait]
    impl Job for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(&self) -> Result<()> {
            panic!("job bug");
        }
    }

    #[tokio::test]
    async fn panicking_job_counts_as_failure() {
        let job: Arc<dyn Job> = Arc::new(Panics);
        let scheduler = Scheduler::new(vec![(job, Trigger::every_secs(60))]);
        scheduler.run_now("panics").await.unwrap();
        let st = &scheduler.statuses().await[0];
        assert_eq!(st.failures, 1);
        assert!(st.last_error.as_deref().unwrap_or("").contains("panicked"));
        assert!(!st.running);
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let scheduler = flaky(0);
        assert!(scheduler.run_now("nope").await.is_err());
        assert!(!scheduler.trigger("nope"));
    }

    #[tokio::test]
    async fn job_without_next_run_idles_until_cancel() {
        let job: Arc<dyn Job> = Arc::new(Flaky {
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let scheduler = Scheduler::new(vec![(job, Trigger::every_secs(1_000_000_000_000_000))]);
        assert_eq!(scheduler.statuses().await[0].next_run, None);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        let st = &scheduler.statuses().await[0];
        assert_eq!(st.runs, 0);
        assert_eq!(st.next_run, None);

        // Still reachable by hand.
        assert!(scheduler.run_now("flaky").await.unwrap());
        assert_eq!(scheduler.statuses().await[0].runs, 1);

        cancel.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancel() {
        let scheduler = flaky(0);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
        assert!(scheduler.statuses().await[0].next_run.is_some());
    }
}
