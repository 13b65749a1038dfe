//! Recurring jobs: a queue of due instants polled against an injectable clock.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::autopost::AutoPoster;
use crate::config::Config;
use crate::db::Database;
use crate::fetcher::Fetcher;

const SYSTEM_CHECK_HOURS: i64 = 6;
const POLL_SECONDS: u64 = 30;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    RefreshFeeds,
    AutoPost,
    SystemCheck,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::RefreshFeeds => "refresh-feeds",
            JobKind::AutoPost => "auto-post",
            JobKind::SystemCheck => "system-check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cadence {
    Every(Duration),
    /// A local wall-clock time, local being UTC shifted by the offset.
    DailyAt(NaiveTime, FixedOffset),
}

impl Cadence {
    /// First occurrence strictly after `now`, given the previous due instant.
    pub fn next_after(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Every(interval) => {
                let interval = interval.max(Duration::seconds(1));
                let mut next = previous + interval;
                if next <= now {
                    // Skip missed slots instead of replaying them
                    let missed = (now - next).num_seconds() / interval.num_seconds() + 1;
                    next += interval * missed as i32;
                }
                next
            }
            Cadence::DailyAt(time, offset) => daily_after(time, offset, now),
        }
    }

    /// When a job with this cadence first becomes due, counting from `now`.
    pub fn first_due(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Every(interval) => now + interval,
            Cadence::DailyAt(time, offset) => daily_after(time, offset, now),
        }
    }
}

fn daily_after(time: NaiveTime, offset: FixedOffset, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let mut date = local_date;
    loop {
        let candidate = offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc));
        match candidate {
            Some(at) if at > now => return at,
            _ => date = date.succ_opt().unwrap_or(date),
        }
        if date == local_date {
            // Calendar overflow; nothing sensible left to schedule
            return now + Duration::days(1);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub kind: JobKind,
    pub cadence: Cadence,
    pub next_due: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: JobKind, cadence: Cadence, first_due: DateTime<Utc>) {
        self.jobs.push(Job {
            kind,
            cadence,
            next_due: first_due,
        });
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Jobs whose due time has passed, in insertion order. Each is rescheduled
    /// strictly after `now` before being returned.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<JobKind> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_due <= now {
                due.push(job.kind);
                job.next_due = job.cadence.next_after(job.next_due, now);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.jobs.iter().map(|job| job.next_due).min()
    }
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one job, returning a one-line summary for the log.
    async fn run(&self, job: JobKind, now: DateTime<Utc>) -> anyhow::Result<String>;
}

/// Runs jobs against the live fetcher, auto-poster and database.
pub struct AppJobRunner {
    db: Arc<Database>,
    fetcher: Arc<Fetcher>,
    poster: Arc<AutoPoster>,
}

impl AppJobRunner {
    pub fn new(db: Arc<Database>, fetcher: Arc<Fetcher>, poster: Arc<AutoPoster>) -> Self {
        Self {
            db,
            fetcher,
            poster,
        }
    }
}

#[async_trait]
impl JobRunner for AppJobRunner {
    async fn run(&self, job: JobKind, now: DateTime<Utc>) -> anyhow::Result<String> {
        match job {
            JobKind::RefreshFeeds => {
                let inserted = self.fetcher.refresh_all_feeds().await?;
                Ok(format!("{} new posts", inserted))
            }
            JobKind::AutoPost => Ok(self.poster.run(now).await?.to_string()),
            JobKind::SystemCheck => {
                let stats = self.db.stats(now).await?;
                Ok(format!(
                    "scheduler alive, {} posts, {} today",
                    stats.total_posts, stats.today_posts
                ))
            }
        }
    }
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    runner: Arc<dyn JobRunner>,
    queue: JobQueue,
    poll_interval: StdDuration,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, runner: Arc<dyn JobRunner>, queue: JobQueue) -> Self {
        Self {
            clock,
            runner,
            queue,
            poll_interval: StdDuration::from_secs(POLL_SECONDS),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: StdDuration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Run every due job once, sequentially. A failing job is logged and
    /// does not stop the others. Returns the jobs that ran.
    pub async fn tick(&mut self) -> Vec<JobKind> {
        let now = self.clock.now();
        let due = self.queue.take_due(now);

        for job in &due {
            debug!("Running job {}", job);
            match self.runner.run(*job, now).await {
                Ok(summary) => info!("Job {} finished: {}", job, summary),
                Err(e) => error!("Job {} failed: {:#}", job, e),
            }
        }
        due
    }

    /// Poll the queue until the shutdown flag flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Scheduler started with {} jobs, polling every {}s",
            self.queue.jobs().len(),
            self.poll_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Scheduler received shutdown signal");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

/// The application's jobs: feed refresh at startup and every
/// `refresh_interval` minutes, the daily auto-post, and a periodic check.
pub fn build_queue(config: &Config, now: DateTime<Utc>) -> anyhow::Result<JobQueue> {
    let mut queue = JobQueue::new();

    let refresh = Cadence::Every(Duration::minutes(config.fetch.refresh_interval.max(1) as i64));
    queue.add(JobKind::RefreshFeeds, refresh, now);

    if config.autopost.enabled {
        let time = NaiveTime::parse_from_str(&config.autopost.time, "%H:%M")
            .with_context(|| format!("invalid auto-post time '{}'", config.autopost.time))?;
        let offset = config.autopost.local_offset()?;
        let daily = Cadence::DailyAt(time, offset);
        queue.add(JobKind::AutoPost, daily, daily.first_due(now));
    }

    let check = Cadence::Every(Duration::hours(SYSTEM_CHECK_HOURS));
    queue.add(JobKind::SystemCheck, check, check.first_due(now));

    Ok(queue)
}
