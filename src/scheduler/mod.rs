// Timer for the archive sweep. All times are UTC.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, SyncError};
use crate::monitoring::Metrics;
use crate::store::DocumentStore;
use crate::sync::archive::{archive_past_shows, ArchiveSummary};

pub const DEFAULT_SCHEDULE: &str = "every day 03:30";
const MAX_BACKOFF_SECS: u64 = 60;

/// When the archive sweep fires.
///
/// Accepts `every day HH:MM`, a bare `HH:MM`, or a six-field cron expression
/// (`sec min hour day month weekday`).
#[derive(Debug, Clone)]
pub struct ArchiveSchedule {
    expression: String,
    schedule: CronSchedule,
}

impl PartialEq for ArchiveSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl ArchiveSchedule {
    /// Once a day at `hour:minute`.
    pub fn daily(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(SyncError::Config(format!(
                "Invalid schedule time {hour:02}:{minute:02}"
            )));
        }
        Self::cron(&format!("0 {minute} {hour} * * *"))
    }

    pub fn cron(expression: &str) -> Result<Self> {
        let schedule = CronSchedule::from_str(expression).map_err(|e| {
            SyncError::Config(format!("Invalid cron expression '{expression}': {e}"))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let time = spec.strip_prefix("every day").unwrap_or(spec).trim();

        let Some((hour, minute)) = time.split_once(':') else {
            if time.len() != spec.len() {
                return Err(SyncError::Config(format!("Invalid schedule '{spec}'")));
            }
            return Self::cron(spec);
        };
        let hour: u32 = hour
            .parse()
            .map_err(|_| SyncError::Config(format!("Invalid hour in schedule '{spec}'")))?;
        let minute: u32 = minute
            .parse()
            .map_err(|_| SyncError::Config(format!("Invalid minute in schedule '{spec}'")))?;

        Self::daily(hour, minute)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First run time strictly after `now`, if the expression has one.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

/// Run `job` once, retrying up to `retry_count` more times on failure.
pub async fn run_with_retries<F, Fut, T>(name: &str, retry_count: u32, mut job: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match job(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt <= retry_count => {
                let backoff = backoff_for(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}",
                    name,
                    attempt,
                    retry_count + 1,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                error!("{} failed after {} attempts: {}", name, attempt, e);
                return Err(e);
            }
        }
    }
}

/// One scheduled run of the archive sweep, with completion logging.
pub async fn run_archive_job(
    store: &dyn DocumentStore,
    metrics: &Metrics,
    page_size: usize,
) -> Result<ArchiveSummary> {
    let start = Instant::now();
    let result = archive_past_shows(store, Utc::now(), page_size).await;

    match &result {
        Ok(summary) => {
            metrics.record_archive_success(summary, start.elapsed()).await;
            info!(
                scanned = summary.scanned,
                archived = summary.archived,
                run_at = %Utc::now().to_rfc3339(),
                "archivePastShowsDaily completed"
            );
        }
        Err(_) => metrics.record_archive_failure(),
    }

    result
}

/// Fires the archive sweep on its schedule until cancelled.
pub struct ArchiveScheduler {
    schedule: ArchiveSchedule,
    retry_count: u32,
    page_size: usize,
    store: Arc<dyn DocumentStore>,
    metrics: Arc<Metrics>,
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl ArchiveScheduler {
    pub fn new(
        schedule: ArchiveSchedule,
        retry_count: u32,
        page_size: usize,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            schedule,
            retry_count,
            page_size,
            store,
            metrics,
            next_run: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn next_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.read().await
    }

    pub async fn run_once(&self) -> Result<ArchiveSummary> {
        run_with_retries("archivePastShowsDaily", self.retry_count, |_| {
            run_archive_job(self.store.as_ref(), &self.metrics, self.page_size)
        })
        .await
    }

    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!("Archive scheduler started");

        loop {
            let now = Utc::now();
            let Some(next) = self.schedule.next_run_after(now) else {
                error!(
                    "Schedule '{}' has no future run, archive scheduler stopping",
                    self.schedule.expression()
                );
                break;
            };
            *self.next_run.write().await = Some(next);

            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next archive sweep at {} (in {}s)", next, wait.as_secs());

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Archive scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    warn!("Archive sweep interrupted by shutdown");
                    break;
                }
                result = self.run_once() => {
                    if let Err(e) = result {
                        // Next scheduled run starts from scratch
                        error!("Archive sweep gave up until the next scheduled run: {e}");
                    }
                }
            }
        }

        info!("Archive scheduler stopped");
    }
}
