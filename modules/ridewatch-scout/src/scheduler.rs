//! Cron-triggered job wiring. At most one instance of each named job runs
//! at a time; overlapping firings are dropped with a warning. Missed
//! firings across restarts are never back-filled, only reported.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ridewatch_common::{MetricsSink, RideWatchError};
use ridewatch_store::EventRepository;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// Serializes firings of one job. `try_run` executes the task only when no
/// earlier firing still holds the lock.
#[derive(Clone)]
pub struct OverlapGuard {
    name: &'static str,
    lock: Arc<tokio::sync::Mutex<()>>,
    metrics: Arc<MetricsSink>,
}

impl OverlapGuard {
    pub fn new(name: &'static str, metrics: Arc<MetricsSink>) -> Self {
        Self {
            name,
            lock: Arc::new(tokio::sync::Mutex::new(())),
            metrics,
        }
    }

    /// Run `task` unless an earlier firing is still in flight. Returns
    /// whether the task ran.
    pub async fn try_run<Fut>(&self, task: Fut) -> bool
    where
        Fut: Future<Output = ()>,
    {
        match self.lock.try_lock() {
            Ok(_held) => {
                task.await;
                true
            }
            Err(_) => {
                warn!(job = self.name, "previous firing still running, dropping");
                self.metrics
                    .incr(&format!("scheduler.overlap_dropped.{}", self.name));
                false
            }
        }
    }
}

/// True when the newest run started long enough ago that at least one
/// scheduled firing must have been missed.
pub fn missed_window(
    last_started: Option<DateTime<Utc>>,
    expected_interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    match last_started {
        None => false, // never ran; nothing was missed, the first run is pending
        Some(started) => {
            let gap = now - started;
            gap.num_seconds() > 2 * expected_interval.as_secs() as i64
        }
    }
}

pub struct ClockScheduler {
    scheduler: JobScheduler,
    metrics: Arc<MetricsSink>,
}

impl ClockScheduler {
    pub async fn new(metrics: Arc<MetricsSink>) -> Result<Self, RideWatchError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| RideWatchError::Config(format!("scheduler init: {e}")))?;
        Ok(Self { scheduler, metrics })
    }

    /// Register a named cron job. Each firing gets a fresh invocation of
    /// `task`; overlapping firings are dropped by the guard. An invalid
    /// cron expression is a configuration error.
    pub async fn add_job<F, Fut>(
        &self,
        name: &'static str,
        schedule: &str,
        task: F,
    ) -> Result<(), RideWatchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = OverlapGuard::new(name, self.metrics.clone());
        let task = Arc::new(task);

        let job = Job::new_async(schedule, move |_id, _scheduler| {
            let guard = guard.clone();
            let task = task.clone();
            Box::pin(async move {
                info!(job = name, "scheduled firing");
                guard.try_run(task()).await;
            })
        })
        .map_err(|e| RideWatchError::Config(format!("invalid cron '{schedule}': {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| RideWatchError::Config(format!("register job {name}: {e}")))?;
        Ok(())
    }

    /// Report (never back-fill) a firing gap for `job` since the last
    /// persisted run.
    pub async fn report_missed_window(
        &self,
        repo: &dyn EventRepository,
        job: &str,
        expected_interval: Duration,
    ) {
        let last_started = repo
            .recent_run_reports(job, 1)
            .await
            .ok()
            .and_then(|reports| reports.first().map(|r| r.started_at));
        if missed_window(last_started, expected_interval, Utc::now()) {
            warn!(
                job,
                last_started = ?last_started,
                "scheduled window was missed while the process was down"
            );
            self.metrics.incr(&format!("scheduler.missed_window.{job}"));
        }
    }

    pub async fn start(&self) -> Result<(), RideWatchError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| RideWatchError::Config(format!("scheduler start: {e}")))
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "scheduler shutdown failed");
        }
    }
}
