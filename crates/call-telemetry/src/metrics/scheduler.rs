//! Interval task runner with observable tick counters.
//!
//! Ticks that overrun the interval are skipped rather than queued
//! (`MissedTickBehavior::Skip`); a job never runs concurrently with itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Work executed on every tick
#[async_trait]
pub trait TickJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn tick(&self) -> Result<()>;
}

/// Counters shared between the task and its observers
#[derive(Debug, Default)]
pub struct TickStats {
    ticks: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickStatsSnapshot {
    pub ticks: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl TickStats {
    fn record_success(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_success_at.lock() = Some(Utc::now());
    }

    fn record_failure(&self, error: String) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error);
    }

    pub fn snapshot(&self) -> TickStatsSnapshot {
        TickStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            last_success_at: *self.last_success_at.lock(),
        }
    }
}

/// Starts [`TickJob`]s on a fixed interval
pub struct PeriodicTask;

impl PeriodicTask {
    /// Spawn `job` every `period`. The first run happens one period after start.
    pub fn start(period: Duration, job: Arc<dyn TickJob>) -> SchedulerHandle {
        let stats = Arc::new(TickStats::default());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_stats = stats.clone();
        let name = job.name().to_string();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately once
            ticker.tick().await;

            info!("⏱️ Started periodic task '{}' every {:?}", name, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match job.tick().await {
                            Ok(()) => {
                                task_stats.record_success();
                                debug!(task = %name, "tick completed");
                            }
                            Err(e) => {
                                warn!(task = %name, error = %e, "tick failed");
                                task_stats.record_failure(e.to_string());
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("🛑 Periodic task '{}' stopped", name);
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task: Some(task),
            stats,
        }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    stats: Arc<TickStats>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> TickStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<TickStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Signal the task and wait for the current tick to finish; aborts after
    /// `grace`
    pub async fn stop(&mut self, grace: Duration) {
        let _ = self.shutdown.send(true);
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("periodic task did not stop within {:?}, aborting", grace);
                task.abort();
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        runs: AtomicUsize,
        fail_every_other: bool,
        work: Duration,
    }

    #[async_trait]
    impl TickJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tick(&self) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            if self.fail_every_other && run % 2 == 1 {
                return Err(TelemetryError::internal("boom"));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_and_failures_are_counted() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail_every_other: true,
            work: Duration::from_millis(1),
        });
        let mut handle = PeriodicTask::start(Duration::from_secs(30), job.clone());

        tokio::time::sleep(Duration::from_secs(30 * 4 + 5)).await;
        let stats = handle.stats();
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.last_error.as_deref(), Some("Internal error: boom"));
        assert!(stats.last_success_at.is_some());

        handle.stop(Duration::from_secs(1)).await;
        assert!(!handle.is_running());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_ticks_are_skipped() {
        // each run takes 2.5 periods; skipped ticks must not pile up
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            fail_every_other: false,
            work: Duration::from_secs(25),
        });
        let mut handle = PeriodicTask::start(Duration::from_secs(10), job.clone());

        tokio::time::sleep(Duration::from_secs(100)).await;
        let runs = job.runs.load(Ordering::SeqCst);
        assert!(runs <= 4, "expected skipped ticks, got {runs} runs");
        assert!(runs >= 2);

        handle.stop(Duration::from_secs(60)).await;
    }
}
