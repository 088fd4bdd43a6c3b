//! # Sync Orchestrator
//!
//! Pulls historical call detail records, or the current agent statuses, from
//! the telephony provider and feeds every record through the
//! [`EventNormalizer`], the same path webhooks take. Re-running an overlapping
//! range is safe because the normalizer deduplicates.
//!
//! ## Job lifecycle
//!
//! ```text
//!   start() ──► running ──► completed
//!                  │
//!                  └──────► failed  (provider error, timeout, store error)
//! ```
//!
//! Terminal states are final; a failed job is never resumed, a new one is
//! started instead. The `sync_jobs` table is the only record of what is
//! running, so the "already running" check survives restarts. A job left
//! `running` by a crashed process keeps blocking new jobs of its kind until a
//! caller starts one with the override flag.
//!
//! Per-record problems are counted in `errors` and never abort the job. A
//! failed page fetch fails the whole job, and so does a panic in the job's
//! task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::database::TelemetryStore;
use crate::error::{Result, TelemetryError};
use crate::metrics::MetricsStore;
use crate::normalizer::{EventNormalizer, IngestOutcome};
use crate::provider::{CdrQuery, TelephonyProvider};
use crate::types::{DateRange, Location, SyncJob, SyncKind, SyncStatus};

/// Parameters of a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub kind: SyncKind,
    pub date_range: Option<DateRange>,
    pub location: Option<Location>,
    /// Provider page size; configuration default when absent
    pub batch_size: Option<u32>,
    /// Start even if a job of the same kind is running
    pub override_running: bool,
    pub initiated_by: String,
}

impl SyncRequest {
    pub fn cdr(range: DateRange) -> Self {
        Self {
            kind: SyncKind::Cdr,
            date_range: Some(range),
            location: None,
            batch_size: None,
            override_running: false,
            initiated_by: "system".to_string(),
        }
    }

    pub fn agent_status() -> Self {
        Self {
            kind: SyncKind::AgentStatus,
            date_range: None,
            location: None,
            batch_size: None,
            override_running: false,
            initiated_by: "system".to_string(),
        }
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_override(mut self, override_running: bool) -> Self {
        self.override_running = override_running;
        self
    }

    pub fn initiated_by(mut self, who: impl Into<String>) -> Self {
        self.initiated_by = who.into();
        self
    }
}

/// Shared pieces a running job needs
#[derive(Clone)]
struct SyncWorker {
    store: Arc<dyn TelemetryStore>,
    normalizer: Arc<EventNormalizer>,
    metrics: Arc<MetricsStore>,
    provider_timeout: Duration,
    recompute_after_sync: bool,
}

pub struct SyncOrchestrator {
    worker: SyncWorker,
    provider: Option<Arc<dyn TelephonyProvider>>,
    config: SyncConfig,
    /// Serializes the running-job check with job creation
    start_lock: Mutex<()>,
    tasks: DashMap<Uuid, JoinHandle<SyncJob>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        normalizer: Arc<EventNormalizer>,
        metrics: Arc<MetricsStore>,
        provider: Option<Arc<dyn TelephonyProvider>>,
        config: SyncConfig,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            worker: SyncWorker {
                store,
                normalizer,
                metrics,
                provider_timeout,
                recompute_after_sync: config.recompute_after_sync,
            },
            provider,
            config,
            start_lock: Mutex::new(()),
            tasks: DashMap::new(),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Validate, check for running jobs, persist a `running` job and spawn it
    pub async fn start(&self, request: SyncRequest) -> Result<SyncJob> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| TelemetryError::provider_unavailable("no telephony provider is configured"))?;

        let batch_size = request.batch_size.unwrap_or(self.config.default_batch_size);
        if batch_size == 0 || batch_size > self.config.max_batch_size {
            return Err(TelemetryError::invalid_input(format!(
                "batch_size must be between 1 and {}",
                self.config.max_batch_size
            )));
        }

        let date_range = match request.kind {
            SyncKind::Cdr => {
                let range = request
                    .date_range
                    .ok_or_else(|| TelemetryError::invalid_input("a CDR sync requires a date range"))?;
                range.validate(Utc::now().date_naive(), self.config.max_range_days)?;
                Some(range)
            }
            SyncKind::AgentStatus => None,
        };

        let _guard = self.start_lock.lock().await;

        let running = self.worker.store.running_sync_jobs(request.kind).await?;
        if !running.is_empty() {
            let ids: Vec<Uuid> = running.iter().map(|job| job.id).collect();
            if !request.override_running {
                return Err(TelemetryError::AlreadyRunning {
                    kind: request.kind,
                    running: ids,
                });
            }
            warn!(kind = %request.kind, running = ?ids, "starting sync alongside running job(s) by override");
        }

        let job = SyncJob::start(
            request.kind,
            date_range,
            request.location,
            batch_size,
            request.initiated_by,
            request.override_running,
        );
        self.worker.store.create_sync_job(&job).await?;

        self.tasks.retain(|_, task| !task.is_finished());
        let worker = self.worker.clone();
        let spawned = job.clone();
        let task = tokio::spawn(worker.supervise(spawned, provider));
        self.tasks.insert(job.id, task);

        info!(
            "🔄 Started {} sync job {} (batch size {}, initiated by {})",
            job.kind, job.id, job.batch_size, job.initiated_by
        );
        Ok(job)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<SyncJob> {
        self.worker
            .store
            .get_sync_job(job_id)
            .await?
            .ok_or_else(|| TelemetryError::not_found(format!("sync job {} not found", job_id)))
    }

    /// Wait for a job started by this process to reach a terminal state.
    /// Jobs this process is not running are returned as currently stored.
    pub async fn wait(&self, job_id: Uuid) -> Result<SyncJob> {
        match self.tasks.remove(&job_id) {
            Some((_, task)) => task
                .await
                .map_err(|e| TelemetryError::internal(format!("sync job {} panicked: {}", job_id, e))),
            None => self.status(job_id).await,
        }
    }

    /// Most recent jobs first
    pub async fn history(&self, limit: u32) -> Result<Vec<SyncJob>> {
        self.worker.store.recent_sync_jobs(limit).await
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks.iter().filter(|task| !task.value().is_finished()).count()
    }
}

impl SyncWorker {
    /// Run the job on its own task and fail it if that task panics, so a
    /// panicking job does not stay `running` and block its kind
    async fn supervise(self, job: SyncJob, provider: Arc<dyn TelephonyProvider>) -> SyncJob {
        let store = self.store.clone();
        let initial = job.clone();

        let panic = match tokio::spawn(async move { self.run(job, provider).await }).await {
            Ok(job) => return job,
            Err(e) => e,
        };

        // keep the counters of the last persisted page
        let mut job = match store.get_sync_job(initial.id).await {
            Ok(Some(stored)) => stored,
            _ => initial,
        };
        error!(job_id = %job.id, kind = %job.kind, error = %panic, "sync job worker panicked");
        job.fail(format!("sync worker panicked: {}", panic));
        if let Err(e) = store.update_sync_job(&job).await {
            error!(job_id = %job.id, error = %e, "failed to persist terminal sync job state");
        }
        job
    }

    async fn run(&self, mut job: SyncJob, provider: Arc<dyn TelephonyProvider>) -> SyncJob {
        let result = match job.kind {
            SyncKind::Cdr => self.run_cdr(&mut job, provider.as_ref()).await,
            SyncKind::AgentStatus => self.run_agent_status(&mut job, provider.as_ref()).await,
        };

        match result {
            Ok(()) => job.complete(),
            Err(e) => {
                error!(job_id = %job.id, kind = %job.kind, error = %e, "sync job failed");
                job.fail(e.to_string());
            }
        }

        if let Err(e) = self.store.update_sync_job(&job).await {
            error!(job_id = %job.id, error = %e, "failed to persist terminal sync job state");
        }

        if job.status == SyncStatus::Completed {
            info!(
                "✅ Sync job {} completed: fetched {}, processed {}, skipped {}, errors {}",
                job.id, job.fetched, job.processed, job.skipped, job.errors
            );
            if self.recompute_after_sync {
                let report = self.metrics.recompute_all().await;
                if !report.is_complete() {
                    warn!(job_id = %job.id, failed = report.failed.len(), "post-sync recompute incomplete");
                }
            }
        }
        job
    }

    async fn run_cdr(&self, job: &mut SyncJob, provider: &dyn TelephonyProvider) -> Result<()> {
        let range = job
            .date_range
            .ok_or_else(|| TelemetryError::invalid_input("a CDR sync requires a date range"))?;
        let mut offset = 0u64;

        loop {
            let query = CdrQuery {
                range,
                location: job.location,
                limit: job.batch_size,
                offset,
            };
            let page = match tokio::time::timeout(self.provider_timeout, provider.fetch_cdr_page(&query)).await {
                Ok(page) => page?,
                Err(_) => {
                    return Err(TelemetryError::timeout(format!(
                        "CDR page at offset {} did not arrive within {:?}",
                        offset, self.provider_timeout
                    )))
                }
            };

            let received = page.len();
            job.fetched += received as u64;
            for record in &page {
                match self.normalizer.ingest_cdr(record).await {
                    Ok(IngestOutcome::Recorded { .. }) => job.processed += 1,
                    Ok(_) => job.skipped += 1,
                    Err(e) => {
                        job.errors += 1;
                        warn!(
                            job_id = %job.id,
                            call_id = record.call_id.as_deref().unwrap_or("<missing>"),
                            error = %e,
                            "skipping CDR record"
                        );
                    }
                }
            }

            self.store.update_sync_job(job).await?;

            if received < job.batch_size as usize {
                return Ok(());
            }
            offset += received as u64;
        }
    }

    async fn run_agent_status(&self, job: &mut SyncJob, provider: &dyn TelephonyProvider) -> Result<()> {
        let statuses = match tokio::time::timeout(self.provider_timeout, provider.fetch_agent_statuses(job.location)).await {
            Ok(statuses) => statuses?,
            Err(_) => {
                return Err(TelemetryError::timeout(format!(
                    "agent statuses did not arrive within {:?}",
                    self.provider_timeout
                )))
            }
        };

        job.fetched = statuses.len() as u64;
        for status in &statuses {
            match self.normalizer.ingest_agent_status(status).await {
                Ok(IngestOutcome::PresenceUpdated { .. }) => job.processed += 1,
                Ok(_) => job.skipped += 1,
                Err(e) => {
                    job.errors += 1;
                    warn!(job_id = %job.id, agent = %status.email, error = %e, "skipping agent status");
                }
            }
        }
        self.store.update_sync_job(job).await?;
        Ok(())
    }
}
