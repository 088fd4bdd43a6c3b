//! # Telemetry Engine
//!
//! Wires the components together and owns the event-driven update path:
//!
//! ```text
//! webhook ─► EventNormalizer ─► relational store
//!                 │
//!                 ├─► hub: call_activity / agent_status
//!                 └─► for each affected location:
//!                        MetricsStore::recompute ─► hub: metrics_update
//!                        AlertEngine::raise      ─► hub: alert (one per rule that holds)
//! ```
//!
//! The periodic path ([`TickJob`] impl) recomputes every location, publishes
//! the new snapshots and evaluates alerts for all of them. Both paths go
//! through the same per-location writer lock inside [`MetricsStore`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::AlertEngine;
use crate::broadcast::{BroadcastHub, HubMessage, SubscriberConnection, SubscriptionHandle, SubscriptionScope};
use crate::config::TelemetryConfig;
use crate::database::{DatabaseManager, HistoryEntry, TelemetryStore};
use crate::error::{Result, TelemetryError};
use crate::metrics::{MetricsStore, RecomputeReport, TickJob};
use crate::normalizer::{EventNormalizer, IngestOutcome, ParsedWebhook};
use crate::provider::{verify_webhook_signature, HttpProviderClient, TelephonyProvider};
use crate::sync::{SyncOrchestrator, SyncRequest};
use crate::types::{LiveMetrics, Location, LocationMetrics, SyncJob, SyncStatus};

/// Acknowledgement returned for an accepted webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub event_type: String,
    pub outcome: IngestOutcome,
    pub processed_at: DateTime<Utc>,
}

pub struct TelemetryEngine {
    config: TelemetryConfig,
    store: Arc<dyn TelemetryStore>,
    normalizer: Arc<EventNormalizer>,
    metrics: Arc<MetricsStore>,
    alerts: Arc<AlertEngine>,
    hub: Arc<BroadcastHub>,
    sync: Arc<SyncOrchestrator>,
}

impl TelemetryEngine {
    pub fn new(
        config: TelemetryConfig,
        store: Arc<dyn TelemetryStore>,
        provider: Option<Arc<dyn TelephonyProvider>>,
    ) -> Self {
        let normalizer = Arc::new(EventNormalizer::new(
            store.clone(),
            config.identity.clone(),
            &config.normalizer,
        ));
        let metrics = Arc::new(MetricsStore::new(store.clone()));

        let mut alerts = AlertEngine::new(config.alerts.rules.clone(), metrics.clone());
        if config.alerts.persist_history {
            alerts = alerts.with_history(store.clone());
        }

        let hub = Arc::new(BroadcastHub::new(config.broadcast.delivery_timeout()));
        let sync = Arc::new(SyncOrchestrator::new(
            store.clone(),
            normalizer.clone(),
            metrics.clone(),
            provider,
            config.sync.clone(),
            config.provider.timeout(),
        ));

        Self {
            config,
            store,
            normalizer,
            metrics,
            alerts: Arc::new(alerts),
            hub,
            sync,
        }
    }

    /// Connect the configured database and, when enabled, the provider client
    pub async fn from_config(config: TelemetryConfig) -> Result<Self> {
        info!("🚀 Creating TelemetryEngine");
        let db = DatabaseManager::connect(&config.database).await?;

        let provider: Option<Arc<dyn TelephonyProvider>> = if config.provider.enabled {
            let client = HttpProviderClient::new(&config.provider)?;
            info!("☎️ Telephony provider client ready ({})", client.base_url());
            Some(Arc::new(client))
        } else {
            info!("Telephony provider disabled, sync requests will be rejected");
            None
        };

        Ok(Self::new(config, Arc::new(db), provider))
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    pub fn normalizer(&self) -> &Arc<EventNormalizer> {
        &self.normalizer
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn sync(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }

    /// Verify the signature of a raw webhook body, then process it
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookReceipt> {
        if self.config.webhook.verify_signatures {
            let secret = self
                .config
                .webhook
                .secret
                .as_deref()
                .ok_or_else(|| TelemetryError::configuration("webhook.secret is not set"))?;
            let signature =
                signature.ok_or_else(|| TelemetryError::unauthorized("missing webhook signature"))?;
            verify_webhook_signature(secret, body, signature)?;
        }

        let raw: Value = serde_json::from_slice(body)?;
        self.handle_event(&raw).await
    }

    /// Normalize, record and fan out one webhook event
    pub async fn handle_event(&self, raw: &Value) -> Result<WebhookReceipt> {
        let parsed = ParsedWebhook::parse(raw)?;
        let event_type = parsed.event.event_type().to_string();

        let normalized = self.normalizer.normalize_parsed(parsed).await?;
        let outcome = self.normalizer.record(normalized).await?;
        debug!(event_type = %event_type, outcome = outcome.as_str(), "webhook processed");

        self.after_ingest(&outcome).await;

        Ok(WebhookReceipt {
            event_type,
            outcome,
            processed_at: Utc::now(),
        })
    }

    async fn after_ingest(&self, outcome: &IngestOutcome) {
        let agent = match outcome {
            IngestOutcome::Recorded { event } => {
                self.hub.publish(&HubMessage::call_activity(event.clone())).await;
                event.agent_identity.clone()
            }
            IngestOutcome::PresenceUpdated { presence, .. } => {
                self.hub.publish(&HubMessage::agent_status(presence.clone())).await;
                Some(presence.agent_identity.clone())
            }
            _ => return,
        };

        for location in outcome.affected_locations() {
            // the event is stored; the next periodic tick repairs a failed recompute
            if let Err(e) = self.refresh_location(location, agent.as_deref()).await {
                warn!(location = %location, error = %e, "event-driven recompute failed");
            }
        }
    }

    /// Recompute one location, publish its snapshot and any alerts it raises
    pub async fn refresh_location(&self, location: Location, agent: Option<&str>) -> Result<LocationMetrics> {
        let metrics = self.metrics.recompute(location).await?;
        self.hub.publish(&HubMessage::metrics_update(metrics.clone())).await;

        for alert in self.alerts.raise(&metrics, agent).await {
            info!("🚨 {}", alert.message());
            self.hub.publish(&HubMessage::alert(alert)).await;
        }
        Ok(metrics)
    }

    /// Recompute every location and publish snapshots and alerts
    pub async fn refresh_all(&self) -> RecomputeReport {
        let report = self.metrics.recompute_all().await;
        for metrics in &report.updated {
            self.hub.publish(&HubMessage::metrics_update(metrics.clone())).await;
            for alert in self.alerts.raise(metrics, None).await {
                self.hub.publish(&HubMessage::alert(alert)).await;
            }
        }
        report
    }

    /// Operator-triggered recompute of one location, or all of them
    pub async fn recompute_now(&self, location: Option<Location>) -> Result<RecomputeReport> {
        match location {
            Some(location) => {
                let metrics = self.refresh_location(location, None).await?;
                Ok(RecomputeReport {
                    updated: vec![metrics],
                    failed: Vec::new(),
                })
            }
            None => Ok(self.refresh_all().await),
        }
    }

    /// Fill the cache before serving; failures leave empty snapshots
    pub async fn warm_up(&self) -> RecomputeReport {
        let report = self.metrics.recompute_all().await;
        info!(
            "🔥 Metrics cache warmed: {} location(s) ready, {} failed",
            report.updated.len(),
            report.failed.len()
        );
        report
    }

    pub fn snapshot(&self, location: Location) -> LocationMetrics {
        self.metrics.get(location)
    }

    pub fn snapshots(&self) -> Vec<LocationMetrics> {
        self.metrics.snapshot_all()
    }

    /// Snapshots the scope covers plus their overall totals
    pub fn live_metrics(&self, scope: &SubscriptionScope) -> LiveMetrics {
        self.metrics.live_metrics(|location| scope.covers(location))
    }

    /// Most recent logged events the scope covers, newest first
    pub async fn recent_events(&self, scope: &SubscriptionScope, limit: u32) -> Result<Vec<HistoryEntry>> {
        let locations: Vec<Location> = Location::ALL
            .iter()
            .copied()
            .filter(|location| scope.covers(*location))
            .collect();
        self.store.recent_history(&locations, limit).await
    }

    /// Register a live subscriber and send it the snapshot its scope covers
    pub async fn subscribe(
        &self,
        connection: Arc<dyn SubscriberConnection>,
        scope: SubscriptionScope,
    ) -> Result<SubscriptionHandle> {
        let snapshot = scope.filter_metrics(self.metrics.snapshot_all(), |m| m.location);
        let handle = self.hub.subscribe(connection, scope);
        self.hub.send_to(handle, &HubMessage::snapshot(snapshot)).await?;
        Ok(handle)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.hub.unsubscribe(handle)
    }

    pub async fn start_sync(&self, request: SyncRequest) -> Result<SyncJob> {
        self.sync.start(request).await
    }

    pub async fn sync_status(&self, job_id: Uuid) -> Result<SyncJob> {
        self.sync.status(job_id).await
    }

    pub async fn sync_history(&self, limit: u32) -> Result<Vec<SyncJob>> {
        self.sync.history(limit).await
    }

    /// Pull current agent statuses now and wait for the job to finish
    pub async fn refresh_agent_status(
        &self,
        location: Option<Location>,
        initiated_by: impl Into<String>,
    ) -> Result<SyncJob> {
        let request = SyncRequest::agent_status()
            .with_location(location)
            .initiated_by(initiated_by);
        let job = self.sync.start(request).await?;
        let job = self.sync.wait(job.id).await?;
        if job.status == SyncStatus::Completed {
            self.refresh_all().await;
        }
        Ok(job)
    }
}

#[async_trait]
impl TickJob for TelemetryEngine {
    fn name(&self) -> &str {
        "metrics-recompute"
    }

    async fn tick(&self) -> Result<()> {
        let report = self.refresh_all().await;
        if report.is_complete() {
            return Ok(());
        }
        let failed: Vec<String> = report
            .failed
            .iter()
            .map(|f| format!("{}: {}", f.location, f.error))
            .collect();
        Err(TelemetryError::database(format!(
            "recompute failed for {}",
            failed.join("; ")
        )))
    }
}
