//! # Location Metrics Store
//!
//! In-memory cache of [`LocationMetrics`], one slot per location. The cache is
//! never the source of truth: every write is a full aggregation over the
//! relational store, so a missed update is repaired by the next recompute.
//!
//! ## Concurrency
//!
//! - Each slot has its own async writer lock. Event-driven and periodic
//!   recomputes of the same location are serialized; different locations
//!   recompute in parallel.
//! - Readers never wait on a writer. A slot holds an `Arc` snapshot that is
//!   swapped only after an aggregation completes, so `get` always returns a
//!   complete snapshot.
//! - A failed aggregation leaves the previous snapshot, and its older
//!   `updated_at`, in place.
//!
//! ## Queue definition
//!
//! Queue length counts calls with a `started` stage no older than
//! [`RINGING_CUTOFF`] and neither `answered` nor `ended`. `avg_wait_seconds`
//! is the mean age of exactly those calls.
//!
//! ## KPIs
//!
//! Call KPIs cover calls that ended in the last hour: service level is the
//! percentage answered within [`SERVICE_LEVEL_SECONDS`](crate::types::SERVICE_LEVEL_SECONDS)
//! of ringing, abandonment rate the percentage abandoned. Agent utilization
//! averages today's shift utilization at the location.

pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::database::{LocationActivity, TelemetryStore};
use crate::error::{Result, TelemetryError};
use crate::types::{round2, LiveMetrics, Location, LocationKpis, LocationMetrics};

pub use scheduler::{PeriodicTask, SchedulerHandle, TickJob, TickStats, TickStatsSnapshot};

/// Calls ringing longer than this are no longer counted as queued
pub const RINGING_CUTOFF: Duration = Duration::from_secs(300);

struct LocationSlot {
    writer: Mutex<()>,
    snapshot: RwLock<Arc<LocationMetrics>>,
}

impl LocationSlot {
    fn new(location: Location) -> Self {
        Self {
            writer: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(LocationMetrics::empty(location))),
        }
    }
}

/// Outcome of recomputing every location
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecomputeReport {
    pub updated: Vec<LocationMetrics>,
    pub failed: Vec<LocationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationFailure {
    pub location: Location,
    pub error: String,
}

impl RecomputeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct MetricsStore {
    store: Arc<dyn TelemetryStore>,
    slots: HashMap<Location, LocationSlot>,
}

impl MetricsStore {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        let slots = Location::ALL
            .iter()
            .map(|location| (*location, LocationSlot::new(*location)))
            .collect();
        Self { store, slots }
    }

    fn slot(&self, location: Location) -> Result<&LocationSlot> {
        self.slots
            .get(&location)
            .ok_or_else(|| TelemetryError::not_found(format!("no metrics slot for {}", location)))
    }

    /// Latest complete snapshot
    pub fn get(&self, location: Location) -> LocationMetrics {
        match self.slots.get(&location) {
            Some(slot) => slot.snapshot.read().as_ref().clone(),
            None => LocationMetrics::empty(location),
        }
    }

    pub fn snapshot_all(&self) -> Vec<LocationMetrics> {
        Location::ALL.iter().map(|location| self.get(*location)).collect()
    }

    /// Snapshots of the included locations plus their overall totals
    pub fn live_metrics(&self, include: impl Fn(Location) -> bool) -> LiveMetrics {
        LiveMetrics::new(
            self.snapshot_all()
                .into_iter()
                .filter(|m| include(m.location))
                .collect(),
        )
    }

    /// Rebuild one location's snapshot from the relational store
    pub async fn recompute(&self, location: Location) -> Result<LocationMetrics> {
        let slot = self.slot(location)?;
        let _writer = slot.writer.lock().await;

        let now = Utc::now();
        let activity = self
            .store
            .location_activity(location, now, RINGING_CUTOFF)
            .await?;

        let metrics = LocationMetrics {
            location,
            active_calls: activity.active_calls,
            available_agents: activity.available_agents,
            busy_agents: activity.busy_agents,
            away_agents: activity.away_agents,
            queue_length: activity.ringing_calls,
            avg_wait_seconds: activity
                .avg_ringing_seconds
                .map(|secs| secs.round() as i64)
                .unwrap_or(0),
            calls_last_hour: activity.calls_last_hour,
            kpis: kpis_from(&activity),
            updated_at: Some(now),
        };

        *slot.snapshot.write() = Arc::new(metrics.clone());
        debug!(
            location = %location,
            active_calls = metrics.active_calls,
            queue_length = metrics.queue_length,
            available_agents = metrics.available_agents,
            service_level = metrics.kpis.service_level,
            "metrics recomputed"
        );
        Ok(metrics)
    }

    /// Recompute every location concurrently; failures are isolated per location
    pub async fn recompute_all(&self) -> RecomputeReport {
        let results = join_all(Location::ALL.iter().map(|location| async move {
            (*location, self.recompute(*location).await)
        }))
        .await;

        let mut report = RecomputeReport::default();
        for (location, result) in results {
            match result {
                Ok(metrics) => report.updated.push(metrics),
                Err(e) => {
                    warn!(location = %location, error = %e, "metrics recompute failed, keeping previous snapshot");
                    report.failed.push(LocationFailure {
                        location,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

fn kpis_from(activity: &LocationActivity) -> LocationKpis {
    let ended = activity.calls_last_hour;
    let percent = |part: i64| {
        if ended > 0 {
            round2(part as f64 * 100.0 / ended as f64)
        } else {
            0.0
        }
    };

    LocationKpis {
        service_level: percent(activity.answered_within_target),
        abandonment_rate: percent(activity.abandoned_last_hour),
        average_call_duration_seconds: activity.avg_talk_seconds.map(|s| s.round() as i64).unwrap_or(0),
        calls_per_minute: round2(ended as f64 / 60.0),
        agent_utilization: activity.agent_utilization.map(round2).unwrap_or(0.0),
    }
}
