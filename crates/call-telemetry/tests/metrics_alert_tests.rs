//! Metrics aggregation and alert evaluation over recorded activity

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callwatch_call_telemetry::alerts::{AlertEngine, AlertEvent, AlertRule, Comparison};
use callwatch_call_telemetry::database::{
    DatabaseManager, HistoryEntry, LocationActivity, PresenceWrite, ShiftCall, TelemetryStore,
};
use callwatch_call_telemetry::broadcast::SubscriptionScope;
use callwatch_call_telemetry::metrics::MetricsStore;
use callwatch_call_telemetry::{
    AgentPresence, CallEvent, CallEventKind, Location, LocationKpis, MetricName, Result, Severity, SyncJob,
    SyncKind, TelemetryError,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use common::*;
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

/// Delegates to SQLite but fails aggregation for one location
struct FailingLocationStore {
    inner: DatabaseManager,
    broken: Location,
}

#[async_trait]
impl TelemetryStore for FailingLocationStore {
    async fn call_event_exists(&self, provider_call_id: &str, kind: CallEventKind) -> Result<bool> {
        self.inner.call_event_exists(provider_call_id, kind).await
    }

    async fn insert_call_event(&self, event: &CallEvent) -> Result<bool> {
        self.inner.insert_call_event(event).await
    }

    async fn find_agent_identity(&self, extension: &str, name: &str) -> Result<Option<String>> {
        self.inner.find_agent_identity(extension, name).await
    }

    async fn upsert_agent_presence(&self, presence: &AgentPresence) -> Result<PresenceWrite> {
        self.inner.upsert_agent_presence(presence).await
    }

    async fn record_shift_call(&self, shift: &ShiftCall) -> Result<()> {
        self.inner.record_shift_call(shift).await
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.inner.append_history(entry).await
    }

    async fn recent_history(&self, locations: &[Location], limit: u32) -> Result<Vec<HistoryEntry>> {
        self.inner.recent_history(locations, limit).await
    }

    async fn location_activity(
        &self,
        location: Location,
        now: DateTime<Utc>,
        ringing_cutoff: Duration,
    ) -> Result<LocationActivity> {
        if location == self.broken {
            return Err(TelemetryError::database("disk I/O error"));
        }
        self.inner.location_activity(location, now, ringing_cutoff).await
    }

    async fn insert_alert(&self, alert: &AlertEvent) -> Result<()> {
        self.inner.insert_alert(alert).await
    }

    async fn create_sync_job(&self, job: &SyncJob) -> Result<()> {
        self.inner.create_sync_job(job).await
    }

    async fn update_sync_job(&self, job: &SyncJob) -> Result<()> {
        self.inner.update_sync_job(job).await
    }

    async fn get_sync_job(&self, id: Uuid) -> Result<Option<SyncJob>> {
        self.inner.get_sync_job(id).await
    }

    async fn running_sync_jobs(&self, kind: SyncKind) -> Result<Vec<SyncJob>> {
        self.inner.running_sync_jobs(kind).await
    }

    async fn recent_sync_jobs(&self, limit: u32) -> Result<Vec<SyncJob>> {
        self.inner.recent_sync_jobs(limit).await
    }
}

#[tokio::test]
async fn test_active_calls_and_queue_follow_call_stages() {
    let (engine, _db) = test_engine().await;

    let t0 = minutes_ago(3);
    for id in ["A1", "A2", "A3"] {
        engine.handle_event(&call_started(id, "wixom", t0)).await.unwrap();
    }
    let after_start = engine.snapshot(Location::Wixom);
    assert_eq!(after_start.active_calls, 3);
    assert_eq!(after_start.queue_length, 3);
    assert!(after_start.avg_wait_seconds >= 170, "avg wait {}", after_start.avg_wait_seconds);

    engine
        .handle_event(&call_answered("A1", "wixom", t0, t0 + ChronoDuration::seconds(30)))
        .await
        .unwrap();
    let after_answer = engine.snapshot(Location::Wixom);
    assert_eq!(after_answer.active_calls, 3);
    assert_eq!(after_answer.queue_length, 2);

    engine.handle_event(&call_completed("A1", "wixom", minutes_ago(0))).await.unwrap();
    engine.handle_event(&call_completed("A2", "wixom", minutes_ago(0))).await.unwrap();
    let after_end = engine.snapshot(Location::Wixom);
    assert_eq!(after_end.active_calls, 1);
    assert_eq!(after_end.queue_length, 1);
    assert_eq!(after_end.calls_last_hour, 2);

    assert_eq!(engine.snapshot(Location::Plymouth).active_calls, 0);
}

#[tokio::test]
async fn test_stale_ringing_calls_leave_the_queue() {
    let (engine, _db) = test_engine().await;
    engine.handle_event(&call_started("R1", "plymouth", minutes_ago(10))).await.unwrap();
    engine.handle_event(&call_started("R2", "plymouth", minutes_ago(1))).await.unwrap();

    let metrics = engine.snapshot(Location::Plymouth);
    assert_eq!(metrics.active_calls, 2);
    assert_eq!(metrics.queue_length, 1);
    assert!(metrics.avg_wait_seconds < 300);
}

#[tokio::test]
async fn test_calls_last_hour_ignores_older_calls() {
    let (engine, _db) = test_engine().await;
    engine.handle_event(&call_completed("H1", "aa", minutes_ago(90))).await.unwrap();
    engine.handle_event(&call_completed("H2", "aa", minutes_ago(30))).await.unwrap();

    assert_eq!(engine.snapshot(Location::AnnArbor).calls_last_hour, 1);
}

#[tokio::test]
async fn test_service_level_and_abandonment_rate() {
    let (engine, _db) = test_engine().await;
    let ended = minutes_ago(5);

    // K1 and K4 ring 20s, K2 rings 45s, K3 is abandoned before an answer
    let mut slow = completed_data("K2", "wixom", ended);
    slow["AnswerTime"] = json!(rfc3339(ended - ChronoDuration::seconds(255)));
    let mut abandoned = completed_data("K3", "wixom", ended);
    abandoned.as_object_mut().unwrap().remove("AnswerTime");
    abandoned["TalkDuration"] = json!(0);
    abandoned["CallResult"] = json!("abandoned");

    for event in [
        call_completed("K1", "wixom", ended),
        webhook("call_completed", slow),
        webhook("call_completed", abandoned),
        call_completed("K4", "wixom", ended),
    ] {
        engine.handle_event(&event).await.unwrap();
    }
    // outside the window
    engine.handle_event(&call_completed("K5", "wixom", minutes_ago(90))).await.unwrap();

    let metrics = engine.snapshot(Location::Wixom);
    assert_eq!(metrics.calls_last_hour, 4);
    assert_eq!(metrics.kpis.service_level, 50.0);
    assert_eq!(metrics.kpis.abandonment_rate, 25.0);
    assert_eq!(metrics.kpis.average_call_duration_seconds, 210);
    assert_eq!(metrics.kpis.calls_per_minute, 0.07);
    assert_eq!(metrics.value(MetricName::ServiceLevel), 50.0);

    // no calls, no rates
    let quiet = engine.snapshot(Location::Plymouth);
    assert_eq!(quiet.kpis, LocationKpis::default());
}

#[tokio::test]
async fn test_agent_utilization_comes_from_todays_shifts() {
    let (engine, _db) = test_engine().await;
    let midnight = Utc.from_utc_datetime(&Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap());
    let at = |minutes| midnight + ChronoDuration::minutes(minutes);
    let status = |status: &str, when| agent_status("101", "Dana Reyes", "dana@practice.local", status, "wixom", when);

    engine.handle_event(&status("Available", at(60))).await.unwrap();
    engine.handle_event(&status("Busy", at(90))).await.unwrap();
    engine.handle_event(&call_completed("UT1", "wixom", at(100))).await.unwrap();
    engine.handle_event(&status("Away", at(120))).await.unwrap();

    let metrics = engine.snapshot(Location::Wixom);
    assert_eq!(metrics.kpis.agent_utilization, 7.78);
    assert_eq!(engine.snapshot(Location::Plymouth).kpis.agent_utilization, 0.0);
}

#[tokio::test]
async fn test_live_metrics_include_overall_totals() {
    let (engine, _db) = test_engine().await;
    engine.handle_event(&call_started("O1", "wixom", minutes_ago(1))).await.unwrap();
    engine.handle_event(&call_started("O2", "plymouth", minutes_ago(1))).await.unwrap();
    engine.handle_event(&call_completed("O3", "aa", minutes_ago(2))).await.unwrap();
    engine.warm_up().await;

    let all = engine.live_metrics(&SubscriptionScope::all());
    assert_eq!(all.locations.len(), 3);
    assert_eq!(all.overall.active_calls, 2);
    assert_eq!(all.overall.queue_length, 2);
    assert_eq!(all.overall.calls_last_hour, 1);
    assert_eq!(all.overall.kpis.service_level, 100.0);
    assert!(all.overall.updated_at.is_some());

    let wixom = engine.live_metrics(&SubscriptionScope::for_locations([Location::Wixom]));
    assert_eq!(wixom.locations.len(), 1);
    assert_eq!(wixom.overall.active_calls, 1);
    assert_eq!(wixom.overall.calls_last_hour, 0);
}

#[tokio::test]
async fn test_agent_counts_by_status() {
    let (engine, _db) = test_engine().await;
    let at = minutes_ago(1);
    engine
        .handle_event(&agent_status("101", "Dana Reyes", "dana@practice.local", "Available", "wixom", at))
        .await
        .unwrap();
    engine
        .handle_event(&agent_status("102", "Sam Lee", "sam@practice.local", "Busy", "wixom", at))
        .await
        .unwrap();
    engine
        .handle_event(&agent_status("103", "Kim Park", "kim@practice.local", "Away", "wixom", at))
        .await
        .unwrap();
    engine
        .handle_event(&agent_status("104", "Ola Berg", "ola@practice.local", "Offline", "wixom", at))
        .await
        .unwrap();

    let metrics = engine.snapshot(Location::Wixom);
    assert_eq!(metrics.available_agents, 1);
    assert_eq!(metrics.busy_agents, 1);
    assert_eq!(metrics.away_agents, 1);
}

#[tokio::test]
async fn test_failed_location_keeps_previous_snapshot() {
    let db = DatabaseManager::new_in_memory().await.unwrap();
    let healthy = MetricsStore::new(Arc::new(db.clone()));
    let first = healthy.recompute(Location::Plymouth).await.unwrap();
    assert!(first.updated_at.is_some());

    let store = FailingLocationStore {
        inner: db,
        broken: Location::Plymouth,
    };
    let metrics = MetricsStore::new(Arc::new(store));
    let report = metrics.recompute_all().await;

    assert_eq!(report.updated.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].location, Location::Plymouth);
    assert!(!report.is_complete());

    // never computed, so still the empty snapshot
    assert!(metrics.get(Location::Plymouth).updated_at.is_none());
    assert!(metrics.get(Location::Wixom).updated_at.is_some());
}

#[tokio::test]
async fn test_alerts_repeat_on_every_evaluation() {
    let db = DatabaseManager::new_in_memory().await.unwrap();
    let metrics = Arc::new(MetricsStore::new(Arc::new(db.clone())));
    let rule = AlertRule::new(MetricName::AvailableAgents, Comparison::Lt, 1.0, Severity::Critical)
        .with_id("nobody_free")
        .for_location(Location::Wixom);
    let alerts = AlertEngine::new(vec![rule], metrics.clone()).with_history(Arc::new(db.clone()));

    // nothing computed yet
    assert!(alerts.evaluate(Location::Wixom).await.is_empty());

    metrics.recompute_all().await;
    let first = alerts.evaluate(Location::Wixom).await;
    let second = alerts.evaluate(Location::Wixom).await;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].rule_ref, "nobody_free");
    assert_eq!(first[0].observed_value, 0.0);

    assert!(alerts.evaluate(Location::Plymouth).await.is_empty());
    assert_eq!(db.alert_history_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_agent_scoped_rule_needs_agent_context() {
    let (engine, _db) = test_engine().await;
    let rule = AlertRule::new(MetricName::BusyAgents, Comparison::Gt, 0.0, Severity::Warning)
        .for_agent("Dana@Practice.Local");
    let alerts = AlertEngine::new(vec![rule], engine.metrics().clone());

    engine
        .handle_event(&agent_status("101", "Dana Reyes", "dana@practice.local", "Busy", "wixom", minutes_ago(1)))
        .await
        .unwrap();

    assert!(alerts.evaluate(Location::Wixom).await.is_empty());
    let raised = alerts.evaluate_for_agent(Location::Wixom, "dana@practice.local").await;
    assert_eq!(raised.len(), 1);
    assert!(alerts
        .evaluate_for_agent(Location::Wixom, "sam@practice.local")
        .await
        .is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_active_calls_are_started_minus_ended(stages in proptest::collection::vec(0u8..3, 0..12)) {
        let (active, queued) = tokio_test::block_on(async {
            let (engine, _db) = test_engine().await;
            let started = minutes_ago(2);
            for (i, stage) in stages.iter().enumerate() {
                let id = format!("P{}", i);
                engine.handle_event(&call_started(&id, "ply", started)).await.unwrap();
                match stage {
                    1 => {
                        engine
                            .handle_event(&call_answered(&id, "ply", started, started + ChronoDuration::seconds(5)))
                            .await
                            .unwrap();
                    }
                    2 => {
                        engine.handle_event(&call_completed(&id, "ply", minutes_ago(1))).await.unwrap();
                    }
                    _ => {}
                }
            }
            let metrics = engine.metrics().recompute(Location::Plymouth).await.unwrap();
            (metrics.active_calls, metrics.queue_length)
        });

        let ended = stages.iter().filter(|s| **s == 2).count() as i64;
        let ringing = stages.iter().filter(|s| **s == 0).count() as i64;
        prop_assert_eq!(active, stages.len() as i64 - ended);
        prop_assert_eq!(queued, ringing);
    }
}
