//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callwatch_call_telemetry::broadcast::{DeliveryError, HubMessage, SubscriberConnection};
use callwatch_call_telemetry::config::TelemetryConfig;
use callwatch_call_telemetry::database::DatabaseManager;
use callwatch_call_telemetry::engine::TelemetryEngine;
use callwatch_call_telemetry::normalizer::{AgentStatusPayload, CdrPayload};
use callwatch_call_telemetry::provider::{CdrQuery, TelephonyProvider};
use callwatch_call_telemetry::{Location, Result, TelemetryError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Engine over a fresh in-memory database; the returned manager shares the
/// same pool so tests can inspect what was written
pub async fn engine_with(
    config: TelemetryConfig,
    provider: Option<Arc<dyn TelephonyProvider>>,
) -> (Arc<TelemetryEngine>, DatabaseManager) {
    let db = DatabaseManager::new_in_memory()
        .await
        .expect("in-memory database");
    let engine = TelemetryEngine::new(config, Arc::new(db.clone()), provider);
    (Arc::new(engine), db)
}

pub async fn test_engine() -> (Arc<TelemetryEngine>, DatabaseManager) {
    engine_with(TelemetryConfig::for_testing(), None).await
}

pub async fn engine_with_provider(
    config: TelemetryConfig,
    provider: Arc<FakeProvider>,
) -> (Arc<TelemetryEngine>, DatabaseManager) {
    let provider: Arc<dyn TelephonyProvider> = provider;
    engine_with(config, Some(provider)).await
}

pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(minutes)
}

pub fn webhook(event_type: &str, data: Value) -> Value {
    json!({
        "event_type": event_type,
        "timestamp": rfc3339(Utc::now()),
        "data": data
    })
}

pub fn call_started(call_id: &str, queue: &str, at: DateTime<Utc>) -> Value {
    webhook(
        "call_started",
        json!({
            "CallId": call_id,
            "StartTime": rfc3339(at),
            "CallerNumber": "7345550100",
            "CalledNumber": "100",
            "QueueName": queue
        }),
    )
}

pub fn call_answered(call_id: &str, queue: &str, started: DateTime<Utc>, answered: DateTime<Utc>) -> Value {
    webhook(
        "call_answered",
        json!({
            "CallId": call_id,
            "StartTime": rfc3339(started),
            "AnswerTime": rfc3339(answered),
            "CallerNumber": "7345550100",
            "CalledNumber": "101",
            "AgentExtension": "101",
            "AgentName": "Dana Reyes",
            "QueueName": queue
        }),
    )
}

pub fn completed_data(call_id: &str, queue: &str, ended: DateTime<Utc>) -> Value {
    let started = ended - ChronoDuration::seconds(300);
    json!({
        "CallId": call_id,
        "CallType": "Inbound",
        "StartTime": rfc3339(started),
        "AnswerTime": rfc3339(started + ChronoDuration::seconds(20)),
        "EndTime": rfc3339(ended),
        "CallerNumber": "7345550100",
        "CalledNumber": "101",
        "AgentExtension": "101",
        "AgentName": "Dana Reyes",
        "Duration": 300,
        "TalkDuration": 280,
        "HoldDuration": 0,
        "QueueName": queue,
        "CallResult": "answered"
    })
}

pub fn call_completed(call_id: &str, queue: &str, ended: DateTime<Utc>) -> Value {
    webhook("call_completed", completed_data(call_id, queue, ended))
}

pub fn agent_status_data(
    extension: &str,
    name: &str,
    email: &str,
    status: &str,
    location: &str,
    at: DateTime<Utc>,
) -> Value {
    json!({
        "Extension": extension,
        "Name": name,
        "Email": email,
        "Status": status,
        "Queue": "front-desk",
        "Location": location,
        "LastActivity": rfc3339(at)
    })
}

pub fn agent_status(
    extension: &str,
    name: &str,
    email: &str,
    status: &str,
    location: &str,
    at: DateTime<Utc>,
) -> Value {
    webhook(
        "agent_status_changed",
        agent_status_data(extension, name, email, status, location, at),
    )
}

/// Finished call as the CDR report returns it
pub fn cdr(call_id: &str, queue: &str, ended: DateTime<Utc>) -> CdrPayload {
    serde_json::from_value(completed_data(call_id, queue, ended)).expect("cdr payload")
}

pub fn agent_record(extension: &str, name: &str, email: &str, status: &str, location: &str) -> AgentStatusPayload {
    serde_json::from_value(agent_status_data(extension, name, email, status, location, Utc::now()))
        .expect("agent status payload")
}

/// Scripted provider: pages are served out of `records` by offset and limit
#[derive(Default)]
pub struct FakeProvider {
    records: Mutex<Vec<CdrPayload>>,
    agents: Mutex<Vec<AgentStatusPayload>>,
    delay: Mutex<Option<Duration>>,
    fail_with: Mutex<Option<String>>,
    panics: AtomicBool,
    page_requests: AtomicUsize,
    queries: Mutex<Vec<CdrQuery>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<CdrPayload>) -> Self {
        let provider = Self::default();
        *provider.records.lock() = records;
        provider
    }

    pub fn with_agents(agents: Vec<AgentStatusPayload>) -> Self {
        let provider = Self::default();
        *provider.agents.lock() = agents;
        provider
    }

    pub fn set_records(&self, records: Vec<CdrPayload>) {
        *self.records.lock() = records;
    }

    /// Every request sleeps this long before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_failure(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }

    /// Every request panics, as a buggy client would
    pub fn set_panic(&self) {
        self.panics.store(true, Ordering::SeqCst);
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<CdrQuery> {
        self.queries.lock().clone()
    }

    async fn pause_or_fail(&self) -> Result<()> {
        if self.panics.load(Ordering::SeqCst) {
            panic!("provider client bug");
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.fail_with.lock().clone();
        match failure {
            Some(message) => Err(TelemetryError::provider_unavailable(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TelephonyProvider for FakeProvider {
    async fn fetch_cdr_page(&self, query: &CdrQuery) -> Result<Vec<CdrPayload>> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        self.pause_or_fail().await?;

        let records = self.records.lock();
        Ok(records
            .iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_agent_statuses(&self, location: Option<Location>) -> Result<Vec<AgentStatusPayload>> {
        self.pause_or_fail().await?;
        let agents = self.agents.lock();
        Ok(agents
            .iter()
            .filter(|agent| match location {
                Some(location) => {
                    callwatch_call_telemetry::normalizer::lookup_location(&agent.location) == Some(location)
                }
                None => true,
            })
            .cloned()
            .collect())
    }
}

/// Live subscriber that keeps everything it is sent
#[derive(Default)]
pub struct RecordingConnection {
    received: Mutex<Vec<HubMessage>>,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<HubMessage> {
        self.received.lock().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.received.lock().iter().map(|m| m.message_type()).collect()
    }

    pub fn count_of(&self, message_type: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|m| m.message_type() == message_type)
            .count()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

#[async_trait]
impl SubscriberConnection for RecordingConnection {
    async fn send(&self, message: &HubMessage) -> std::result::Result<(), DeliveryError> {
        self.received.lock().push(message.clone());
        Ok(())
    }
}

/// Subscriber whose transport is gone
pub struct ClosedConnection;

#[async_trait]
impl SubscriberConnection for ClosedConnection {
    async fn send(&self, _message: &HubMessage) -> std::result::Result<(), DeliveryError> {
        Err(DeliveryError::Closed)
    }
}

/// Subscriber that accepts the first `allowed` messages and then fails
pub struct FlakyConnection {
    allowed: usize,
    sent: AtomicUsize,
}

impl FlakyConnection {
    pub fn new(allowed: usize) -> Arc<Self> {
        Arc::new(Self {
            allowed,
            sent: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SubscriberConnection for FlakyConnection {
    async fn send(&self, _message: &HubMessage) -> std::result::Result<(), DeliveryError> {
        if self.sent.fetch_add(1, Ordering::SeqCst) < self.allowed {
            Ok(())
        } else {
            Err(DeliveryError::Transport("connection reset".to_string()))
        }
    }
}
