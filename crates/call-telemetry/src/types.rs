//! # Telemetry Data Model
//!
//! Canonical types shared by every component: call lifecycle events, agent
//! presence, the derived per-location metrics snapshot, and sync job records.
//!
//! Enums that are persisted expose `as_str`/`from_str` pairs so the relational
//! store keeps plain TEXT columns, the same way the rest of the crate stores
//! status values.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TelemetryError};

/// Physical practice site. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Location {
    #[default]
    #[serde(rename = "Ann Arbor", alias = "ann_arbor", alias = "annarbor")]
    AnnArbor,
    #[serde(rename = "Wixom", alias = "wixom")]
    Wixom,
    #[serde(rename = "Plymouth", alias = "plymouth")]
    Plymouth,
}

impl Location {
    pub const ALL: [Location; 3] = [Location::AnnArbor, Location::Wixom, Location::Plymouth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Location::AnnArbor => "Ann Arbor",
            Location::Wixom => "Wixom",
            Location::Plymouth => "Plymouth",
        }
    }

    /// Parse a canonical (stored) location name
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Ann Arbor" => Some(Location::AnnArbor),
            "Wixom" => Some(Location::Wixom),
            "Plymouth" => Some(Location::Plymouth),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage of a call event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    Started,
    Answered,
    Ended,
}

impl CallEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallEventKind::Started => "started",
            CallEventKind::Answered => "answered",
            CallEventKind::Ended => "ended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "started" => Some(CallEventKind::Started),
            "answered" => Some(CallEventKind::Answered),
            "ended" => Some(CallEventKind::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for CallEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(CallDirection::Inbound),
            "outbound" => Some(CallDirection::Outbound),
            _ => None,
        }
    }
}

/// Call status as seen at the moment the event was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    InProgress,
    Completed,
    Missed,
    Abandoned,
    Transferred,
    Voicemail,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Missed => "missed",
            CallStatus::Abandoned => "abandoned",
            CallStatus::Transferred => "transferred",
            CallStatus::Voicemail => "voicemail",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(CallStatus::Ringing),
            "in_progress" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "missed" => Some(CallStatus::Missed),
            "abandoned" => Some(CallStatus::Abandoned),
            "transferred" => Some(CallStatus::Transferred),
            "voicemail" => Some(CallStatus::Voicemail),
            _ => None,
        }
    }
}

/// Business category inferred from the provider call type and queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCategory {
    Appointment,
    Prescription,
    Billing,
    FollowUp,
    General,
}

impl CallCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallCategory::Appointment => "appointment",
            CallCategory::Prescription => "prescription",
            CallCategory::Billing => "billing",
            CallCategory::FollowUp => "follow_up",
            CallCategory::General => "general",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "appointment" => Some(CallCategory::Appointment),
            "prescription" => Some(CallCategory::Prescription),
            "billing" => Some(CallCategory::Billing),
            "follow_up" => Some(CallCategory::FollowUp),
            "general" => Some(CallCategory::General),
            _ => None,
        }
    }
}

/// One recorded stage of a call. Immutable once stored; unique per
/// `(provider_call_id, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub provider_call_id: String,
    pub kind: CallEventKind,
    pub location: Location,
    /// Absent for calls that have not reached an agent yet
    pub agent_identity: Option<String>,
    pub agent_extension: Option<String>,
    pub agent_name: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub category: CallCategory,
    pub queue_name: String,
    pub caller_number: String,
    pub called_number: String,
    pub timestamp: DateTime<Utc>,
    pub talk_seconds: Option<i64>,
    pub ring_seconds: Option<i64>,
    pub hold_seconds: Option<i64>,
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    Busy,
    Away,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::Away => "away",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AgentStatus::Available),
            "busy" => Some(AgentStatus::Busy),
            "away" => Some(AgentStatus::Away),
            "offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }
}

/// Current presence of one agent; last write wins by `last_changed_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPresence {
    pub agent_identity: String,
    pub agent_name: String,
    pub extension: String,
    pub location: Location,
    pub status: AgentStatus,
    pub queue_name: String,
    pub current_call_id: Option<String>,
    pub last_changed_at: DateTime<Utc>,
}

/// Metric names alert rules can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    ActiveCalls,
    AvailableAgents,
    BusyAgents,
    AwayAgents,
    QueueLength,
    AvgWaitSeconds,
    CallsLastHour,
    ServiceLevel,
    AbandonmentRate,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ActiveCalls => "active_calls",
            MetricName::AvailableAgents => "available_agents",
            MetricName::BusyAgents => "busy_agents",
            MetricName::AwayAgents => "away_agents",
            MetricName::QueueLength => "queue_length",
            MetricName::AvgWaitSeconds => "avg_wait_seconds",
            MetricName::CallsLastHour => "calls_last_hour",
            MetricName::ServiceLevel => "service_level",
            MetricName::AbandonmentRate => "abandonment_rate",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling one-hour KPIs over the calls that ended in the window
///
/// Percentages are 0..=100 with two decimals; a window with no calls
/// reports zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationKpis {
    /// Share of ended calls answered within [`SERVICE_LEVEL_SECONDS`]
    pub service_level: f64,
    pub abandonment_rate: f64,
    pub average_call_duration_seconds: i64,
    pub calls_per_minute: f64,
    /// Mean of today's per-agent utilization at the location
    pub agent_utilization: f64,
}

/// Ring time under which an answered call counts toward service level
pub const SERVICE_LEVEL_SECONDS: i64 = 30;

/// Derived operational metrics for one location. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMetrics {
    pub location: Location,
    pub active_calls: i64,
    pub available_agents: i64,
    pub busy_agents: i64,
    pub away_agents: i64,
    pub queue_length: i64,
    pub avg_wait_seconds: i64,
    pub calls_last_hour: i64,
    pub kpis: LocationKpis,
    /// `None` until the first successful aggregation
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocationMetrics {
    pub fn empty(location: Location) -> Self {
        Self {
            location,
            active_calls: 0,
            available_agents: 0,
            busy_agents: 0,
            away_agents: 0,
            queue_length: 0,
            avg_wait_seconds: 0,
            calls_last_hour: 0,
            kpis: LocationKpis::default(),
            updated_at: None,
        }
    }

    pub fn value(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::ActiveCalls => self.active_calls as f64,
            MetricName::AvailableAgents => self.available_agents as f64,
            MetricName::BusyAgents => self.busy_agents as f64,
            MetricName::AwayAgents => self.away_agents as f64,
            MetricName::QueueLength => self.queue_length as f64,
            MetricName::AvgWaitSeconds => self.avg_wait_seconds as f64,
            MetricName::CallsLastHour => self.calls_last_hour as f64,
            MetricName::ServiceLevel => self.kpis.service_level,
            MetricName::AbandonmentRate => self.kpis.abandonment_rate,
        }
    }

    fn staffed_agents(&self) -> i64 {
        self.available_agents + self.busy_agents + self.away_agents
    }
}

/// Totals across a set of locations
///
/// Counts are summed. Averages and rates are weighted by what they average
/// over: wait by queued calls, call KPIs by calls in the last hour,
/// utilization by staffed agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    pub active_calls: i64,
    pub available_agents: i64,
    pub busy_agents: i64,
    pub away_agents: i64,
    pub queue_length: i64,
    pub avg_wait_seconds: i64,
    pub calls_last_hour: i64,
    pub kpis: LocationKpis,
    /// Oldest `updated_at` among the locations, `None` if any is uncomputed
    pub updated_at: Option<DateTime<Utc>>,
}

impl OverallMetrics {
    pub fn from_locations(locations: &[LocationMetrics]) -> Self {
        let mut overall = OverallMetrics::default();
        if locations.is_empty() {
            return overall;
        }

        let mut wait_total = 0.0;
        let mut service_total = 0.0;
        let mut abandoned_total = 0.0;
        let mut duration_total = 0.0;
        let mut utilization_total = 0.0;
        let mut staffed = 0;

        for m in locations {
            overall.active_calls += m.active_calls;
            overall.available_agents += m.available_agents;
            overall.busy_agents += m.busy_agents;
            overall.away_agents += m.away_agents;
            overall.queue_length += m.queue_length;
            overall.calls_last_hour += m.calls_last_hour;
            overall.kpis.calls_per_minute += m.kpis.calls_per_minute;

            wait_total += (m.avg_wait_seconds * m.queue_length) as f64;
            let calls = m.calls_last_hour as f64;
            service_total += m.kpis.service_level * calls;
            abandoned_total += m.kpis.abandonment_rate * calls;
            duration_total += m.kpis.average_call_duration_seconds as f64 * calls;
            utilization_total += m.kpis.agent_utilization * m.staffed_agents() as f64;
            staffed += m.staffed_agents();
        }

        if overall.queue_length > 0 {
            overall.avg_wait_seconds = (wait_total / overall.queue_length as f64).round() as i64;
        }
        if overall.calls_last_hour > 0 {
            let calls = overall.calls_last_hour as f64;
            overall.kpis.service_level = round2(service_total / calls);
            overall.kpis.abandonment_rate = round2(abandoned_total / calls);
            overall.kpis.average_call_duration_seconds = (duration_total / calls).round() as i64;
        }
        if staffed > 0 {
            overall.kpis.agent_utilization = round2(utilization_total / staffed as f64);
        }
        overall.kpis.calls_per_minute = round2(overall.kpis.calls_per_minute);

        overall.updated_at = locations
            .iter()
            .map(|m| m.updated_at)
            .collect::<Option<Vec<_>>>()
            .and_then(|stamps| stamps.into_iter().min());
        overall
    }
}

/// Round to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Overall totals plus the per-location snapshots they were built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    pub overall: OverallMetrics,
    pub locations: Vec<LocationMetrics>,
}

impl LiveMetrics {
    pub fn new(locations: Vec<LocationMetrics>) -> Self {
        Self {
            overall: OverallMetrics::from_locations(&locations),
            locations,
        }
    }
}

/// Alert severity, ordered `Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// Historical call detail records
    Cdr,
    /// Current agent statuses
    AgentStatus,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Cdr => "cdr",
            SyncKind::AgentStatus => "agent_status",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cdr" => Some(SyncKind::Cdr),
            "agent_status" => Some(SyncKind::AgentStatus),
            _ => None,
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync job state machine: `Running -> {Completed, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, counting both ends
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Reject inverted ranges, ranges starting after `today`, and ranges
    /// spanning more than `max_days`
    pub fn validate(&self, today: NaiveDate, max_days: i64) -> Result<()> {
        if self.start > self.end {
            return Err(TelemetryError::invalid_input(
                "start_date must be on or before end_date",
            ));
        }
        if self.start > today {
            return Err(TelemetryError::invalid_input(
                "start_date cannot be in the future",
            ));
        }
        if self.days() > max_days {
            return Err(TelemetryError::invalid_input(format!(
                "date range cannot exceed {} days",
                max_days
            )));
        }
        Ok(())
    }
}

/// Durable record of one sync run; the only source of truth for "is a sync
/// in progress"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub kind: SyncKind,
    /// Only CDR jobs carry a range
    pub date_range: Option<DateRange>,
    pub location: Option<Location>,
    pub batch_size: u32,
    pub status: SyncStatus,
    pub fetched: u64,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub error_message: Option<String>,
    pub initiated_by: String,
    pub override_running: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn start(
        kind: SyncKind,
        date_range: Option<DateRange>,
        location: Option<Location>,
        batch_size: u32,
        initiated_by: impl Into<String>,
        override_running: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            date_range,
            location,
            batch_size,
            status: SyncStatus::Running,
            fetched: 0,
            processed: 0,
            skipped: 0,
            errors: 0,
            error_message: None,
            initiated_by: initiated_by.into(),
            override_running,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = SyncStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        let mut all = vec![Severity::Warning, Severity::Critical, Severity::Info];
        all.sort_by(|a, b| b.cmp(a));
        assert_eq!(all, vec![Severity::Critical, Severity::Warning, Severity::Info]);
    }

    #[test]
    fn test_location_round_trip_through_storage_names() {
        for location in Location::ALL {
            assert_eq!(Location::from_str(location.as_str()), Some(location));
        }
        assert_eq!(Location::from_str("wixom"), None);
    }

    #[test]
    fn test_location_serde_uses_display_names() {
        let json = serde_json::to_string(&Location::AnnArbor).unwrap();
        assert_eq!(json, "\"Ann Arbor\"");
        let parsed: Location = serde_json::from_str("\"wixom\"").unwrap();
        assert_eq!(parsed, Location::Wixom);
    }

    #[test]
    fn test_date_range_validation() {
        let today = date("2024-06-30");
        assert!(DateRange::new(date("2024-06-01"), date("2024-06-30"))
            .validate(today, 90)
            .is_ok());
        assert!(DateRange::new(date("2024-06-10"), date("2024-06-01"))
            .validate(today, 90)
            .is_err());
        assert!(DateRange::new(date("2024-07-01"), date("2024-07-02"))
            .validate(today, 90)
            .is_err());
        // 91 days inclusive
        assert!(DateRange::new(date("2024-01-01"), date("2024-03-31"))
            .validate(today, 90)
            .is_err());
    }

    #[test]
    fn test_metric_values() {
        let mut m = LocationMetrics::empty(Location::Wixom);
        m.queue_length = 6;
        m.available_agents = 0;
        assert_eq!(m.value(MetricName::QueueLength), 6.0);
        assert_eq!(m.value(MetricName::AvailableAgents), 0.0);
        assert!(m.updated_at.is_none());
    }

    #[test]
    fn test_overall_metrics_weight_rates() {
        let now = Utc::now();
        let mut wixom = LocationMetrics::empty(Location::Wixom);
        wixom.queue_length = 3;
        wixom.avg_wait_seconds = 60;
        wixom.calls_last_hour = 30;
        wixom.available_agents = 2;
        wixom.kpis.service_level = 90.0;
        wixom.kpis.abandonment_rate = 10.0;
        wixom.kpis.calls_per_minute = 0.5;
        wixom.kpis.agent_utilization = 50.0;
        wixom.updated_at = Some(now);

        let mut plymouth = LocationMetrics::empty(Location::Plymouth);
        plymouth.queue_length = 1;
        plymouth.avg_wait_seconds = 20;
        plymouth.calls_last_hour = 10;
        plymouth.busy_agents = 2;
        plymouth.kpis.service_level = 50.0;
        plymouth.kpis.calls_per_minute = 0.17;
        plymouth.kpis.agent_utilization = 70.0;
        plymouth.updated_at = Some(now - chrono::Duration::seconds(5));

        let live = LiveMetrics::new(vec![wixom, plymouth.clone()]);
        let overall = &live.overall;
        assert_eq!(overall.queue_length, 4);
        assert_eq!(overall.avg_wait_seconds, 50);
        assert_eq!(overall.calls_last_hour, 40);
        assert_eq!(overall.kpis.service_level, 80.0);
        assert_eq!(overall.kpis.abandonment_rate, 7.5);
        assert_eq!(overall.kpis.calls_per_minute, 0.67);
        assert_eq!(overall.kpis.agent_utilization, 60.0);
        assert_eq!(overall.updated_at, plymouth.updated_at);

        let partial = OverallMetrics::from_locations(&[plymouth, LocationMetrics::empty(Location::AnnArbor)]);
        assert!(partial.updated_at.is_none());
        assert_eq!(OverallMetrics::from_locations(&[]), OverallMetrics::default());
    }

    #[test]
    fn test_sync_job_transitions() {
        let mut job = SyncJob::start(SyncKind::Cdr, None, None, 100, "tester", false);
        assert_eq!(job.status, SyncStatus::Running);
        assert!(!job.status.is_terminal());
        job.fail("provider down");
        assert_eq!(job.status, SyncStatus::Failed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.error_message.as_deref(), Some("provider down"));
    }
}
