//! # Alert Engine
//!
//! Evaluates a static list of [`AlertRule`]s against the latest
//! [`LocationMetrics`] snapshot of one location.
//!
//! Evaluation is stateless. A rule that holds on two consecutive evaluations
//! raises two alerts; consumers that want "newly firing" semantics must track
//! that themselves.
//!
//! Scoping rules:
//!
//! - a rule with a `location` only applies to that location
//! - a rule with an `agent_identity` only applies when evaluated with the same
//!   agent context ([`AlertEngine::evaluate_for_agent`])
//! - a snapshot that has never been computed (`updated_at == None`) raises
//!   nothing

mod rules;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::database::TelemetryStore;
use crate::metrics::MetricsStore;
use crate::types::{Location, LocationMetrics};

pub use rules::{default_rules, AlertEvent, AlertRule, Comparison};

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    metrics: Arc<MetricsStore>,
    history: Option<Arc<dyn TelemetryStore>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, metrics: Arc<MetricsStore>) -> Self {
        Self {
            rules,
            metrics,
            history: None,
        }
    }

    /// Persist every raised alert to the alert history table
    pub fn with_history(mut self, store: Arc<dyn TelemetryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Alerts raised by the current snapshot of `location`, most severe first
    pub async fn evaluate(&self, location: Location) -> Vec<AlertEvent> {
        let snapshot = self.metrics.get(location);
        self.raise(&snapshot, None).await
    }

    /// Same as [`evaluate`](Self::evaluate) with an agent context, so rules
    /// scoped to `agent_identity` also apply
    pub async fn evaluate_for_agent(&self, location: Location, agent_identity: &str) -> Vec<AlertEvent> {
        let snapshot = self.metrics.get(location);
        self.raise(&snapshot, Some(agent_identity)).await
    }

    /// Evaluate a snapshot the caller already holds and record what it raises
    ///
    /// Used right after a recompute so the alerts match the snapshot that was
    /// published, even if another recompute has replaced it since.
    pub async fn raise(&self, snapshot: &LocationMetrics, agent: Option<&str>) -> Vec<AlertEvent> {
        let alerts = self.evaluate_snapshot(snapshot, agent);
        self.persist(&alerts).await;
        alerts
    }

    /// Pure rule evaluation over a given snapshot
    pub fn evaluate_snapshot(&self, snapshot: &LocationMetrics, agent: Option<&str>) -> Vec<AlertEvent> {
        if snapshot.updated_at.is_none() {
            debug!(location = %snapshot.location, "skipping alert evaluation for uncomputed snapshot");
            return Vec::new();
        }

        let raised_at = Utc::now();
        let mut alerts: Vec<AlertEvent> = self
            .rules
            .iter()
            .filter(|rule| rule.location.map_or(true, |l| l == snapshot.location))
            .filter(|rule| match (&rule.agent_identity, agent) {
                (None, _) => true,
                (Some(scoped), Some(agent)) => scoped.eq_ignore_ascii_case(agent),
                (Some(_), None) => false,
            })
            .filter_map(|rule| {
                let observed = snapshot.value(rule.metric);
                rule.comparison.holds(observed, rule.threshold).then(|| AlertEvent {
                    rule_ref: rule.rule_ref(),
                    metric: rule.metric,
                    comparison: rule.comparison,
                    threshold: rule.threshold,
                    observed_value: observed,
                    location: snapshot.location,
                    agent_identity: rule.agent_identity.clone(),
                    severity: rule.severity,
                    raised_at,
                })
            })
            .collect();

        sort_by_severity(&mut alerts);
        alerts
    }

    async fn persist(&self, alerts: &[AlertEvent]) {
        let Some(store) = &self.history else {
            return;
        };
        for alert in alerts {
            if let Err(e) = store.insert_alert(alert).await {
                warn!(rule = %alert.rule_ref, location = %alert.location, error = %e, "failed to persist alert");
            }
        }
    }
}

/// Most severe first; stable for equal severities
pub fn sort_by_severity(alerts: &mut [AlertEvent]) {
    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
}
