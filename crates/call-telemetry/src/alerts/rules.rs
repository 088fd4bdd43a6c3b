use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Location, MetricName, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Lt,
    Eq,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gt => "gt",
            Comparison::Lt => "lt",
            Comparison::Eq => "eq",
        }
    }

    /// Plain numeric comparison, no epsilon
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => observed > threshold,
            Comparison::Lt => observed < threshold,
            Comparison::Eq => observed == threshold,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static threshold rule loaded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "metric_name")]
    pub metric: MetricName,
    pub comparison: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    /// Restrict the rule to one location
    #[serde(default)]
    pub location: Option<Location>,
    /// Restrict the rule to one agent; only evaluated with a matching agent context
    #[serde(default)]
    pub agent_identity: Option<String>,
}

impl AlertRule {
    pub fn new(metric: MetricName, comparison: Comparison, threshold: f64, severity: Severity) -> Self {
        Self {
            id: None,
            metric,
            comparison,
            threshold,
            severity,
            location: None,
            agent_identity: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn for_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn for_agent(mut self, agent_identity: impl Into<String>) -> Self {
        self.agent_identity = Some(agent_identity.into());
        self
    }

    /// Explicit id, or `<metric>_<comparison>_<threshold>`
    pub fn rule_ref(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}_{}_{}", self.metric, self.comparison, self.threshold),
        }
    }
}

/// Rules used when configuration supplies none
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(MetricName::QueueLength, Comparison::Gt, 5.0, Severity::Warning)
            .with_id("high_queue_length"),
        AlertRule::new(MetricName::QueueLength, Comparison::Gt, 10.0, Severity::Critical)
            .with_id("critical_queue_length"),
        AlertRule::new(MetricName::AvgWaitSeconds, Comparison::Gt, 120.0, Severity::Warning)
            .with_id("long_wait_time"),
        AlertRule::new(MetricName::AvgWaitSeconds, Comparison::Gt, 300.0, Severity::Critical)
            .with_id("critical_wait_time"),
        AlertRule::new(MetricName::AvailableAgents, Comparison::Lt, 1.0, Severity::Critical)
            .with_id("no_available_agents"),
    ]
}

/// A rule that held at evaluation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub rule_ref: String,
    pub metric: MetricName,
    pub comparison: Comparison,
    pub threshold: f64,
    pub observed_value: f64,
    pub location: Location,
    pub agent_identity: Option<String>,
    pub severity: Severity,
    pub raised_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn message(&self) -> String {
        format!(
            "{} at {}: {} is {} (threshold {} {})",
            self.severity.as_str().to_uppercase(),
            self.location,
            self.metric,
            self.observed_value,
            self.comparison,
            self.threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparisons_are_strict() {
        assert!(Comparison::Gt.holds(6.0, 5.0));
        assert!(!Comparison::Gt.holds(5.0, 5.0));
        assert!(Comparison::Lt.holds(0.0, 1.0));
        assert!(!Comparison::Lt.holds(1.0, 1.0));
        assert!(Comparison::Eq.holds(3.0, 3.0));
        assert!(!Comparison::Eq.holds(0.1 + 0.2, 0.3));
    }

    #[test]
    fn test_rule_ref_fallback() {
        let rule = AlertRule::new(MetricName::QueueLength, Comparison::Gt, 5.0, Severity::Warning);
        assert_eq!(rule.rule_ref(), "queue_length_gt_5");
        assert_eq!(rule.with_id("q").rule_ref(), "q");
    }

    #[test]
    fn test_rule_deserializes_from_config_shape() {
        let rule: AlertRule = serde_json::from_value(serde_json::json!({
            "metric_name": "available_agents",
            "comparison": "lt",
            "threshold": 1,
            "severity": "critical",
            "location": "Wixom"
        }))
        .unwrap();
        assert_eq!(rule.metric, MetricName::AvailableAgents);
        assert_eq!(rule.location, Some(Location::Wixom));
        assert!(rule.agent_identity.is_none());
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        assert_eq!(rules.len(), 5);
        assert!(rules
            .iter()
            .any(|r| r.metric == MetricName::AvailableAgents && r.severity == Severity::Critical));
    }
}
