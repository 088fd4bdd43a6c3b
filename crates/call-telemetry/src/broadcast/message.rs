use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::AlertEvent;
use crate::types::{AgentPresence, CallEvent, Location, LocationMetrics, Severity};

/// Payload of a hub message; serialized as `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubPayload {
    /// Full state sent once when a subscriber connects
    Snapshot(Vec<LocationMetrics>),
    MetricsUpdate(LocationMetrics),
    Alert(AlertEvent),
    CallActivity(CallEvent),
    AgentStatus(AgentPresence),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(flatten)]
    pub payload: HubPayload,
    pub timestamp: DateTime<Utc>,
}

impl HubMessage {
    pub fn new(payload: HubPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn snapshot(metrics: Vec<LocationMetrics>) -> Self {
        Self::new(HubPayload::Snapshot(metrics))
    }

    pub fn metrics_update(metrics: LocationMetrics) -> Self {
        Self::new(HubPayload::MetricsUpdate(metrics))
    }

    pub fn alert(alert: AlertEvent) -> Self {
        Self::new(HubPayload::Alert(alert))
    }

    pub fn call_activity(event: CallEvent) -> Self {
        Self::new(HubPayload::CallActivity(event))
    }

    pub fn agent_status(presence: AgentPresence) -> Self {
        Self::new(HubPayload::AgentStatus(presence))
    }

    pub fn message_type(&self) -> &'static str {
        match self.payload {
            HubPayload::Snapshot(_) => "snapshot",
            HubPayload::MetricsUpdate(_) => "metrics_update",
            HubPayload::Alert(_) => "alert",
            HubPayload::CallActivity(_) => "call_activity",
            HubPayload::AgentStatus(_) => "agent_status",
        }
    }

    /// Location the message is about; snapshots span several
    pub fn location(&self) -> Option<Location> {
        match &self.payload {
            HubPayload::Snapshot(_) => None,
            HubPayload::MetricsUpdate(m) => Some(m.location),
            HubPayload::Alert(a) => Some(a.location),
            HubPayload::CallActivity(e) => Some(e.location),
            HubPayload::AgentStatus(p) => Some(p.location),
        }
    }

    /// Alerts carry their rule severity, everything else is informational
    pub fn severity(&self) -> Severity {
        match &self.payload {
            HubPayload::Alert(a) => a.severity,
            _ => Severity::Info,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let mut metrics = LocationMetrics::empty(Location::Wixom);
        metrics.queue_length = 3;
        let message = HubMessage::metrics_update(metrics);

        let json: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "metrics_update");
        assert_eq!(json["data"]["location"], "Wixom");
        assert_eq!(json["data"]["queue_length"], 3);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_snapshot_has_no_location() {
        let message = HubMessage::snapshot(vec![LocationMetrics::empty(Location::AnnArbor)]);
        assert_eq!(message.location(), None);
        assert_eq!(message.severity(), Severity::Info);
        assert_eq!(message.message_type(), "snapshot");
    }
}
