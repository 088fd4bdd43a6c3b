use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{decode, from_millis, to_millis, DatabaseManager};
use crate::error::Result;
use crate::types::{AgentPresence, AgentStatus, CallEvent, Location};

/// One entry of the append-only event log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// `call_started`, `call_answered`, `call_ended` or `agent_status_changed`
    pub event_type: String,
    pub location: Location,
    pub provider_call_id: Option<String>,
    pub agent_identity: Option<String>,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn call(event: &CallEvent) -> Result<Self> {
        Ok(Self {
            event_type: format!("call_{}", event.kind.as_str()),
            location: event.location,
            provider_call_id: Some(event.provider_call_id.clone()),
            agent_identity: event.agent_identity.clone(),
            payload: serde_json::to_value(event)?,
            occurred_at: event.timestamp,
            recorded_at: Utc::now(),
        })
    }

    pub fn presence(presence: &AgentPresence, previous_status: Option<AgentStatus>) -> Self {
        Self {
            event_type: "agent_status_changed".to_string(),
            location: presence.location,
            provider_call_id: presence.current_call_id.clone(),
            agent_identity: Some(presence.agent_identity.clone()),
            payload: json!({
                "old_status": previous_status.map(|s| s.as_str()),
                "new_status": presence.status.as_str(),
                "extension": presence.extension,
                "queue_name": presence.queue_name,
            }),
            occurred_at: presence.last_changed_at,
            recorded_at: Utc::now(),
        }
    }
}

impl DatabaseManager {
    pub(super) async fn insert_history(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO telemetry_events (
                event_type, location, provider_call_id, agent_identity,
                payload, occurred_at, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.event_type)
        .bind(entry.location.as_str())
        .bind(&entry.provider_call_id)
        .bind(&entry.agent_identity)
        .bind(serde_json::to_string(&entry.payload)?)
        .bind(to_millis(entry.occurred_at))
        .bind(to_millis(entry.recorded_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first, limited to the given locations
    pub(super) async fn load_history(&self, locations: &[Location], limit: u32) -> Result<Vec<HistoryEntry>> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT event_type, location, provider_call_id, agent_identity, payload, occurred_at, recorded_at \
             FROM telemetry_events WHERE location IN (",
        );
        let mut in_list = query.separated(", ");
        for location in locations {
            in_list.push_bind(location.as_str());
        }
        in_list.push_unseparated(") ORDER BY id DESC LIMIT ");
        query.push_bind(i64::from(limit));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<HistoryEntry> {
                let location: String = row.try_get("location")?;
                let payload: String = row.try_get("payload")?;
                Ok(HistoryEntry {
                    event_type: row.try_get("event_type")?,
                    location: decode("location", &location, Location::from_str)?,
                    provider_call_id: row.try_get("provider_call_id")?,
                    agent_identity: row.try_get("agent_identity")?,
                    payload: serde_json::from_str(&payload)?,
                    occurred_at: from_millis(row.try_get("occurred_at")?)?,
                    recorded_at: from_millis(row.try_get("recorded_at")?)?,
                })
            })
            .collect()
    }

    pub async fn history_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM telemetry_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
