use tracing::debug;

use super::{decode, from_millis, to_millis, DatabaseManager};
use crate::error::Result;
use crate::types::{CallCategory, CallDirection, CallEvent, CallEventKind, CallStatus, Location};

#[derive(sqlx::FromRow, Debug, Clone)]
struct CallEventRow {
    provider_call_id: String,
    kind: String,
    location: String,
    agent_identity: Option<String>,
    agent_extension: Option<String>,
    agent_name: Option<String>,
    direction: String,
    status: String,
    category: String,
    queue_name: String,
    caller_number: String,
    called_number: String,
    occurred_at: i64,
    talk_seconds: Option<i64>,
    ring_seconds: Option<i64>,
    hold_seconds: Option<i64>,
    recording_url: Option<String>,
}

impl CallEventRow {
    fn into_event(self) -> Result<CallEvent> {
        Ok(CallEvent {
            kind: decode("kind", &self.kind, CallEventKind::from_str)?,
            location: decode("location", &self.location, Location::from_str)?,
            direction: decode("direction", &self.direction, CallDirection::from_str)?,
            status: decode("status", &self.status, CallStatus::from_str)?,
            category: decode("category", &self.category, CallCategory::from_str)?,
            timestamp: from_millis(self.occurred_at)?,
            provider_call_id: self.provider_call_id,
            agent_identity: self.agent_identity,
            agent_extension: self.agent_extension,
            agent_name: self.agent_name,
            queue_name: self.queue_name,
            caller_number: self.caller_number,
            called_number: self.called_number,
            talk_seconds: self.talk_seconds,
            ring_seconds: self.ring_seconds,
            hold_seconds: self.hold_seconds,
            recording_url: self.recording_url,
        })
    }
}

impl DatabaseManager {
    pub(super) async fn call_exists(&self, provider_call_id: &str, kind: CallEventKind) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM call_events WHERE provider_call_id = ? AND kind = ? LIMIT 1",
        )
        .bind(provider_call_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub(super) async fn insert_call(&self, event: &CallEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO call_events (
                provider_call_id, kind, location, agent_identity, agent_extension, agent_name,
                direction, status, category, queue_name, caller_number, called_number,
                occurred_at, talk_seconds, ring_seconds, hold_seconds, recording_url, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (provider_call_id, kind) DO NOTHING
            "#,
        )
        .bind(&event.provider_call_id)
        .bind(event.kind.as_str())
        .bind(event.location.as_str())
        .bind(&event.agent_identity)
        .bind(&event.agent_extension)
        .bind(&event.agent_name)
        .bind(event.direction.as_str())
        .bind(event.status.as_str())
        .bind(event.category.as_str())
        .bind(&event.queue_name)
        .bind(&event.caller_number)
        .bind(&event.called_number)
        .bind(to_millis(event.timestamp))
        .bind(event.talk_seconds)
        .bind(event.ring_seconds)
        .bind(event.hold_seconds)
        .bind(&event.recording_url)
        .bind(to_millis(chrono::Utc::now()))
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(
            call_id = %event.provider_call_id,
            kind = %event.kind,
            inserted,
            "call event write"
        );
        Ok(inserted)
    }

    /// Every stored stage of one call, oldest first
    pub async fn call_events_for(&self, provider_call_id: &str) -> Result<Vec<CallEvent>> {
        let rows: Vec<CallEventRow> = sqlx::query_as(
            r#"
            SELECT provider_call_id, kind, location, agent_identity, agent_extension, agent_name,
                   direction, status, category, queue_name, caller_number, called_number,
                   occurred_at, talk_seconds, ring_seconds, hold_seconds, recording_url
            FROM call_events
            WHERE provider_call_id = ?
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(provider_call_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CallEventRow::into_event).collect()
    }

    pub async fn call_event_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM call_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
