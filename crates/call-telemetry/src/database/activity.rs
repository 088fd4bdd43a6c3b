use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{to_millis, DatabaseManager};
use crate::error::Result;
use crate::types::{AgentStatus, Location, SERVICE_LEVEL_SECONDS};

/// Raw aggregates for one location, read in one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationActivity {
    /// Started calls with no ended stage
    pub active_calls: i64,
    /// Started inside the ringing window, neither answered nor ended
    pub ringing_calls: i64,
    /// Mean age of the ringing calls, in seconds
    pub avg_ringing_seconds: Option<f64>,
    /// Ended stages in the last hour
    pub calls_last_hour: i64,
    /// Of those, answered within the service-level ring time
    pub answered_within_target: i64,
    pub abandoned_last_hour: i64,
    pub avg_talk_seconds: Option<f64>,
    /// Mean utilization of today's staffed shifts
    pub agent_utilization: Option<f64>,
    pub available_agents: i64,
    pub busy_agents: i64,
    pub away_agents: i64,
}

impl DatabaseManager {
    pub(super) async fn aggregate_activity(
        &self,
        location: Location,
        now: DateTime<Utc>,
        ringing_cutoff: Duration,
    ) -> Result<LocationActivity> {
        let now_ms = to_millis(now);
        let ringing_since = now_ms - ringing_cutoff.as_millis() as i64;
        let hour_ago = now_ms - 3_600_000;
        let loc = location.as_str();

        let mut tx = self.pool.begin().await?;

        let active_calls: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM call_events s
            WHERE s.location = ? AND s.kind = 'started'
              AND NOT EXISTS (
                  SELECT 1 FROM call_events e
                  WHERE e.provider_call_id = s.provider_call_id AND e.kind = 'ended'
              )
            "#,
        )
        .bind(loc)
        .fetch_one(&mut *tx)
        .await?;

        let ringing = sqlx::query(
            r#"
            SELECT COUNT(*) AS ringing, AVG(MAX(? - s.occurred_at, 0)) AS avg_age_ms
            FROM call_events s
            WHERE s.location = ? AND s.kind = 'started' AND s.occurred_at >= ?
              AND NOT EXISTS (
                  SELECT 1 FROM call_events e
                  WHERE e.provider_call_id = s.provider_call_id
                    AND e.kind IN ('answered', 'ended')
              )
            "#,
        )
        .bind(now_ms)
        .bind(loc)
        .bind(ringing_since)
        .fetch_one(&mut *tx)
        .await?;
        let ringing_calls: i64 = ringing.try_get("ringing")?;
        let avg_age_ms: Option<f64> = ringing.try_get("avg_age_ms")?;

        let ended = sqlx::query(
            r#"
            SELECT COUNT(*) AS ended,
                   SUM(CASE WHEN status IN ('completed', 'transferred')
                             AND COALESCE(ring_seconds, 0) <= ? THEN 1 ELSE 0 END) AS within_target,
                   SUM(CASE WHEN status = 'abandoned' THEN 1 ELSE 0 END) AS abandoned,
                   AVG(talk_seconds) AS avg_talk
            FROM call_events
            WHERE location = ? AND kind = 'ended' AND occurred_at >= ?
            "#,
        )
        .bind(SERVICE_LEVEL_SECONDS)
        .bind(loc)
        .bind(hour_ago)
        .fetch_one(&mut *tx)
        .await?;
        let calls_last_hour: i64 = ended.try_get("ended")?;
        let answered_within_target: Option<i64> = ended.try_get("within_target")?;
        let abandoned_last_hour: Option<i64> = ended.try_get("abandoned")?;
        let avg_talk_seconds: Option<f64> = ended.try_get("avg_talk")?;

        let agent_utilization: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(utilization_percentage) FROM agent_shifts
            WHERE location = ? AND shift_date = ? AND staffed_seconds > 0
            "#,
        )
        .bind(loc)
        .bind(now.date_naive().format("%Y-%m-%d").to_string())
        .fetch_one(&mut *tx)
        .await?;

        let presence_rows = sqlx::query(
            "SELECT status, COUNT(*) AS agents FROM agent_presence WHERE location = ? GROUP BY status",
        )
        .bind(loc)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut activity = LocationActivity {
            active_calls,
            ringing_calls,
            avg_ringing_seconds: avg_age_ms.map(|ms| ms / 1000.0),
            calls_last_hour,
            answered_within_target: answered_within_target.unwrap_or(0),
            abandoned_last_hour: abandoned_last_hour.unwrap_or(0),
            avg_talk_seconds,
            agent_utilization,
            ..Default::default()
        };

        for row in presence_rows {
            let status: String = row.try_get("status")?;
            let agents: i64 = row.try_get("agents")?;
            match AgentStatus::from_str(&status) {
                Some(AgentStatus::Available) => activity.available_agents = agents,
                Some(AgentStatus::Busy) => activity.busy_agents = agents,
                Some(AgentStatus::Away) => activity.away_agents = agents,
                Some(AgentStatus::Offline) | None => {}
            }
        }

        Ok(activity)
    }
}
