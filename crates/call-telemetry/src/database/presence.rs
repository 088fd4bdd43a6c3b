use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::{decode, from_millis, to_millis, DatabaseManager, PresenceWrite, ShiftCall};
use crate::error::Result;
use crate::types::{AgentPresence, AgentStatus, Location};

/// Daily totals for one agent
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct AgentShift {
    pub agent_identity: String,
    pub shift_date: String,
    pub calls_handled: i64,
    pub total_talk_seconds: i64,
    /// Time spent available or busy
    pub staffed_seconds: i64,
    pub calls_per_hour: f64,
    /// Talk time as a share of staffed time, capped at 100
    pub utilization_percentage: f64,
}

fn shift_day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Refresh the derived ratios of one shift row after its totals changed
async fn recalculate_shift_ratios(conn: &mut SqliteConnection, agent_identity: &str, shift_date: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE agent_shifts SET
            calls_per_hour = CASE WHEN staffed_seconds > 0
                THEN ROUND(calls_handled * 3600.0 / staffed_seconds, 2) ELSE 0 END,
            utilization_percentage = CASE WHEN staffed_seconds > 0
                THEN MIN(100.0, ROUND(total_talk_seconds * 100.0 / staffed_seconds, 2)) ELSE 0 END
        WHERE agent_identity = ? AND shift_date = ?
        "#,
    )
    .bind(agent_identity)
    .bind(shift_date)
    .execute(conn)
    .await?;
    Ok(())
}

impl DatabaseManager {
    pub(super) async fn upsert_presence(&self, presence: &AgentPresence) -> Result<PresenceWrite> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query(
            "SELECT location, status, last_changed_at FROM agent_presence WHERE agent_identity = ?",
        )
        .bind(&presence.agent_identity)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = match previous {
            Some(row) => {
                let location: String = row.try_get("location")?;
                let status: String = row.try_get("status")?;
                Some((
                    decode("location", &location, Location::from_str)?,
                    decode("status", &status, AgentStatus::from_str)?,
                    from_millis(row.try_get("last_changed_at")?)?,
                ))
            }
            None => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO agent_presence (
                agent_identity, agent_name, extension, location, status, queue_name,
                current_call_id, last_changed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (agent_identity) DO UPDATE SET
                agent_name = excluded.agent_name,
                extension = excluded.extension,
                location = excluded.location,
                status = excluded.status,
                queue_name = excluded.queue_name,
                current_call_id = excluded.current_call_id,
                last_changed_at = excluded.last_changed_at,
                updated_at = excluded.updated_at
            WHERE excluded.last_changed_at >= agent_presence.last_changed_at
            "#,
        )
        .bind(&presence.agent_identity)
        .bind(&presence.agent_name)
        .bind(&presence.extension)
        .bind(presence.location.as_str())
        .bind(presence.status.as_str())
        .bind(&presence.queue_name)
        .bind(&presence.current_call_id)
        .bind(to_millis(presence.last_changed_at))
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.commit().await?;
            debug!(agent = %presence.agent_identity, "stale presence update ignored");
            return Ok(PresenceWrite::Stale);
        }

        // close the interval the agent spent in the previous status
        if let Some((location, status, since)) = &previous {
            let staffed = (presence.last_changed_at - *since).num_seconds();
            if matches!(status, AgentStatus::Available | AgentStatus::Busy) && staffed > 0 {
                let day = shift_day(since.date_naive());
                sqlx::query(
                    r#"
                    INSERT INTO agent_shifts (
                        agent_identity, shift_date, extension, agent_name, location,
                        calls_handled, total_talk_seconds, staffed_seconds, updated_at
                    ) VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
                    ON CONFLICT (agent_identity, shift_date) DO UPDATE SET
                        staffed_seconds = agent_shifts.staffed_seconds + excluded.staffed_seconds,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&presence.agent_identity)
                .bind(&day)
                .bind(&presence.extension)
                .bind(&presence.agent_name)
                .bind(location.as_str())
                .bind(staffed)
                .bind(to_millis(Utc::now()))
                .execute(&mut *tx)
                .await?;
                recalculate_shift_ratios(&mut *tx, &presence.agent_identity, &day).await?;
            }
        }

        tx.commit().await?;

        Ok(PresenceWrite::Applied {
            previous_location: previous
                .as_ref()
                .map(|(location, _, _)| *location)
                .filter(|loc| *loc != presence.location),
            previous_status: previous.map(|(_, status, _)| status),
        })
    }

    pub(super) async fn lookup_agent_identity(&self, extension: &str, name: &str) -> Result<Option<String>> {
        let by_presence: Option<String> = sqlx::query_scalar(
            r#"
            SELECT agent_identity FROM agent_presence
            WHERE extension = ? OR lower(agent_name) = lower(?)
            ORDER BY (extension = ?) DESC, last_changed_at DESC
            LIMIT 1
            "#,
        )
        .bind(extension)
        .bind(name)
        .bind(extension)
        .fetch_optional(&self.pool)
        .await?;

        if by_presence.is_some() {
            return Ok(by_presence);
        }

        let by_shift: Option<String> = sqlx::query_scalar(
            r#"
            SELECT agent_identity FROM agent_shifts
            WHERE extension = ? OR lower(agent_name) = lower(?)
            ORDER BY (extension = ?) DESC, shift_date DESC
            LIMIT 1
            "#,
        )
        .bind(extension)
        .bind(name)
        .bind(extension)
        .fetch_optional(&self.pool)
        .await?;

        Ok(by_shift)
    }

    pub(super) async fn add_shift_call(&self, shift: &ShiftCall) -> Result<()> {
        let day = shift_day(shift.shift_date);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO agent_shifts (
                agent_identity, shift_date, extension, agent_name, location,
                calls_handled, total_talk_seconds, updated_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT (agent_identity, shift_date) DO UPDATE SET
                calls_handled = agent_shifts.calls_handled + 1,
                total_talk_seconds = agent_shifts.total_talk_seconds + excluded.total_talk_seconds,
                extension = COALESCE(excluded.extension, agent_shifts.extension),
                agent_name = COALESCE(excluded.agent_name, agent_shifts.agent_name),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&shift.agent_identity)
        .bind(&day)
        .bind(&shift.extension)
        .bind(&shift.agent_name)
        .bind(shift.location.as_str())
        .bind(shift.talk_seconds)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        recalculate_shift_ratios(&mut *tx, &shift.agent_identity, &day).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn agent_shift(&self, agent_identity: &str, shift_date: NaiveDate) -> Result<Option<AgentShift>> {
        let shift = sqlx::query_as::<_, AgentShift>(
            r#"
            SELECT agent_identity, shift_date, calls_handled, total_talk_seconds,
                   staffed_seconds, calls_per_hour, utilization_percentage
            FROM agent_shifts
            WHERE agent_identity = ? AND shift_date = ?
            "#,
        )
        .bind(agent_identity)
        .bind(shift_day(shift_date))
        .fetch_optional(&self.pool)
        .await?;
        Ok(shift)
    }

    pub async fn agent_presence(&self, agent_identity: &str) -> Result<Option<AgentPresence>> {
        let row = sqlx::query(
            r#"
            SELECT agent_identity, agent_name, extension, location, status, queue_name,
                   current_call_id, last_changed_at
            FROM agent_presence
            WHERE agent_identity = ?
            "#,
        )
        .bind(agent_identity)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let location: String = row.try_get("location")?;
        let status: String = row.try_get("status")?;
        Ok(Some(AgentPresence {
            agent_identity: row.try_get("agent_identity")?,
            agent_name: row.try_get("agent_name")?,
            extension: row.try_get("extension")?,
            location: decode("location", &location, Location::from_str)?,
            status: decode("status", &status, AgentStatus::from_str)?,
            queue_name: row.try_get("queue_name")?,
            current_call_id: row.try_get("current_call_id")?,
            last_changed_at: from_millis(row.try_get("last_changed_at")?)?,
        }))
    }
}
