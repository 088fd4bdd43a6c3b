use super::{to_millis, DatabaseManager};
use crate::alerts::AlertEvent;
use crate::error::Result;

impl DatabaseManager {
    pub(super) async fn insert_alert_event(&self, alert: &AlertEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_events (
                rule_ref, metric, comparison, threshold, observed_value,
                location, agent_identity, severity, raised_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.rule_ref)
        .bind(alert.metric.as_str())
        .bind(alert.comparison.as_str())
        .bind(alert.threshold)
        .bind(alert.observed_value)
        .bind(alert.location.as_str())
        .bind(&alert.agent_identity)
        .bind(alert.severity.as_str())
        .bind(to_millis(alert.raised_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn alert_history_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alert_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
