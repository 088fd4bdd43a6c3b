use chrono::NaiveDate;
use uuid::Uuid;

use super::{decode, from_millis, to_millis, DatabaseManager};
use crate::error::{Result, TelemetryError};
use crate::types::{DateRange, Location, SyncJob, SyncKind, SyncStatus};

const JOB_COLUMNS: &str = "id, kind, range_start, range_end, location, batch_size, status, \
     fetched, processed, skipped, errors, error_message, initiated_by, override_running, \
     started_at, completed_at";

#[derive(sqlx::FromRow, Debug, Clone)]
struct SyncJobRow {
    id: String,
    kind: String,
    range_start: Option<String>,
    range_end: Option<String>,
    location: Option<String>,
    batch_size: i64,
    status: String,
    fetched: i64,
    processed: i64,
    skipped: i64,
    errors: i64,
    error_message: Option<String>,
    initiated_by: String,
    override_running: bool,
    started_at: i64,
    completed_at: Option<i64>,
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| TelemetryError::database(format!("invalid stored date '{}': {}", value, e)))
}

impl SyncJobRow {
    fn into_job(self) -> Result<SyncJob> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| TelemetryError::database(format!("invalid job id '{}': {}", self.id, e)))?;
        let date_range = match (self.range_start.as_deref(), self.range_end.as_deref()) {
            (Some(start), Some(end)) => Some(DateRange::new(parse_date(start)?, parse_date(end)?)),
            _ => None,
        };
        let location = match self.location.as_deref() {
            Some(loc) => Some(decode("location", loc, Location::from_str)?),
            None => None,
        };

        Ok(SyncJob {
            id,
            kind: decode("kind", &self.kind, SyncKind::from_str)?,
            date_range,
            location,
            batch_size: self.batch_size.max(0) as u32,
            status: decode("status", &self.status, SyncStatus::from_str)?,
            fetched: self.fetched.max(0) as u64,
            processed: self.processed.max(0) as u64,
            skipped: self.skipped.max(0) as u64,
            errors: self.errors.max(0) as u64,
            error_message: self.error_message,
            initiated_by: self.initiated_by,
            override_running: self.override_running,
            started_at: from_millis(self.started_at)?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
        })
    }
}

impl DatabaseManager {
    pub(super) async fn insert_sync_job(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO sync_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(job.id.to_string())
        .bind(job.kind.as_str())
        .bind(job.date_range.map(|r| r.start.format("%Y-%m-%d").to_string()))
        .bind(job.date_range.map(|r| r.end.format("%Y-%m-%d").to_string()))
        .bind(job.location.map(|l| l.as_str()))
        .bind(job.batch_size as i64)
        .bind(job.status.as_str())
        .bind(job.fetched as i64)
        .bind(job.processed as i64)
        .bind(job.skipped as i64)
        .bind(job.errors as i64)
        .bind(&job.error_message)
        .bind(&job.initiated_by)
        .bind(job.override_running)
        .bind(to_millis(job.started_at))
        .bind(job.completed_at.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn save_sync_job(&self, job: &SyncJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                status = ?, fetched = ?, processed = ?, skipped = ?, errors = ?,
                error_message = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.fetched as i64)
        .bind(job.processed as i64)
        .bind(job.skipped as i64)
        .bind(job.errors as i64)
        .bind(&job.error_message)
        .bind(job.completed_at.map(to_millis))
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TelemetryError::not_found(format!("sync job {}", job.id)));
        }
        Ok(())
    }

    pub(super) async fn load_sync_job(&self, id: Uuid) -> Result<Option<SyncJob>> {
        let row: Option<SyncJobRow> =
            sqlx::query_as(&format!("SELECT {} FROM sync_jobs WHERE id = ?", JOB_COLUMNS))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(SyncJobRow::into_job).transpose()
    }

    pub(super) async fn load_running_jobs(&self, kind: SyncKind) -> Result<Vec<SyncJob>> {
        let rows: Vec<SyncJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_jobs WHERE kind = ? AND status = 'running' ORDER BY started_at ASC",
            JOB_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SyncJobRow::into_job).collect()
    }

    pub(super) async fn list_sync_jobs(&self, limit: u32) -> Result<Vec<SyncJob>> {
        let rows: Vec<SyncJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sync_jobs ORDER BY started_at DESC LIMIT ?",
            JOB_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SyncJobRow::into_job).collect()
    }
}
