//! # Relational Store (sqlx + SQLite)
//!
//! The telemetry core never talks SQL outside this module. Everything it
//! needs from durable storage goes through the [`TelemetryStore`] trait, and
//! [`DatabaseManager`] is the SQLite implementation used in production and in
//! tests.
//!
//! ## Tables
//!
//! | table | key | written by |
//! |---|---|---|
//! | `call_events` | `(provider_call_id, kind)` unique | normalizer |
//! | `agent_presence` | `agent_identity` (upsert) | normalizer |
//! | `agent_shifts` | `(agent_identity, shift_date)` | normalizer (totals, staffed time, ratios) |
//! | `sync_jobs` | `id` | sync orchestrator |
//! | `alert_events` | rowid | alert engine (optional) |
//! | `telemetry_events` | rowid | normalizer (append-only log) |
//!
//! Timestamps are stored as unix milliseconds so window queries compare
//! integers.
//!
//! ## Quick Start
//!
//! ```rust
//! use callwatch_call_telemetry::database::{DatabaseManager, TelemetryStore};
//!
//! # async fn example() -> callwatch_call_telemetry::Result<()> {
//! let db = DatabaseManager::new_in_memory().await?;
//! let jobs = db.recent_sync_jobs(10).await?;
//! assert!(jobs.is_empty());
//! # Ok(())
//! # }
//! ```

mod activity;
mod alerts;
mod calls;
mod history;
mod presence;
mod sync_jobs;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::alerts::AlertEvent;
use crate::config::DatabaseConfig;
use crate::error::{Result, TelemetryError};
use crate::types::{AgentPresence, AgentStatus, CallEvent, CallEventKind, Location, SyncJob, SyncKind};

pub use activity::LocationActivity;
pub use history::HistoryEntry;
pub use presence::AgentShift;

/// Result of a presence upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceWrite {
    /// Row written; `previous_location` is set when the agent moved
    Applied {
        previous_location: Option<Location>,
        /// Status before this update, `None` for a first sighting
        previous_status: Option<AgentStatus>,
    },
    /// Stored row is newer, nothing changed
    Stale,
}

/// One handled call to add to an agent's daily shift totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftCall {
    pub agent_identity: String,
    pub shift_date: NaiveDate,
    pub extension: Option<String>,
    pub agent_name: Option<String>,
    pub location: Location,
    pub talk_seconds: i64,
}

/// Narrow query interface the telemetry core depends on
#[async_trait]
pub trait TelemetryStore: Send + Sync + 'static {
    async fn call_event_exists(&self, provider_call_id: &str, kind: CallEventKind) -> Result<bool>;

    /// Insert unless `(provider_call_id, kind)` already exists. Returns
    /// whether a row was written.
    async fn insert_call_event(&self, event: &CallEvent) -> Result<bool>;

    /// Directory lookup by extension, then by display name
    async fn find_agent_identity(&self, extension: &str, name: &str) -> Result<Option<String>>;

    async fn upsert_agent_presence(&self, presence: &AgentPresence) -> Result<PresenceWrite>;

    async fn record_shift_call(&self, shift: &ShiftCall) -> Result<()>;

    /// Append to the event log
    async fn append_history(&self, entry: &HistoryEntry) -> Result<()>;

    /// Most recent log entries for the given locations, newest first
    async fn recent_history(&self, locations: &[Location], limit: u32) -> Result<Vec<HistoryEntry>>;

    /// Aggregate raw activity for one location in a single read transaction
    async fn location_activity(
        &self,
        location: Location,
        now: DateTime<Utc>,
        ringing_cutoff: Duration,
    ) -> Result<LocationActivity>;

    async fn insert_alert(&self, alert: &AlertEvent) -> Result<()>;

    async fn create_sync_job(&self, job: &SyncJob) -> Result<()>;

    async fn update_sync_job(&self, job: &SyncJob) -> Result<()>;

    async fn get_sync_job(&self, id: Uuid) -> Result<Option<SyncJob>>;

    async fn running_sync_jobs(&self, kind: SyncKind) -> Result<Vec<SyncJob>>;

    async fn recent_sync_jobs(&self, limit: u32) -> Result<Vec<SyncJob>>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if missing) a file database and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 8).await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if is_memory_url(&config.url) {
            Self::new_in_memory().await
        } else {
            Self::with_max_connections(&config.url, config.max_connections).await
        }
    }

    async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("🗄️ Initializing sqlx database manager: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| TelemetryError::database(format!("Failed to connect to database: {}", e)))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("✅ Database manager initialized successfully (WAL mode enabled)");
        Ok(Self { pool })
    }

    /// In-memory database for tests and ephemeral runs
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to one connection that never expires.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("✅ In-memory database initialized");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TelemetryStore for DatabaseManager {
    async fn call_event_exists(&self, provider_call_id: &str, kind: CallEventKind) -> Result<bool> {
        self.call_exists(provider_call_id, kind).await
    }

    async fn insert_call_event(&self, event: &CallEvent) -> Result<bool> {
        self.insert_call(event).await
    }

    async fn find_agent_identity(&self, extension: &str, name: &str) -> Result<Option<String>> {
        self.lookup_agent_identity(extension, name).await
    }

    async fn upsert_agent_presence(&self, presence: &AgentPresence) -> Result<PresenceWrite> {
        self.upsert_presence(presence).await
    }

    async fn record_shift_call(&self, shift: &ShiftCall) -> Result<()> {
        self.add_shift_call(shift).await
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.insert_history(entry).await
    }

    async fn recent_history(&self, locations: &[Location], limit: u32) -> Result<Vec<HistoryEntry>> {
        self.load_history(locations, limit).await
    }

    async fn location_activity(
        &self,
        location: Location,
        now: DateTime<Utc>,
        ringing_cutoff: Duration,
    ) -> Result<LocationActivity> {
        self.aggregate_activity(location, now, ringing_cutoff).await
    }

    async fn insert_alert(&self, alert: &AlertEvent) -> Result<()> {
        self.insert_alert_event(alert).await
    }

    async fn create_sync_job(&self, job: &SyncJob) -> Result<()> {
        self.insert_sync_job(job).await
    }

    async fn update_sync_job(&self, job: &SyncJob) -> Result<()> {
        self.save_sync_job(job).await
    }

    async fn get_sync_job(&self, id: Uuid) -> Result<Option<SyncJob>> {
        self.load_sync_job(id).await
    }

    async fn running_sync_jobs(&self, kind: SyncKind) -> Result<Vec<SyncJob>> {
        self.load_running_jobs(kind).await
    }

    async fn recent_sync_jobs(&self, limit: u32) -> Result<Vec<SyncJob>> {
        self.list_sync_jobs(limit).await
    }
}

pub(crate) fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TelemetryError::database(format!("invalid stored timestamp {}", ms)))
}

/// Decode a TEXT enum column, reporting the column on failure
pub(crate) fn decode<T>(column: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| {
        TelemetryError::database(format!("unexpected value '{}' in column {}", value, column))
    })
}
