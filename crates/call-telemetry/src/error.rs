use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::SyncKind;

/// A single field-level problem found while validating an inbound payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Name of the offending field as it appears on the wire
    pub field: String,
    /// Short machine-readable reason (`required`, `invalid_timestamp`, ...)
    pub code: String,
    /// Human readable description
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} is required", field);
        Self::new(field, "required", message)
    }
}

/// Error type for every telemetry operation
///
/// Duplicate ingestion and unknown locations are deliberately absent: both are
/// normal outcomes of ingestion (see [`crate::normalizer::IngestOutcome`]) rather
/// than failures.
///
/// # Examples
///
/// ```
/// use callwatch_call_telemetry::{TelemetryError, Result};
///
/// fn check_batch(size: u32) -> Result<()> {
///     if size == 0 {
///         return Err(TelemetryError::invalid_input("batch_size must be at least 1"));
///     }
///     Ok(())
/// }
///
/// assert!(check_batch(0).is_err());
/// ```
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Malformed inbound event
    ///
    /// Raised by the normalizer before any side effect happens. Carries every
    /// field problem found, not just the first one.
    #[error("Invalid payload: {message}")]
    InvalidPayload {
        message: String,
        fields: Vec<FieldError>,
    },

    /// Telephony provider API failed (non-2xx, connection refused, bad body)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A sync of the same kind is already running and no override was requested
    #[error("A {kind} sync is already running ({} job(s))", running.len())]
    AlreadyRunning { kind: SyncKind, running: Vec<Uuid> },

    /// Relational store errors
    ///
    /// # Examples
    /// - Connection pool exhausted
    /// - Migration failure
    /// - Constraint violations other than the dedup key
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied arguments that fail validation (date ranges, batch sizes)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested sync job or location does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Webhook signature missing or wrong
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Role is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation did not complete within its time bound
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TelemetryError {
    pub fn invalid_payload<S: Into<String>>(message: S, fields: Vec<FieldError>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
            fields,
        }
    }

    pub fn provider_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable code used in API error envelopes
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "VALIDATION_ERROR",
            Self::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Self::AlreadyRunning { .. } => "SYNC_IN_PROGRESS",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures caused by the caller rather than by this service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload { .. }
                | Self::InvalidInput(_)
                | Self::NotFound(_)
                | Self::Unauthorized(_)
                | Self::Forbidden(_)
                | Self::AlreadyRunning { .. }
        )
    }
}

impl From<sqlx::Error> for TelemetryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TelemetryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("migration failed: {}", err))
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_payload(
            "body is not valid JSON",
            vec![FieldError::new("body", "invalid_json", err.to_string())],
        )
    }
}

impl From<anyhow::Error> for TelemetryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;
