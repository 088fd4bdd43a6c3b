//! JSON envelope shared by every HTTP response:
//! `{success, data?, error?{code, message, details?}, meta{timestamp, request_id}}`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::error::TelemetryError;

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
}

impl ResponseMeta {
    fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: ResponseMeta,
}

/// Successful response with an explicit status
pub struct ApiSuccess<T: Serialize> {
    status: StatusCode,
    data: T,
}

impl<T: Serialize> ApiSuccess<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    pub fn accepted(data: T) -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiSuccess<T> {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            success: true,
            data: Some(self.data),
            error: None,
            meta: ResponseMeta::now(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Error response; wraps a [`TelemetryError`] with an optional code override
#[derive(Debug)]
pub struct ApiError {
    error: TelemetryError,
    code: Option<&'static str>,
}

impl ApiError {
    pub fn with_code(error: TelemetryError, code: &'static str) -> Self {
        Self {
            error,
            code: Some(code),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.error {
            TelemetryError::InvalidPayload { .. } | TelemetryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TelemetryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TelemetryError::Forbidden(_) => StatusCode::FORBIDDEN,
            TelemetryError::NotFound(_) => StatusCode::NOT_FOUND,
            TelemetryError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            TelemetryError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            TelemetryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TelemetryError::Database(_) | TelemetryError::Configuration(_) | TelemetryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        self.code.unwrap_or_else(|| self.error.error_code())
    }

    fn details(&self) -> Option<Value> {
        match &self.error {
            TelemetryError::InvalidPayload { fields, .. } => serde_json::to_value(fields).ok(),
            TelemetryError::AlreadyRunning { running, .. } => {
                Some(serde_json::json!({ "running_jobs": running }))
            }
            _ => None,
        }
    }

    fn message(&self) -> String {
        match &self.error {
            // store and internal failures are logged, not echoed
            TelemetryError::Database(_) | TelemetryError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<TelemetryError> for ApiError {
    fn from(error: TelemetryError) -> Self {
        Self { error, code: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), error = %self.error, "request failed");
        }
        let body: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code().to_string(),
                message: self.message(),
                details: self.details(),
            }),
            meta: ResponseMeta::now(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<ApiSuccess<T>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;
    use crate::types::SyncKind;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TelemetryError::invalid_payload("bad", vec![]), StatusCode::BAD_REQUEST),
            (TelemetryError::invalid_input("bad"), StatusCode::BAD_REQUEST),
            (TelemetryError::unauthorized("sig"), StatusCode::UNAUTHORIZED),
            (TelemetryError::forbidden("role"), StatusCode::FORBIDDEN),
            (TelemetryError::not_found("job"), StatusCode::NOT_FOUND),
            (
                TelemetryError::AlreadyRunning {
                    kind: SyncKind::Cdr,
                    running: vec![],
                },
                StatusCode::CONFLICT,
            ),
            (TelemetryError::provider_unavailable("down"), StatusCode::BAD_GATEWAY),
            (TelemetryError::timeout("slow"), StatusCode::GATEWAY_TIMEOUT),
            (TelemetryError::database("disk"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_code_override_and_details() {
        let err = ApiError::with_code(TelemetryError::not_found("job"), "SYNC_JOB_NOT_FOUND");
        assert_eq!(err.code(), "SYNC_JOB_NOT_FOUND");

        let err = ApiError::from(TelemetryError::invalid_payload(
            "bad",
            vec![FieldError::required("CallId")],
        ));
        let details = err.details().unwrap();
        assert_eq!(details[0]["field"], "CallId");
        assert_eq!(err.message(), "Invalid payload: bad");
    }
}
