//! HTTP surface.
//!
//! | route | access |
//! |---|---|
//! | `POST /api/v1/webhooks/telephony` | webhook signature |
//! | `GET /api/v1/live` | any role (WebSocket) |
//! | `GET /api/v1/metrics`, `GET /api/v1/metrics/:location` | any role |
//! | `GET /api/v1/events` | any role, scoped to the caller's locations |
//! | `/api/v1/ops/*` | supervisor and above |
//! | `GET /health` | open |
//!
//! Authentication happens in front of this service; the gateway passes the
//! caller's role and assigned locations in `X-User-Role` / `X-User-Locations`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::response::{ApiError, ApiResult, ApiSuccess};
use super::ws::handle_socket;
use crate::broadcast::{Role, SubscriptionScope};
use crate::database::HistoryEntry;
use crate::engine::{TelemetryEngine, WebhookReceipt};
use crate::error::TelemetryError;
use crate::metrics::{RecomputeReport, TickStats, TickStatsSnapshot};
use crate::normalizer::lookup_location;
use crate::provider::SIGNATURE_HEADER;
use crate::sync::SyncRequest;
use crate::types::{DateRange, LiveMetrics, Location, LocationMetrics, Severity, SyncJob};

/// Maximum accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const ROLE_HEADER: &str = "x-user-role";
pub const LOCATIONS_HEADER: &str = "x-user-locations";
pub const USER_HEADER: &str = "x-user-id";

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TelemetryEngine>,
    /// Counters of the periodic recompute, when it runs
    pub ticker: Option<Arc<TickStats>>,
}

impl AppState {
    pub fn new(engine: Arc<TelemetryEngine>) -> Self {
        Self { engine, ticker: None }
    }

    pub fn with_ticker(mut self, ticker: Arc<TickStats>) -> Self {
        self.ticker = Some(ticker);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/webhooks/telephony", post(telephony_webhook))
        .route("/live", get(live_socket))
        .route("/metrics", get(all_metrics))
        .route("/metrics/:location", get(location_metrics))
        .route("/events", get(recent_events))
        .route("/ops/recompute", post(recompute))
        .route("/ops/sync", post(start_sync).get(sync_history))
        .route("/ops/sync/:job_id", get(sync_status))
        .route("/ops/agent-status/refresh", post(refresh_agent_status));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Identity asserted by the gateway headers
#[derive(Debug, Clone)]
struct Caller {
    role: Role,
    locations: Vec<Location>,
    user_id: Option<String>,
}

impl Caller {
    fn from_headers(headers: &HeaderMap) -> Result<Self, TelemetryError> {
        let role = header(headers, ROLE_HEADER)
            .ok_or_else(|| TelemetryError::unauthorized("missing X-User-Role header"))?;
        let role = Role::from_str(role)
            .ok_or_else(|| TelemetryError::forbidden(format!("unknown role '{}'", role)))?;

        let locations = header(headers, LOCATIONS_HEADER)
            .map(parse_location_list)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            role,
            locations,
            user_id: header(headers, USER_HEADER).map(str::to_string),
        })
    }

    fn require_operator(&self) -> Result<(), TelemetryError> {
        if self.role.can_operate() {
            Ok(())
        } else {
            Err(TelemetryError::forbidden(format!(
                "role '{}' cannot perform operational actions",
                self.role
            )))
        }
    }

    fn scope(&self, requested: Option<&[Location]>, min_severity: Severity) -> Result<SubscriptionScope, TelemetryError> {
        SubscriptionScope::for_role(self.role, &self.locations, requested, min_severity)
    }

    fn name(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| self.role.to_string())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Comma separated location codes; unknown codes are rejected here rather
/// than defaulted
fn parse_location_list(raw: &str) -> Result<Vec<Location>, TelemetryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            lookup_location(code)
                .ok_or_else(|| TelemetryError::invalid_input(format!("unknown location '{}'", code)))
        })
        .collect()
}

fn parse_optional_location(code: Option<&str>) -> Result<Option<Location>, TelemetryError> {
    match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => lookup_location(code)
            .map(Some)
            .ok_or_else(|| TelemetryError::invalid_input(format!("unknown location '{}'", code))),
        None => Ok(None),
    }
}

/// Empty body means all defaults
fn json_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, TelemetryError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

async fn telephony_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookReceipt> {
    let signature = header(&headers, SIGNATURE_HEADER);
    match state.engine.handle_webhook(&body, signature).await {
        Ok(receipt) => Ok(ApiSuccess::ok(receipt)),
        Err(e @ TelemetryError::Unauthorized(_)) => Err(ApiError::with_code(e, "INVALID_SIGNATURE")),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LiveQuery {
    locations: Option<String>,
    min_severity: Option<String>,
}

async fn live_socket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let caller = Caller::from_headers(&headers)?;
    let requested = query.locations.as_deref().map(parse_location_list).transpose()?;
    let min_severity = match query.min_severity.as_deref() {
        Some(raw) => Severity::from_str(&raw.trim().to_ascii_lowercase())
            .ok_or_else(|| TelemetryError::invalid_input(format!("unknown severity '{}'", raw)))?,
        None => Severity::Info,
    };
    let scope = caller.scope(requested.as_deref(), min_severity)?;

    let engine = state.engine.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, engine, scope)).into_response())
}

async fn all_metrics(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<LiveMetrics> {
    let caller = Caller::from_headers(&headers)?;
    let scope = caller.scope(None, Severity::Info)?;
    Ok(ApiSuccess::ok(state.engine.live_metrics(&scope)))
}

async fn location_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> ApiResult<LocationMetrics> {
    let caller = Caller::from_headers(&headers)?;
    let location = lookup_location(&code)
        .ok_or_else(|| TelemetryError::not_found(format!("unknown location '{}'", code)))?;
    let scope = caller.scope(None, Severity::Info)?;
    if !scope.covers(location) {
        return Err(TelemetryError::forbidden(format!("no access to {}", location)).into());
    }
    Ok(ApiSuccess::ok(state.engine.snapshot(location)))
}

async fn recent_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<HistoryEntry>> {
    let caller = Caller::from_headers(&headers)?;
    let scope = caller.scope(None, Severity::Info)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(ApiSuccess::ok(state.engine.recent_events(&scope, limit).await?))
}

#[derive(Debug, Default, Deserialize)]
struct LocationBody {
    location: Option<String>,
}

async fn recompute(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<RecomputeReport> {
    let caller = Caller::from_headers(&headers)?;
    caller.require_operator()?;
    let body: LocationBody = json_body(&body)?;
    let location = parse_optional_location(body.location.as_deref())?;
    let report = state.engine.recompute_now(location).await?;
    Ok(ApiSuccess::ok(report))
}

#[derive(Debug, Deserialize)]
struct StartSyncBody {
    start_date: NaiveDate,
    end_date: NaiveDate,
    location: Option<String>,
    batch_size: Option<u32>,
    #[serde(default)]
    force_refresh: bool,
}

async fn start_sync(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<SyncJob> {
    let caller = Caller::from_headers(&headers)?;
    caller.require_operator()?;
    let body: StartSyncBody = serde_json::from_slice(&body).map_err(TelemetryError::from)?;

    let mut request = SyncRequest::cdr(DateRange::new(body.start_date, body.end_date))
        .with_location(parse_optional_location(body.location.as_deref())?)
        .with_override(body.force_refresh)
        .initiated_by(caller.name());
    if let Some(batch_size) = body.batch_size {
        request = request.with_batch_size(batch_size);
    }

    let job = state.engine.start_sync(request).await?;
    Ok(ApiSuccess::accepted(job))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

async fn sync_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<SyncJob>> {
    Caller::from_headers(&headers)?.require_operator()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(ApiSuccess::ok(state.engine.sync_history(limit).await?))
}

async fn sync_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> ApiResult<SyncJob> {
    Caller::from_headers(&headers)?.require_operator()?;
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| TelemetryError::invalid_input(format!("'{}' is not a job id", job_id)))?;
    match state.engine.sync_status(job_id).await {
        Ok(job) => Ok(ApiSuccess::ok(job)),
        Err(e @ TelemetryError::NotFound(_)) => Err(ApiError::with_code(e, "SYNC_JOB_NOT_FOUND")),
        Err(e) => Err(e.into()),
    }
}

async fn refresh_agent_status(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<SyncJob> {
    let caller = Caller::from_headers(&headers)?;
    caller.require_operator()?;
    let body: LocationBody = json_body(&body)?;
    let location = parse_optional_location(body.location.as_deref())?;
    let job = state.engine.refresh_agent_status(location, caller.name()).await?;
    Ok(ApiSuccess::ok(job))
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    version: &'static str,
    subscribers: usize,
    provider_enabled: bool,
    running_sync_tasks: usize,
    ticker: Option<TickStatsSnapshot>,
}

async fn health(State(state): State<AppState>) -> ApiResult<HealthReport> {
    Ok(ApiSuccess::ok(HealthReport {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        subscribers: state.engine.hub().subscriber_count(),
        provider_enabled: state.engine.sync().has_provider(),
        running_sync_tasks: state.engine.sync().active_tasks(),
        ticker: state.ticker.as_ref().map(|t| t.snapshot()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            Caller::from_headers(&headers).unwrap_err().error_code(),
            "UNAUTHORIZED"
        );

        headers.insert(ROLE_HEADER, HeaderValue::from_static("Staff"));
        headers.insert(LOCATIONS_HEADER, HeaderValue::from_static("wixom, ply"));
        let caller = Caller::from_headers(&headers).unwrap();
        assert_eq!(caller.role, Role::Staff);
        assert_eq!(caller.locations, vec![Location::Wixom, Location::Plymouth]);
        assert!(caller.require_operator().is_err());
        assert_eq!(caller.name(), "staff");

        headers.insert(ROLE_HEADER, HeaderValue::from_static("ceo"));
        assert_eq!(
            Caller::from_headers(&headers).unwrap_err().error_code(),
            "FORBIDDEN"
        );
    }

    #[test]
    fn test_location_list_rejects_unknown_codes() {
        assert!(parse_location_list("wixom,atlantis").is_err());
        assert_eq!(parse_location_list(" aa ,").unwrap(), vec![Location::AnnArbor]);
        assert_eq!(parse_optional_location(Some("  ")).unwrap(), None);
    }

    #[test]
    fn test_empty_body_uses_defaults() {
        let body: LocationBody = json_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(body.location.is_none());
        assert!(json_body::<LocationBody>(&Bytes::from_static(b"{")).is_err());
    }
}
