//! API handlers: alarm queries, lifecycle commands, notifications,
//! export queries, engine status.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use uuid::Uuid;

use crate::alarm_store::{AlarmFilter, StoreError};
use crate::types::{Alarm, AlarmStatus, Notification, Severity};

use super::ApiState;

// ============================================================================
// Error mapping
// ============================================================================

/// Store errors rendered as HTTP problem responses.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            // Precondition (version) failed — caller must re-read.
            StoreError::ConcurrentModification { .. } => StatusCode::PRECONDITION_FAILED,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uptime_secs: i64,
    pub readings_processed: u64,
    pub readings_faulted: u64,
    pub cycles_failed: u64,
    pub alarms_opened: u64,
    pub open_alarms: usize,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let now = Utc::now();
    let open = state
        .alarms
        .list(&AlarmFilter::default())
        .iter()
        .filter(|a| a.is_open())
        .count();
    Json(StatusResponse {
        uptime_secs: (now - state.started_at).num_seconds(),
        readings_processed: state.stats.readings_processed.load(Ordering::Relaxed),
        readings_faulted: state.stats.readings_faulted.load(Ordering::Relaxed),
        cycles_failed: state.stats.cycles_failed.load(Ordering::Relaxed),
        alarms_opened: state.stats.alarms_opened.load(Ordering::Relaxed),
        open_alarms: open,
        timestamp: now,
    })
}

// ============================================================================
// Alarm queries
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AlarmQuery {
    pub pod_id: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<AlarmStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /api/v1/alarms
pub async fn list_alarms(
    State(state): State<ApiState>,
    Query(query): Query<AlarmQuery>,
) -> Json<Vec<Alarm>> {
    let filter = AlarmFilter {
        pod_id: query.pod_id,
        severity: query.severity,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    Json(state.alarms.list(&filter))
}

/// GET /api/v1/alarms/:id
pub async fn get_alarm(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alarm>, ApiError> {
    state
        .alarms
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError(StoreError::NotFound(id)))
}

// ============================================================================
// Lifecycle commands
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
    /// Version the caller last read; mismatches are rejected with 412.
    #[serde(default)]
    pub version: Option<u64>,
}

/// POST /api/v1/alarms/:id/acknowledge
pub async fn acknowledge_alarm(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcknowledgeRequest>,
) -> Result<Json<Alarm>, ApiError> {
    let alarm = state
        .alarms
        .acknowledge(id, &req.actor, req.note, req.version, Utc::now())?;
    Ok(Json(alarm))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub actor: String,
    pub note: String,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// POST /api/v1/alarms/:id/resolve
pub async fn resolve_alarm(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Alarm>, ApiError> {
    let alarm = state.alarms.resolve(
        id,
        &req.actor,
        req.note,
        req.root_cause,
        req.version,
        Utc::now(),
    )?;
    Ok(Json(alarm))
}

#[derive(Debug, Deserialize)]
pub struct ShelveRequest {
    pub actor: String,
    pub reason: String,
    pub until: DateTime<Utc>,
    #[serde(default)]
    pub auto_unshelve: bool,
    #[serde(default)]
    pub version: Option<u64>,
}

/// POST /api/v1/alarms/:id/shelve
pub async fn shelve_alarm(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ShelveRequest>,
) -> Result<Json<Alarm>, ApiError> {
    let alarm = state.alarms.shelve(
        id,
        &req.actor,
        req.reason,
        req.until,
        req.auto_unshelve,
        req.version,
        Utc::now(),
    )?;
    Ok(Json(alarm))
}

/// POST /api/v1/alarms/:id/unshelve
pub async fn unshelve_alarm(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alarm>, ApiError> {
    let alarm = state.alarms.unshelve(id, Utc::now())?;
    Ok(Json(alarm))
}

// ============================================================================
// Export queries (transitions & readings by time range)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub alarm_id: Option<Uuid>,
}

/// GET /api/v1/transitions — audit trail for the export collaborator.
pub async fn list_transitions(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<crate::types::AlarmEvent>>, StatusCode> {
    state
        .storage
        .transitions_in_range(query.from, query.to, query.alarm_id)
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "transition query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Debug, Deserialize)]
pub struct ReadingRangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// GET /api/v1/readings/:pod_id
pub async fn list_readings(
    State(state): State<ApiState>,
    Path(pod_id): Path<String>,
    Query(query): Query<ReadingRangeQuery>,
) -> Result<Json<Vec<crate::types::TelemetryReading>>, StatusCode> {
    state
        .storage
        .readings_in_range(&pod_id, query.from, query.to)
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, pod = %pod_id, "reading query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// ============================================================================
// Notifications
// ============================================================================

/// GET /api/v1/notifications/:user_id
pub async fn list_notifications(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Json<Vec<Notification>> {
    Json(state.notifications.list_for_user(&user_id))
}

/// POST /api/v1/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, StatusCode> {
    state
        .notifications
        .mark_read(id, Utc::now())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
