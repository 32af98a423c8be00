//! API route definitions
//!
//! Organizes endpoints for the dashboard and export layers:
//! - /api/v1/status - engine counters and uptime
//! - /api/v1/alarms - list/filter, lifecycle commands
//! - /api/v1/transitions - alarm audit trail by time range
//! - /api/v1/readings/:pod_id - reading history by time range
//! - /api/v1/notifications/:user_id - per-user inbox

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

/// Create all API routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(handlers::get_status))
        // Alarm query surface
        .route("/api/v1/alarms", get(handlers::list_alarms))
        .route("/api/v1/alarms/:id", get(handlers::get_alarm))
        // Lifecycle commands (command/result: response is authoritative)
        .route(
            "/api/v1/alarms/:id/acknowledge",
            post(handlers::acknowledge_alarm),
        )
        .route("/api/v1/alarms/:id/resolve", post(handlers::resolve_alarm))
        .route("/api/v1/alarms/:id/shelve", post(handlers::shelve_alarm))
        .route(
            "/api/v1/alarms/:id/unshelve",
            post(handlers::unshelve_alarm),
        )
        // Export collaborator queries
        .route("/api/v1/transitions", get(handlers::list_transitions))
        .route("/api/v1/readings/:pod_id", get(handlers::list_readings))
        // Notification surface
        .route(
            "/api/v1/notifications/:user_id",
            get(handlers::list_notifications),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm_store::AlarmStore;
    use crate::engine::EngineStats;
    use crate::notifier::NotificationStore;
    use crate::storage::HistoryStorage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> ApiState {
        ApiState::new(
            Arc::new(AlarmStore::new()),
            Arc::new(NotificationStore::new()),
            Arc::new(HistoryStorage::open(dir).unwrap()),
            Arc::new(EngineStats::default()),
        )
    }

    #[tokio::test]
    async fn status_endpoint_responds() {
        let dir = tempfile::tempdir().unwrap();
        let app = api_routes(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn alarm_list_is_empty_initially() {
        let dir = tempfile::tempdir().unwrap();
        let app = api_routes(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/alarms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let alarms: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(alarms.is_empty());
    }

    #[tokio::test]
    async fn unknown_alarm_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = api_routes(test_state(dir.path()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/alarms/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
