use crate::backends::BackendStatus;
use crate::dtos::FormatResponse;
use crate::models::ArtifactKind;
use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Last observed backend state. Never waits on a backend.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.orchestrator.health();
    let status = match report.status {
        BackendStatus::Healthy => "healthy",
        BackendStatus::Degraded | BackendStatus::Unreachable => "degraded",
    };

    Json(json!({
        "status": status,
        "service": "insight-service",
        "version": env!("CARGO_PKG_VERSION"),
        "backend_mode": state.backend_mode,
        "backends": report.backends,
        "active_sessions": report.active_sessions,
        "staged_artifacts": report.staged_artifacts,
        "in_flight": report.in_flight,
    }))
}

pub async fn readiness_check() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

pub async fn list_formats() -> Json<Vec<FormatResponse>> {
    Json(ArtifactKind::ALL.into_iter().map(FormatResponse::from).collect())
}
