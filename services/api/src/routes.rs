use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use enrollment_portal::workflows::enrollment::{
    enrollment_router, ApplicationStore, EnrollmentService,
};
use enrollment_portal::workflows::notifications::StatusMailer;
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_enrollment_routes<S, M>(service: Arc<EnrollmentService<S, M>>) -> axum::Router
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    enrollment_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once the listener is bound and until the real-time directory is torn down.
pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let bound = state.readiness.load(std::sync::atomic::Ordering::Acquire);
    let realtime_open = !state.directory.is_closed();

    let (status, label) = match (bound, realtime_open) {
        (true, true) => (StatusCode::OK, "ready"),
        (false, true) => (StatusCode::SERVICE_UNAVAILABLE, "initializing"),
        (_, false) => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
    };

    (
        status,
        Json(json!({
            "status": label,
            "connections": state.directory.connection_count(),
            "watchedApplications": state.directory.entry_count(),
        })),
    )
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
