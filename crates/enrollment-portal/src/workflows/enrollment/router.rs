use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::domain::{ApplicationId, ApplicationStatus, ApplicationView, EnrollmentSubmission, GradeLevel};
use super::repository::{ApplicationFilter, ApplicationStore, RepositoryError};
use super::service::{EnrollmentService, ServiceError, StatusChange};
use super::transition::TransitionError;
use crate::workflows::notifications::{notification_router, StatusMailer};

/// Admin request to change an application's status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub application_id: ApplicationId,
    pub new_status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReenrollmentRequest {
    pub grade_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    pub username: String,
    pub password: String,
}

/// Uniform `{ success, message }` reply for status-changing requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeResponse {
    pub success: bool,
    pub message: String,
}

impl StatusChangeResponse {
    fn ok(change: &StatusChange) -> Self {
        Self {
            success: true,
            message: change.message(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Router exposing enrollment intake, review, and the real-time channel.
pub fn enrollment_router<S, M>(service: Arc<EnrollmentService<S, M>>) -> Router
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    let realtime = notification_router(Arc::clone(service.directory()));

    Router::new()
        .route(
            "/api/v1/enrollments",
            post(submit_handler::<S, M>).get(list_handler::<S, M>),
        )
        .route(
            "/api/v1/enrollments/status",
            post(status_change_handler::<S, M>),
        )
        .route(
            "/api/v1/enrollments/:application_id",
            get(application_handler::<S, M>),
        )
        .route(
            "/api/v1/enrollments/:application_id/reenroll",
            post(reenroll_handler::<S, M>),
        )
        .route("/api/v1/sessions", post(session_handler::<S, M>))
        .with_state(service)
        .merge(realtime)
}

pub(crate) async fn submit_handler<S, M>(
    State(service): State<Arc<EnrollmentService<S, M>>>,
    Json(submission): Json<EnrollmentSubmission>,
) -> Response
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    match service.submit(submission) {
        Ok(application) => (StatusCode::CREATED, Json(application.view())).into_response(),
        Err(ServiceError::Intake(violation)) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            violation.to_string(),
        ),
        Err(ServiceError::Repository(RepositoryError::Conflict)) => {
            error_response(StatusCode::CONFLICT, "username is already registered")
        }
        Err(other) => internal_error(other),
    }
}

pub(crate) async fn list_handler<S, M>(
    State(service): State<Arc<EnrollmentService<S, M>>>,
    Query(filter): Query<ApplicationFilter>,
) -> Response
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    match service.list(&filter) {
        Ok(applications) => {
            let views: Vec<ApplicationView> = applications.iter().map(|app| app.view()).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(other) => internal_error(other),
    }
}

pub(crate) async fn application_handler<S, M>(
    State(service): State<Arc<EnrollmentService<S, M>>>,
    Path(application_id): Path<u64>,
) -> Response
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    match service.get(ApplicationId(application_id)) {
        Ok(application) => (StatusCode::OK, Json(application.view())).into_response(),
        Err(err @ ServiceError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        Err(other) => internal_error(other),
    }
}

pub(crate) async fn status_change_handler<S, M>(
    State(service): State<Arc<EnrollmentService<S, M>>>,
    Json(request): Json<StatusChangeRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    let Some(requested) = ApplicationStatus::parse(&request.new_status) else {
        let reply = StatusChangeResponse::failed(format!(
            "'{}' is not a valid status",
            request.new_status
        ));
        return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
    };

    let application_id = request.application_id;
    let outcome =
        tokio::task::spawn_blocking(move || service.change_status(application_id, requested))
            .await;
    joined_status_change(outcome)
}

pub(crate) async fn reenroll_handler<S, M>(
    State(service): State<Arc<EnrollmentService<S, M>>>,
    Path(application_id): Path<u64>,
    Json(request): Json<ReenrollmentRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    let grade_level = GradeLevel::new(&request.grade_level);
    let outcome = tokio::task::spawn_blocking(move || {
        service.reenroll(ApplicationId(application_id), grade_level)
    })
    .await;
    joined_status_change(outcome)
}

pub(crate) async fn session_handler<S, M>(
    State(service): State<Arc<EnrollmentService<S, M>>>,
    Json(request): Json<SessionRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    M: StatusMailer + 'static,
{
    match service.authenticate(&request.username, &request.password) {
        Ok(application) => (StatusCode::OK, Json(application.view())).into_response(),
        Err(err @ ServiceError::InvalidCredentials) => {
            error_response(StatusCode::UNAUTHORIZED, err.to_string())
        }
        Err(other) => internal_error(other),
    }
}

/// Status changes hold the per-application lock across store calls, so they run
/// on the blocking pool rather than on a runtime worker.
fn joined_status_change(
    outcome: Result<Result<StatusChange, ServiceError>, tokio::task::JoinError>,
) -> Response {
    match outcome {
        Ok(outcome) => status_change_response(outcome),
        Err(err) => {
            warn!(error = %err, "status change task did not complete");
            let reply = StatusChangeResponse::failed("status change was interrupted");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(reply)).into_response()
        }
    }
}

/// Callers learn whether the status itself changed, never how delivery went.
fn status_change_response(outcome: Result<StatusChange, ServiceError>) -> Response {
    let (status, reply) = match outcome {
        Ok(change) => (StatusCode::OK, StatusChangeResponse::ok(&change)),
        Err(err) => {
            let status = match &err {
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::Intake(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ServiceError::Transition(
                    TransitionError::InvalidTransition { .. }
                    | TransitionError::SameGradeLevel { .. }
                    | TransitionError::NoChange { .. },
                ) => StatusCode::CONFLICT,
                ServiceError::Transition(
                    TransitionError::Contention(_) | TransitionError::StoreUnavailable(_),
                )
                | ServiceError::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Transition(TransitionError::NotFound(_)) => StatusCode::NOT_FOUND,
                ServiceError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            };
            (status, StatusChangeResponse::failed(err.to_string()))
        }
    };

    (status, Json(reply)).into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, Json(payload)).into_response()
}

fn internal_error(err: ServiceError) -> Response {
    warn!(error = %err, "enrollment request failed");
    let status = match err {
        ServiceError::Repository(RepositoryError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}
