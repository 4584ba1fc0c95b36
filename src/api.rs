use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::db::SnapshotStore;
use crate::error::TrackerError;
use crate::milestone::MilestoneAggregator;
use crate::models::TraineeId;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: MilestoneAggregator,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub scheduler: Scheduler,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error,
                message: message.into(),
            },
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let (status, code) = match &err {
            TrackerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }

        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/milestonestatus/:githubusername", get(milestone_status))
        .route("/extracteddata", post(trigger_extraction))
        .route("/extracteddata/:traineeid", get(snapshot_history))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "message": "ok" }))
}

/// Responds with `[allLatest, filteredLatest, currentMilestone]`.
async fn milestone_status(
    State(state): State<AppState>,
    Path(github_username): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let view = state.aggregator.progress_view(Some(&github_username)).await?;
    Ok(Json(view))
}

async fn snapshot_history(
    State(state): State<AppState>,
    Path(trainee_id): Path<TraineeId>,
) -> ApiResult<impl IntoResponse> {
    let history = state.snapshots.history(trainee_id).await?;
    Ok(Json(history))
}

async fn trigger_extraction(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    if state.scheduler.is_shut_down() {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "UNAVAILABLE",
            "the server is shutting down",
        ));
    }
    match state.scheduler.trigger_now().await? {
        Some(report) => Ok(Json(report)),
        None => Err(ApiError::new(
            StatusCode::CONFLICT,
            "CONFLICT",
            "an extraction run is already in progress",
        )),
    }
}
