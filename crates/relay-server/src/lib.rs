//! Intake HTTP surface: validates a request, detaches a task and acknowledges.

pub mod error;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_contracts::task::TaskRequest;
use relay_engine::notifier::WORKER_SECRET_HEADER;
use relay_engine::TaskRunner;
use serde::Serialize;
use tower_http::trace::TraceLayer;

pub use error::IntakeError;

pub const ACK_MESSAGE: &str = "Task accepted and is being processed.";

/// Inline base64 images make bodies large.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    runner: Arc<TaskRunner>,
}

impl AppState {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub message: &'static str,
    pub task_id: String,
}

pub fn relay_router(state: AppState) -> Router {
    Router::new()
        .route("/process", post(process))
        .route("/process-image", post(process))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Json<Acknowledgement>, IntakeError> {
    let config = state.runner.config();
    if let Some(expected) = config.intake_secret.as_deref() {
        let supplied = headers
            .get(WORKER_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if supplied != Some(expected) {
            return Err(IntakeError::Unauthorized);
        }
    }

    let Json(request) = body.map_err(|rejection| IntakeError::Validation(rejection.body_text()))?;
    let task = request.into_task(config.webhook.default_url.as_deref(), || {
        uuid::Uuid::new_v4().to_string()
    })?;
    let task_id = task.id.clone();

    tracing::info!(
        task_id = %task_id,
        image = task.image.as_ref().map(|image| image.kind()).unwrap_or("none"),
        has_style = task.style.is_some(),
        "task accepted"
    );
    // Detached: the outcome reaches the caller through the webhook only.
    drop(state.runner.spawn(task));

    Ok(Json(Acknowledgement {
        message: ACK_MESSAGE,
        task_id,
    }))
}
