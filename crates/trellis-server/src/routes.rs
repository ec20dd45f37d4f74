//! HTTP ingest and query surface.
//!
//! - `POST /events` — accepts one [`EventBatch`], reconciles it, and
//!   acknowledges per batch (not per event) with the reconcile summary.
//! - `GET /tasks/:id` — read-through task lookup for callers polling task
//!   state.
//! - `GET /health` — liveness probe.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use trellis_core::{EventBatch, TaskId};

use crate::reconcile::Reconciler;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The reconciliation engine behind the ingest route.
    pub reconciler: Arc<Reconciler>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
}

/// Error body returned by failing handlers.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable failure description.
    pub message: String,
}

/// Builds the ingest/query router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(ingest_events))
        .route("/tasks/:id", get(get_task))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn ingest_events(
    State(state): State<AppState>,
    Json(batch): Json<EventBatch>,
) -> Response {
    match state.reconciler.reconcile(batch).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "batch reconciliation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = TaskId::new(id);
    match state.reconciler.lookup(&id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                message: format!("task not found: {id}"),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(task_id = %id, error = %e, "task lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
