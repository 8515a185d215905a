//! Notification ingestion and status routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_common::types::{NotificationLog, NotificationRequest};
use herald_engine::ingestion::Accepted;

use crate::extract::ClientKey;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/notifications", post(submit_notification))
        .route("/v1/notifications/{id}", get(get_notification))
}

/// POST /v1/notifications — Accept a notification for asynchronous delivery.
async fn submit_notification(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    payload: Result<Json<NotificationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), AppError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected unreadable notification request");
        AppError::Validation("Invalid request body".to_string())
    })?;

    let accepted = state.gateway.submit(&request, &client).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /v1/notifications/:id — Current delivery status of one notification.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NotificationLog>, AppError> {
    state
        .logs
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
}
