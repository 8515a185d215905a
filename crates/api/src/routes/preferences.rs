//! Per-user channel preference routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_common::types::ChannelPreference;
use herald_engine::preferences::PreferenceService;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/v1/users/{id}/preferences",
        get(get_preferences).put(replace_preferences),
    )
}

/// GET /v1/users/:id/preferences — All channel preferences for a user.
async fn get_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ChannelPreference>>, AppError> {
    let preferences = PreferenceService::list(state.preferences.as_ref(), &user_id).await?;
    Ok(Json(preferences))
}

/// PUT /v1/users/:id/preferences — Replace the user's whole preference set.
async fn replace_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<Vec<ChannelPreference>>, JsonRejection>,
) -> Result<Json<Vec<ChannelPreference>>, AppError> {
    let Json(preferences) =
        payload.map_err(|_| AppError::Validation("Invalid request body".to_string()))?;

    let stored =
        PreferenceService::replace(state.preferences.as_ref(), &user_id, &preferences).await?;
    Ok(Json(stored))
}
