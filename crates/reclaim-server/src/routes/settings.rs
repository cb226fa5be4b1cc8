use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use reclaim_core::settings::RecoverySettings;

use crate::{error::AppError, state::AppState};

/// Stored settings, or the defaults (disabled) with `configured: false`.
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stored = state
        .db
        .get_recovery_settings(&user_id)
        .await
        .map_err(AppError::Internal)?;
    let configured = stored.is_some();
    Ok(Json(json!({
        "data": stored.unwrap_or_default(),
        "configured": configured
    })))
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(settings): Json<RecoverySettings>,
) -> Result<impl IntoResponse, AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }
    settings.validate()?;
    state
        .db
        .upsert_recovery_settings(&user_id, &settings)
        .await
        .map_err(AppError::Internal)?;
    info!(user_id = %user_id, enabled = settings.enabled, "recovery settings updated");
    Ok(Json(json!({ "data": settings, "configured": true })))
}
