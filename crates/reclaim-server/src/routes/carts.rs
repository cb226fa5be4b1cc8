use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use reclaim_core::error::CoreError;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct MarkRecoveredRequest {
    pub recovered_value: f64,
}

pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state
        .db
        .get_cart(&cart_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| CoreError::cart_not_found(&cart_id))?;
    Ok(Json(json!({ "data": cart })))
}

pub async fn list_cart_actions(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if state
        .db
        .get_cart(&cart_id)
        .await
        .map_err(AppError::Internal)?
        .is_none()
    {
        return Err(CoreError::cart_not_found(&cart_id).into());
    }
    let actions = state
        .db
        .list_actions_for_cart(&cart_id)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "data": actions })))
}

pub async fn mark_recovered(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
    Json(req): Json<MarkRecoveredRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !req.recovered_value.is_finite() || req.recovered_value < 0.0 {
        return Err(AppError::BadRequest(
            "recovered_value must be a non-negative number".to_string(),
        ));
    }
    let cart = state
        .engine
        .mark_recovered(&cart_id, req.recovered_value, Utc::now())
        .await?;
    Ok(Json(json!({ "data": cart })))
}

pub async fn mark_expired(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state.engine.mark_expired(&cart_id, Utc::now()).await?;
    Ok(Json(json!({ "data": cart })))
}
