use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use reclaim_core::cart::EngagementKind;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct EngagementRequest {
    pub kind: EngagementKind,
}

/// `POST /api/actions/{action_id}/engagement` with `{"kind":"opened"|"clicked"}`.
pub async fn record_engagement(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    Json(req): Json<EngagementRequest>,
) -> Result<impl IntoResponse, AppError> {
    let action = state
        .engine
        .record_engagement(&action_id, req.kind, Utc::now())
        .await?;
    Ok(Json(json!({ "data": action })))
}
