use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct PassQuery {
    pub limit: Option<i64>,
}

/// `POST /api/passes/{detection|scheduling|conversions}`: run one pass now
/// and return its summary.
pub async fn run_pass(
    State(state): State<Arc<AppState>>,
    Path(pass): Path<String>,
    Query(query): Query<PassQuery>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let summary = match pass.as_str() {
        "detection" => json!(state.engine.run_detection(now).await?),
        "scheduling" => json!(state.engine.run_scheduling(now).await?),
        "conversions" => {
            let limit = query
                .limit
                .unwrap_or(state.config.reporter_batch_size)
                .clamp(1, 500);
            json!(state.engine.run_conversion_reporting(limit, now).await?)
        }
        other => return Err(AppError::NotFound(format!("unknown pass: {other}"))),
    };
    Ok(Json(json!({ "pass": pass, "data": summary })))
}
