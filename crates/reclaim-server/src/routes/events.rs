use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use reclaim_core::normalize::normalize_shopify;

use crate::{error::AppError, state::AppState};

const TOPIC_HEADER: &str = "x-shopify-topic";

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub user_id: String,
    pub integration_id: String,
    /// Falls back to the `X-Shopify-Topic` header when absent.
    #[serde(default)]
    pub topic: Option<String>,
    pub payload: Value,
}

/// `POST /api/events`: normalize one Shopify checkout or order webhook and
/// store it for the next detection pass.
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let topic = req
        .topic
        .clone()
        .or_else(|| {
            headers
                .get(TOPIC_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .ok_or_else(|| AppError::Unprocessable {
            field: Some("topic"),
            message: "webhook topic is required".to_string(),
        })?;

    let event = normalize_shopify(
        &req.user_id,
        &req.integration_id,
        topic.trim(),
        &req.payload,
        &state.email_policy,
    )
    .map_err(|e| {
        warn!(user_id = %req.user_id, topic = %topic, error = %e, "webhook payload rejected");
        AppError::from(e)
    })?;

    state
        .db
        .insert_checkout_event(&event)
        .await
        .map_err(AppError::Internal)?;
    info!(
        event_id = %event.id,
        user_id = %event.user_id,
        event_type = event.event_type.as_str(),
        "checkout event stored"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "id": event.id,
                "event_type": event.event_type,
                "platform_cart_id": event.platform_cart_id,
                "has_email": event.customer_email.is_some()
            }
        })),
    ))
}
