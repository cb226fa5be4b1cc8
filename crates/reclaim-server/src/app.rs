use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::require_admin_token, routes, state::AppState};

/// Construct the Axum [`Router`].
///
/// `/health` stays open for container health checks; everything under `/api` goes
/// through the admin-token check.
pub fn build_app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/events", post(routes::events::ingest_event))
        .route("/api/carts/{cart_id}", get(routes::carts::get_cart))
        .route(
            "/api/carts/{cart_id}/actions",
            get(routes::carts::list_cart_actions),
        )
        .route(
            "/api/carts/{cart_id}/recovered",
            post(routes::carts::mark_recovered),
        )
        .route(
            "/api/carts/{cart_id}/expired",
            post(routes::carts::mark_expired),
        )
        .route(
            "/api/actions/{action_id}/engagement",
            post(routes::actions::record_engagement),
        )
        .route(
            "/api/users/{user_id}/recovery-settings",
            get(routes::settings::get_settings).put(routes::settings::put_settings),
        )
        .route("/api/passes/{pass}", post(routes::passes::run_pass))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_admin_token,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
