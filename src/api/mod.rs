use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::AppState;

pub mod handlers;

/// Gateway routes. Rate limiting wraps the router but only engages on
/// `POST /gateway`; recording happens after a 200 is observed.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/gateway", post(handlers::gateway))
        .route("/mcp/gateway", post(handlers::mcp_gateway))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::rate_limit_middleware,
        ))
        .with_state(state)
}
