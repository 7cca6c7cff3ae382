//! Route definitions for the operational HTTP surface

use crate::handlers;
use crate::NotificationEngine;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the operational router: health and metrics only. Delivery runs on
/// the drain loop, not behind HTTP.
pub fn create_router(engine: Arc<NotificationEngine>) -> Router {
    let timeout = Duration::from_secs(engine.config().server.timeout_seconds);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(engine)
}
