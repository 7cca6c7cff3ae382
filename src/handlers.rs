//! HTTP handlers for the operational surface

use crate::drain::DrainState;
use crate::NotificationEngine;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// Health check covering the drain loop and every registered adapter.
/// Any unhealthy adapter degrades the whole report to 503.
pub async fn health(State(engine): State<Arc<NotificationEngine>>) -> Response {
    let adapters = engine.adapter_health().await;
    let all_healthy = adapters.iter().all(|(_, report)| report.healthy);

    let drain_state = match engine.drain_state() {
        DrainState::Idle => "idle",
        DrainState::Draining => "draining",
    };

    let body = json!({
        "status": if all_healthy { "healthy" } else { "degraded" },
        "drain": {
            "state": drain_state,
            "last_cycle": engine.last_cycle().map(|report| json!({
                "fetched": report.fetched,
                "skipped": report.skipped,
                "sent": report.sent,
                "failed": report.failed,
                "duration_ms": report.duration.as_millis() as u64,
            })),
        },
        "channels": adapters
            .iter()
            .map(|(channel, report)| json!({
                "channel": channel.as_str(),
                "healthy": report.healthy,
                "detail": report.detail,
            }))
            .collect::<Vec<_>>(),
        "timestamp": Utc::now(),
    });

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// Prometheus text exposition of the engine's metrics registry
pub async fn metrics(State(engine): State<Arc<NotificationEngine>>) -> Response {
    match engine.metrics().export() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
