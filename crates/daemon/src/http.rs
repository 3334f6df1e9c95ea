//! Observability listener: `/health`, `/metrics` and `/status`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use kanshi_core::Orchestrator;

use crate::metrics;

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "running": orchestrator.is_running(),
    }))
}

async fn prometheus_metrics(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    metrics::collect_dynamic_metrics(&orchestrator).await;
    match metrics::encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
