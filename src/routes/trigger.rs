use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::deal_engine::{DealEngine, Trigger};

/// Liveness and manual-trigger endpoints.
pub fn trigger_routes(engine: Arc<DealEngine>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/trigger", get(trigger).post(trigger))
        .fallback(not_found)
        .layer(Extension(engine))
}

/// Always reports running; run outcomes never affect liveness.
async fn health() -> Json<Value> {
    Json(json!({"status": "running"}))
}

async fn trigger(Extension(engine): Extension<Arc<DealEngine>>) -> Json<Value> {
    info!("Manual run requested");
    tokio::spawn(async move {
        engine.run_once(Trigger::Manual).await;
    });
    Json(json!({"status": "triggered"}))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}
