use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
/// `status` is "ok" only while the last refresh cycle was healthy.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.snapshot.load().await;
    Json(json!({
        "status": if snapshot.healthy { "ok" } else { "degraded" },
        "cycle": snapshot.cycle,
        "generated_at": snapshot.generated_at,
        "symbols": snapshot.states.len(),
        "last_error": snapshot.last_error,
    }))
}
