use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::{auth::require_auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/signals", get(get_signals))
        .route("/api/subscriptions", get(get_subscriptions))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Signals ─────────────────────────────────────────────────────────────────

async fn get_signals(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.snapshot.load().await;
    let signals: Vec<Value> = snapshot
        .states
        .iter()
        .map(|(symbol, s)| {
            json!({
                "symbol": symbol,
                "signal": s.kind().to_string(),
                "buy": s.buy,
                "sell": s.sell,
                "fast": s.fast,
                "signal_line": s.signal,
                "as_of": s.as_of,
            })
        })
        .collect();

    Json(json!({
        "cycle": snapshot.cycle,
        "healthy": snapshot.healthy,
        "generated_at": snapshot.generated_at,
        "signals": signals,
    }))
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SubscriptionsQuery {
    chat_id: Option<i64>,
}

async fn get_subscriptions(
    State(state): State<AppState>,
    Query(q): Query<SubscriptionsQuery>,
) -> Response {
    let subscriptions = match state.store.list_all().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Failed to list subscriptions");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to list subscriptions"})),
            )
                .into_response();
        }
    };

    let rows: Vec<Value> = subscriptions
        .iter()
        .filter(|s| q.chat_id.map_or(true, |id| s.subscriber_id == id))
        .map(|s| {
            json!({
                "chat_id": s.subscriber_id,
                "selector": s.selector.to_string(),
            })
        })
        .collect();

    Json(json!({
        "total": rows.len(),
        "subscriptions": rows,
    }))
    .into_response()
}
