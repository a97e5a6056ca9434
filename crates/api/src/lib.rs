mod auth;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use alerts::SubscriptionStore;
use common::{Result, SnapshotHandle};

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub snapshot: SnapshotHandle,
    pub store: Arc<dyn SubscriptionStore>,
    pub dashboard_token: String,
}

/// All routes with state applied. `/healthz` is open, `/api/*` needs the
/// dashboard bearer token.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(routes::api_router(state.clone()))
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    info!(%addr, "Dashboard API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
