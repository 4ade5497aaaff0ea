use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::shared::AppState;
use crate::websockets::websocket_handler;

/// Builds the HTTP surface of the chat server
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/v1/chat", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
