//! HTTP API: status query, chunked SSE inference, persistent WebSocket
//! inference.

pub mod inference;
pub mod status;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(status::router())
        .merge(inference::router())
        .merge(ws::router())
}
