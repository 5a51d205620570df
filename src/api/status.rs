//! Gateway status endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::admission::AdmissionStatus;
use crate::state::AppState;

/// Build the status router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/status", get(status))
}

/// GET /v1/status - current queue and concurrency occupancy.
async fn status(State(state): State<Arc<AppState>>) -> Json<AdmissionStatus> {
    Json(state.admission.status())
}
