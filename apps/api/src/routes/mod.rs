pub mod health;

use std::collections::HashMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::documents::handlers::handle_upload;
use crate::evaluation::handlers::{handle_create_evaluation, handle_get_evaluation};
use crate::state::AppState;

/// GET /metrics
/// Read-only snapshot of the best-effort counters.
async fn metrics_handler(State(state): State<AppState>) -> Json<HashMap<String, u64>> {
    Json(state.metrics.snapshot())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/uploads", post(handle_upload))
        .route("/api/v1/evaluations", post(handle_create_evaluation))
        .route("/api/v1/evaluations/:id", get(handle_get_evaluation))
        .with_state(state)
}
