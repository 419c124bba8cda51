use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::store::StatusCounts;
use crate::services::upscaler::{BackendInfo, BackendStatus};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backends: Vec<BackendInfo>,
    pub jobs: StatusCounts,
    pub queue_depth: usize,
}

/// GET /health — service status with backend readiness and job counts.
///
/// The fast backend needs nothing external, so the service answers 200 even
/// when the model backend is unavailable; that case reports `degraded`.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let backends = state.upscalers.describe_all();
    let all_ready = backends
        .iter()
        .all(|info| info.status != BackendStatus::Unavailable);

    let response = HealthResponse {
        status: if all_ready {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        backends,
        jobs: state.store.counts(),
        queue_depth: state.runner.queue_depth(),
    };

    (StatusCode::OK, Json(response))
}
