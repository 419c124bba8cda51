pub mod health;
pub mod metrics;
pub mod upscale;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the HTTP router. `/metrics` is only mounted when a Prometheus
/// handle is supplied.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    let mut app: Router = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/upscale/job", post(upscale::submit_job))
        .route("/api/v1/upscale/job/{id}", get(upscale::get_job_status))
        .route(
            "/api/v1/upscale/job/{id}/result",
            get(upscale::get_job_result),
        )
        .route("/api/v1/upscale/ws/job/{id}", get(ws::job_progress))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
}
