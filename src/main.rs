use std::sync::Arc;

use image_upscaler::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        sweeper,
        upscaler::{FastResampler, ModelUpscaler, Upscalers},
    },
    telemetry,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-upscaler server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle =
        Arc::new(telemetry::init_metrics().expect("Failed to install Prometheus metrics recorder"));

    // Model weights load once, in the background, so startup is not blocked
    let model = Arc::new(ModelUpscaler::new(config.model_path.clone()));
    if config.model_path.is_some() {
        let model = Arc::clone(&model);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = model.warm_up() {
                tracing::warn!(error = %e, "Model backend disabled");
            }
        });
    } else {
        tracing::info!("MODEL_PATH not set, model backend disabled");
    }
    let upscalers = Upscalers::new(Arc::new(FastResampler::new()), model);

    // Create shared application state (starts the job runner)
    let state = AppState::new(config.clone(), upscalers);

    // Evict finished jobs after their TTL
    if let Some(ttl) = config.job_ttl() {
        tracing::info!(ttl_secs = ttl.as_secs(), "Starting job sweeper");
        sweeper::spawn_sweeper(Arc::clone(&state.store), ttl, config.sweep_interval());
    }

    let app = routes::router(state, Some(prometheus_handle));

    tracing::info!("Starting image-upscaler on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
