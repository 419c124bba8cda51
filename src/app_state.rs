use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    runner::{JobRunner, RunnerSettings},
    store::JobStore,
    upscaler::Upscalers,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<JobStore>,
    pub runner: Arc<JobRunner>,
    pub upscalers: Arc<Upscalers>,
}

impl AppState {
    /// Build state around a fresh job store and start its runner.
    /// Must be called inside a Tokio runtime.
    pub fn new(config: AppConfig, upscalers: Upscalers) -> Self {
        let store = Arc::new(JobStore::new());
        let upscalers = Arc::new(upscalers);
        let runner = JobRunner::start(
            Arc::clone(&store),
            Arc::clone(&upscalers),
            RunnerSettings::from_config(&config),
        );

        Self {
            config: Arc::new(config),
            store,
            runner: Arc::new(runner),
            upscalers,
        }
    }
}
