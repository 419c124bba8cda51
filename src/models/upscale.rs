use serde::Serialize;

use crate::models::job::{JobId, JobStatus};
use crate::models::options::{Backend, ScaleFactor};

/// Response after submitting an image for upscaling.
#[derive(Debug, Serialize)]
pub struct JobCreateResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub backend: Backend,
    pub requested_factor: ScaleFactor,
    pub effective_factor: ScaleFactor,
    pub factor_overridden: bool,
}
