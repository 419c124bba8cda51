use axum::body::Bytes;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use uuid::Uuid;

use crate::models::options::{Backend, ScaleFactor, UpscaleOptions};

pub type JobId = Uuid;

/// Status of an upscaling job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Failure classes recorded on errored jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidImage,
    PayloadTooLarge,
    BackendUnavailable,
    ProcessingError,
    Timeout,
}

/// Uploaded image plus the options it was submitted with. Immutable once stored.
#[derive(Debug)]
pub struct JobInput {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub options: UpscaleOptions,
}

/// Encoded output of a finished job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Lifecycle state. Result and error live inside the terminal variants, so a
/// job can never carry both.
#[derive(Debug, Clone)]
pub enum JobState {
    Pending,
    Processing,
    Done(JobOutput),
    Error(JobFailure),
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Processing => JobStatus::Processing,
            JobState::Done(_) => JobStatus::Done,
            JobState::Error(_) => JobStatus::Error,
        }
    }
}

/// An upscaling job as held by the job store.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub progress: f32,
    pub input: Arc<JobInput>,
    /// Factor the selected backend will actually apply.
    pub effective_factor: ScaleFactor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn backend(&self) -> Backend {
        self.input.options.backend
    }

    /// Lightweight view for status polling; never copies image bytes.
    pub fn summary(&self) -> JobSummary {
        let (error, error_kind) = match &self.state {
            JobState::Error(failure) => (Some(failure.message.clone()), Some(failure.kind)),
            _ => (None, None),
        };
        let (width, height, content_type) = match &self.state {
            JobState::Done(output) => (
                Some(output.width),
                Some(output.height),
                Some(output.content_type),
            ),
            _ => (None, None, None),
        };
        let requested_factor = self.input.options.factor;

        JobSummary {
            id: self.id,
            status: self.status(),
            progress: self.progress,
            backend: self.backend(),
            requested_factor,
            effective_factor: self.effective_factor,
            factor_overridden: requested_factor != self.effective_factor,
            denoise: self.input.options.denoise,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error,
            error_kind,
            width,
            height,
            content_type,
        }
    }
}

/// Status document returned to pollers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f32,
    pub backend: Backend,
    pub requested_factor: ScaleFactor,
    pub effective_factor: ScaleFactor,
    pub factor_overridden: bool,
    pub denoise: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<&'static str>,
}
