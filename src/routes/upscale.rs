use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::job::{JobId, JobInput, JobState, JobStatus, JobSummary};
use crate::models::options::UpscaleForm;
use crate::models::upscale::JobCreateResponse;
use crate::services::codec;
use crate::telemetry;

/// Unparseable ids can never name a job, so they are reported as unknown.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

/// POST /api/v1/upscale/job — Upload an image and queue it for upscaling.
///
/// Options come from multipart text fields (`factor`, `denoise`, `use_tfhub`,
/// `backend`), falling back to the query string. Responds 202 with the job id
/// without waiting for processing.
pub async fn submit_job(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<JobCreateResponse>)> {
    let Query(query_pairs) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let query_form = UpscaleForm::from_pairs(query_pairs)?;
    let mut multipart = multipart.map_err(|e| ApiError::Validation(e.body_text()))?;

    let mut form = UpscaleForm::default();
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == "file" {
            file = Some(field.bytes().await?);
        } else {
            let value = field.text().await?;
            form.apply_field(&name, &value)?;
        }
    }

    let options = form.or(query_form).into_options()?;
    let bytes = file.ok_or_else(|| ApiError::Validation("missing `file` field".to_string()))?;

    let upscaler = state.upscalers.get(options.backend);
    if !upscaler.is_available() {
        return Err(ApiError::BackendUnavailable(format!(
            "the {} backend is not available on this server",
            options.backend
        )));
    }
    let effective_factor = upscaler.output_factor(options.factor);

    let probed = codec::probe(&bytes, &state.config.image_limits(), effective_factor)?;

    let ticket = state.store.create(
        JobInput {
            bytes,
            format: probed.format,
            width: probed.width,
            height: probed.height,
            options,
        },
        effective_factor,
    );
    let id = ticket.id();

    tracing::info!(
        job_id = %id,
        backend = %options.backend,
        requested_factor = options.factor.get(),
        effective_factor = effective_factor.get(),
        denoise = options.denoise,
        width = probed.width,
        height = probed.height,
        "Upscale job created"
    );
    if effective_factor != options.factor {
        tracing::info!(
            job_id = %id,
            requested_factor = options.factor.get(),
            effective_factor = effective_factor.get(),
            "Backend overrides requested factor"
        );
    }

    state.runner.dispatch(ticket);
    telemetry::record_submitted(options.backend);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreateResponse {
            id,
            status: JobStatus::Pending,
            backend: options.backend,
            requested_factor: options.factor,
            effective_factor,
            factor_overridden: effective_factor != options.factor,
        }),
    ))
}

/// GET /api/v1/upscale/job/{id} — Current job status. Never waits.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    let id = parse_job_id(&raw_id)?;
    Ok(Json(state.store.summary(id)?))
}

/// GET /api/v1/upscale/job/{id}/result — Upscaled image bytes once done.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_job_id(&raw_id)?;
    let job = state.store.get(id)?;

    match job.state {
        JobState::Done(output) => Ok((
            [(header::CONTENT_TYPE, output.content_type)],
            output.bytes,
        )
            .into_response()),
        JobState::Pending | JobState::Processing => Err(ApiError::NotReady(id)),
        JobState::Error(failure) => Err(ApiError::JobFailed(failure.message)),
    }
}
