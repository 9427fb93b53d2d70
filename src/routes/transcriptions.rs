use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::job::{JobState, JobStatus};
use crate::models::transcription::{JobStatusResponse, UploadResponse};
use crate::routes::extract::AuthUser;
use crate::services::queue::QueuedJob;
use crate::services::reconcile::{self, ReconcileError, Reconciliation};

const AUDIO_FIELD: &str = "audio";

/// Body limit rejections become 413, everything else is a bad request.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::Validation(format!("Malformed upload: {e}"))
    }
}

/// POST /api/v1/transcriptions: upload a recording and start transcription.
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if state.users.find_by_id(user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let mut audio = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(AUDIO_FIELD) {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(multipart_error)?;
            audio = Some((filename, data));
        }
    }

    let (filename, data) =
        audio.ok_or_else(|| ApiError::Validation("No audio file provided".to_string()))?;
    if filename.trim().is_empty() {
        return Err(ApiError::Validation("No audio file selected".to_string()));
    }
    if data.is_empty() {
        return Err(ApiError::Validation("Audio file is empty".to_string()));
    }
    if data.len() > state.config.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let path = state.storage.save(user_id, &filename, &data).await?;

    let job = match state.jobs.create(user_id, path.clone()).await {
        Ok(job) => job,
        Err(e) => {
            state.storage.remove_artifacts(&path).await;
            return Err(e.into());
        }
    };

    if let Err(e) = state.queue.enqueue(&QueuedJob::new(job.id)).await {
        let failed = JobState::Failed {
            error: "Job could not be queued".to_string(),
        };
        if let Err(store_err) = state.jobs.set_state(job.id, failed).await {
            tracing::error!(job_id = %job.id, error = %store_err, "Failed to mark unqueued job as failed");
        }
        state.storage.remove_artifacts(&path).await;
        return Err(e.into());
    }

    metrics::counter!("transcription_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job.id,
        user_id = %user_id,
        bytes = data.len(),
        "Transcription job submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id: job.id,
            state: JobStatus::Pending,
            message: "Audio uploaded and transcription started".to_string(),
        }),
    ))
}

/// GET /api/v1/transcriptions/{job_id}: poll a job; a finished transcript
/// is written into the caller's motto on first observation.
pub async fn status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(JobStatusResponse::not_found(job_id.clone())),
        )
            .into_response()
    };

    let Ok(id) = Uuid::parse_str(&job_id) else {
        return Ok(not_found());
    };
    // Jobs of other users are reported exactly like unknown ones.
    let job = match state.jobs.get(id).await? {
        Some(job) if job.owner == user_id => job,
        _ => return Ok(not_found()),
    };

    let mut response = JobStatusResponse {
        job_id: job.id.to_string(),
        state: job.state.status(),
        status: String::new(),
        result: None,
        error: None,
        message: None,
    };

    match &job.state {
        JobState::Pending => {
            response.status = "Transcription is pending...".to_string();
        }
        JobState::Processing => {
            response.status = "Transcription is in progress...".to_string();
        }
        JobState::Failed { error } => {
            response.status = "Transcription failed".to_string();
            response.error = Some(error.clone());
        }
        JobState::Succeeded { result } => {
            response.status = "Transcription completed".to_string();
            response.result = Some(result.clone());

            let outcome = reconcile::apply_result(
                state.jobs.as_ref(),
                state.users.as_ref(),
                &state.cipher,
                job.id,
                user_id,
                result,
            )
            .await;

            response.message = Some(match outcome {
                Ok(Reconciliation::Applied) | Ok(Reconciliation::AlreadyApplied) => {
                    "Transcription completed and motto updated".to_string()
                }
                Ok(Reconciliation::InProgress) => {
                    "Transcription completed; motto update in progress".to_string()
                }
                Err(ReconcileError::UserMissing) => {
                    tracing::warn!(job_id = %job.id, user_id = %user_id, "User vanished before reconciliation");
                    let mut body = JobStatusResponse::not_found(job_id.clone());
                    body.message = Some("User not found".to_string());
                    return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to update user motto");
                    "Transcription completed; motto update will be retried".to_string()
                }
            });
        }
    }

    Ok(Json(response).into_response())
}
