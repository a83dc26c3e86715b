use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    JobStatusResponse, JobSummary, SubmitArtifactRequest, SubmitArtifactResponse,
};
use crate::models::job::RetrievalSnapshot;
use crate::services::jobs::{CreateJobRequest, JobError};

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

/// POST /api/v1/artifacts — Submit an artifact generation job.
///
/// Idempotent: resubmitting while an identical request is still active
/// returns the existing job with 200 instead of creating a new one (202).
pub async fn submit_artifact(
    State(state): State<AppState>,
    Json(request): Json<SubmitArtifactRequest>,
) -> Result<(StatusCode, Json<SubmitArtifactResponse>), (StatusCode, String)> {
    request
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    // Legacy bare-array snapshots get tagged with the pool's current scheme.
    let snapshot = RetrievalSnapshot::parse(
        &request.snapshot,
        &state.embedding_model,
        &state.chunking_version,
    )
    .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid snapshot: {e}")))?;

    let created = state
        .jobs
        .create_job(
            CreateJobRequest {
                user_id: request.user_id,
                notebook_id: request.notebook_id,
                artifact_type: request.artifact_type,
                content: request.content,
                source_ids: request.source_ids,
                options: request.options,
                token_budget: request.token_budget,
            },
            snapshot,
        )
        .await
        .map_err(|e| match e {
            JobError::OptionsMismatch { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
            _ => {
                tracing::error!(error = %e, "failed to create job");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        })?;

    let status_code = if created.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status_code,
        Json(SubmitArtifactResponse {
            job_id: created.job.id,
            status: created.job.status.to_string(),
            deduplicated: created.deduplicated,
        }),
    ))
}

/// GET /api/v1/artifacts/{job_id} — Poll job status and result.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state
        .jobs
        .get_job(job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(JobStatusResponse::from(&job)))
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    pub user_id: String,
    pub limit: Option<i64>,
}

/// GET /api/v1/artifacts?user_id=… — List a user's recent jobs.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobSummary>>, StatusCode> {
    if query.user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let jobs = state.jobs.list_jobs(&query.user_id, limit).await.map_err(|e| {
        tracing::error!(user_id = %query.user_id, error = %e, "failed to list jobs");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(jobs.iter().map(JobSummary::from).collect()))
}
