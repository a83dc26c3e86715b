use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::artifact::{Artifact, ArtifactType, GenerationOptions};
use crate::models::job::Job;

/// Request to submit an artifact generation job.
///
/// `snapshot` is the retrieval snapshot captured by the caller at submission
/// time, either the versioned wrapper shape or a legacy bare chunk array.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitArtifactRequest {
    #[garde(length(min = 1, max = 128))]
    pub user_id: String,

    #[garde(length(min = 1, max = 128))]
    pub notebook_id: String,

    #[garde(skip)]
    pub artifact_type: ArtifactType,

    #[garde(inner(length(max = 20_000)))]
    pub content: Option<String>,

    #[garde(length(min = 1, max = 256), inner(length(min = 1, max = 256)))]
    pub source_ids: Vec<String>,

    #[garde(skip)]
    pub options: GenerationOptions,

    #[garde(skip)]
    pub snapshot: serde_json::Value,

    #[garde(inner(range(min = 1)))]
    pub token_budget: Option<i64>,
}

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitArtifactResponse {
    pub job_id: Uuid,
    pub status: String,
    /// True when an identical active request already existed and its job id
    /// was returned instead of creating a new one.
    pub deduplicated: bool,
}

/// Response for polling job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: i32,
    pub result: Option<Artifact>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status.to_string(),
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
            retry_count: job.retry_count,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Compact job listing entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub artifact_type: String,
    pub status: String,
    pub progress: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            artifact_type: job.artifact_type.to_string(),
            status: job.status.to_string(),
            progress: job.progress,
            created_at: job.created_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
        }
    }
}
