use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::artifact::{Artifact, ArtifactType, GenerationOptions, Plan};
use crate::models::job::{Job, JobStatus, RetrievalSnapshot};
use crate::services::fingerprint;
use crate::store::{JobStore, StoreError};

/// Error string prefix stamped on jobs reclaimed by the stuck-job sweep, so
/// operators can tell infrastructure crashes from logical failures.
pub const STUCK_ERROR: &str = "stuck/worker_restart: processing exceeded the stuck-job timeout";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("job {id} not found")]
    NotFound { id: Uuid },

    #[error("job {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: Uuid,
        expected: &'static str,
        actual: JobStatus,
    },

    #[error("options are tagged {options_type} but the request is for {requested}")]
    OptionsMismatch {
        options_type: ArtifactType,
        requested: ArtifactType,
    },
}

/// The job's snapshot was produced under a different retrieval scheme than
/// the worker pool currently runs; reprocessing it would generate against
/// semantically stale chunks.
#[derive(Debug, thiserror::Error)]
#[error("snapshot {field} mismatch: job has '{snapshot}', worker pool runs '{current}'")]
pub struct SnapshotMismatch {
    pub field: &'static str,
    pub snapshot: String,
    pub current: String,
}

/// Fields describing a new submission.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub user_id: String,
    pub notebook_id: String,
    pub artifact_type: ArtifactType,
    pub content: Option<String>,
    pub source_ids: Vec<String>,
    pub options: GenerationOptions,
    pub token_budget: Option<i64>,
}

/// Result of an idempotent create: either a fresh row or the already-active
/// job for the same fingerprint.
#[derive(Debug)]
pub struct CreatedJob {
    pub job: Job,
    pub deduplicated: bool,
}

/// Sole writer of job state. Wraps the store so that every mutation goes
/// through an atomic conditional update and every invariant is enforced in
/// one place.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    max_retries: i32,
    default_token_budget: i64,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, max_retries: i32, default_token_budget: i64) -> Self {
        Self {
            store,
            max_retries,
            default_token_budget,
        }
    }

    /// Idempotent create-or-return. If an active job already carries the
    /// request's fingerprint it is returned unchanged: no new row, no side
    /// effect. Terminal jobs do not block resubmission.
    pub async fn create_job(
        &self,
        request: CreateJobRequest,
        snapshot: RetrievalSnapshot,
    ) -> Result<CreatedJob, JobError> {
        if request.options.artifact_type() != request.artifact_type {
            return Err(JobError::OptionsMismatch {
                options_type: request.options.artifact_type(),
                requested: request.artifact_type,
            });
        }

        let fp = fingerprint::fingerprint(
            &request.user_id,
            &request.notebook_id,
            request.artifact_type,
            &request.source_ids,
            &request.options,
        )?;

        if let Some(existing) = self.store.find_active_by_fingerprint(&fp).await? {
            tracing::info!(
                job_id = %existing.id,
                fingerprint = %fp,
                "duplicate submission, returning active job"
            );
            return Ok(CreatedJob {
                job: existing,
                deduplicated: true,
            });
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            notebook_id: request.notebook_id,
            artifact_type: request.artifact_type,
            content: request.content,
            source_ids: request.source_ids,
            options: request.options,
            status: JobStatus::Pending,
            progress: 0,
            request_fingerprint: fp.clone(),
            snapshot,
            plan: None,
            result: None,
            error: None,
            retry_count: 0,
            tokens_used: 0,
            token_budget: request.token_budget.unwrap_or(self.default_token_budget),
            worker_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };

        match self.store.insert(&job).await {
            Ok(()) => {
                metrics::counter!("artifact_jobs_submitted_total").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    artifact_type = %job.artifact_type,
                    user_id = %job.user_id,
                    "job created"
                );
                Ok(CreatedJob {
                    job,
                    deduplicated: false,
                })
            }
            // Lost the insert race against a concurrent identical submission;
            // the winner's row is the active job.
            Err(StoreError::DuplicateActive) => {
                let existing = self
                    .store
                    .find_active_by_fingerprint(&fp)
                    .await?
                    .ok_or(StoreError::DuplicateActive)?;
                Ok(CreatedJob {
                    job: existing,
                    deduplicated: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_jobs(&self, user_id: &str, limit: i64) -> Result<Vec<Job>, JobError> {
        Ok(self.store.list_recent_for_user(user_id, limit).await?)
    }

    /// Atomically claim the oldest pending job for `worker_id`. Returns
    /// `None` when nothing is claimable.
    pub async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, JobError> {
        let claimed = self.store.claim_next_pending(worker_id).await?;
        if let Some(job) = &claimed {
            metrics::counter!("artifact_jobs_claimed_total").increment(1);
            tracing::info!(
                job_id = %job.id,
                worker_id = %worker_id,
                artifact_type = %job.artifact_type,
                retry_count = job.retry_count,
                "claimed job"
            );
        }
        Ok(claimed)
    }

    pub async fn update_progress(&self, id: Uuid, progress: i32) -> Result<Job, JobError> {
        let updated = self.store.update_progress(id, progress.clamp(0, 100)).await?;
        self.require(id, "a processing status", updated).await
    }

    pub async fn store_plan(&self, id: Uuid, plan: &Plan) -> Result<Job, JobError> {
        let updated = self.store.store_plan(id, plan).await?;
        self.require(id, "planning", updated).await
    }

    pub async fn mark_generating(&self, id: Uuid) -> Result<Job, JobError> {
        let updated = self
            .store
            .transition(id, JobStatus::Planning, JobStatus::Generating)
            .await?;
        self.require(id, "planning", updated).await
    }

    pub async fn mark_validating(&self, id: Uuid) -> Result<Job, JobError> {
        let updated = self
            .store
            .transition(id, JobStatus::Generating, JobStatus::Validating)
            .await?;
        self.require(id, "generating", updated).await
    }

    pub async fn mark_completed(&self, id: Uuid, result: &Artifact) -> Result<Job, JobError> {
        let updated = self.store.mark_completed(id, result).await?;
        let job = self.require(id, "validating", updated).await?;
        metrics::counter!("artifact_jobs_completed_total").increment(1);
        tracing::info!(job_id = %id, tokens_used = job.tokens_used, "job completed");
        Ok(job)
    }

    /// Record a failed attempt. At most `max_retries` automatic retries
    /// (requeue to pending), then permanent failure.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<Job, JobError> {
        let updated = self
            .store
            .record_failure(id, error, self.max_retries)
            .await?;
        let job = self.require(id, "a processing status", updated).await?;
        match job.status {
            JobStatus::Pending => {
                metrics::counter!("artifact_jobs_retried_total").increment(1);
                tracing::info!(
                    job_id = %id,
                    retry_count = job.retry_count,
                    error = %error,
                    "job requeued for retry"
                );
            }
            JobStatus::Failed => {
                metrics::counter!("artifact_jobs_failed_total").increment(1);
                tracing::warn!(
                    job_id = %id,
                    retry_count = job.retry_count,
                    error = %error,
                    "job failed permanently, retries exhausted"
                );
            }
            _ => {}
        }
        Ok(job)
    }

    /// Terminal failure that bypasses the retry policy. Used for conditions a
    /// retry cannot fix: budget exhaustion, incompatible snapshots, repair
    /// exhaustion.
    pub async fn mark_failed_permanently(&self, id: Uuid, error: &str) -> Result<Job, JobError> {
        let updated = self.store.mark_failed_permanently(id, error).await?;
        let job = self.require(id, "a processing status", updated).await?;
        metrics::counter!("artifact_jobs_failed_total").increment(1);
        tracing::warn!(job_id = %id, error = %error, "job failed permanently");
        Ok(job)
    }

    /// Atomically add to the job's token counter. Returns `false` when the
    /// new total exceeds the budget; the caller must treat that as fatal for
    /// the job.
    pub async fn increment_tokens_used(&self, id: Uuid, tokens: i64) -> Result<bool, JobError> {
        let usage = self
            .store
            .add_tokens_used(id, tokens.max(0))
            .await?
            .ok_or(JobError::NotFound { id })?;
        Ok(usage.within_budget())
    }

    /// Fail every processing job whose attempt started before
    /// `now - timeout`. Run at worker startup and periodically thereafter.
    pub async fn recover_stuck_jobs(&self, timeout: chrono::Duration) -> Result<u64, JobError> {
        let cutoff = Utc::now() - timeout;
        let recovered = self.store.expire_stuck(cutoff, STUCK_ERROR).await?;
        if recovered > 0 {
            metrics::counter!("artifact_jobs_recovered_total").increment(recovered);
            tracing::warn!(count = recovered, "recovered stuck jobs as failed");
        }
        Ok(recovered)
    }

    /// Age-based retention sweep over terminal jobs.
    pub async fn purge_old_jobs(&self, retention: chrono::Duration) -> Result<u64, JobError> {
        let cutoff = Utc::now() - retention;
        let deleted = self.store.delete_terminal_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(count = deleted, "purged terminal jobs past retention");
        }
        Ok(deleted)
    }

    /// Loud failure when a conditional update matched nothing: report the
    /// job's actual status (the worker may have lost ownership to a recovery
    /// sweep) instead of silently continuing.
    async fn require(
        &self,
        id: Uuid,
        expected: &'static str,
        updated: Option<Job>,
    ) -> Result<Job, JobError> {
        match updated {
            Some(job) => Ok(job),
            None => match self.store.get(id).await? {
                Some(job) => Err(JobError::InvalidTransition {
                    id,
                    expected,
                    actual: job.status,
                }),
                None => Err(JobError::NotFound { id }),
            },
        }
    }
}

/// Pure comparison of a job's snapshot scheme against what the worker pool
/// currently runs. A mismatched job is not reprocessable and must fail fast.
pub fn validate_snapshot_compatibility(
    snapshot: &RetrievalSnapshot,
    current_embedding_model: &str,
    current_chunking_version: &str,
) -> Result<(), SnapshotMismatch> {
    if snapshot.embedding_model != current_embedding_model {
        return Err(SnapshotMismatch {
            field: "embedding_model",
            snapshot: snapshot.embedding_model.clone(),
            current: current_embedding_model.to_string(),
        });
    }
    if snapshot.chunking_version != current_chunking_version {
        return Err(SnapshotMismatch {
            field: "chunking_version",
            snapshot: snapshot.chunking_version.clone(),
            current: current_chunking_version.to_string(),
        });
    }
    Ok(())
}
