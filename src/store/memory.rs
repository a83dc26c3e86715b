use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::artifact::{Artifact, Plan};
use crate::models::job::{Job, JobStatus};
use crate::store::{JobStore, StoreError, TokenUsage};

/// In-memory job store. A single mutex makes every conditional update
/// indivisible, giving the same atomicity guarantees as the SQL store.
/// Used by tests and local development.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let duplicate = jobs.values().any(|j| {
            j.request_fingerprint == job.request_fingerprint && !j.status.is_terminal()
        });
        if duplicate {
            return Err(StoreError::DuplicateActive);
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_active_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .find(|j| j.request_fingerprint == fingerprint && !j.status.is_terminal())
            .cloned())
    }

    async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        // Oldest pending first; id as a tiebreaker for equal timestamps.
        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = next else { return Ok(None) };
        let job = jobs.get_mut(&id).ok_or_else(|| {
            StoreError::Corrupt("claimed job vanished under the lock".to_string())
        })?;
        job.status = JobStatus::Planning;
        job.worker_id = Some(worker_id.to_string());
        job.progress = 0;
        job.started_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|j| j.status.is_processing()) else {
            return Ok(None);
        };
        job.progress = job.progress.max(progress);
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn store_plan(&self, id: Uuid, plan: &Plan) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|j| j.status == JobStatus::Planning) else {
            return Ok(None);
        };
        job.plan = Some(plan.clone());
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|j| j.status == from) else {
            return Ok(None);
        };
        job.status = to;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, id: Uuid, result: &Artifact) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|j| j.status == JobStatus::Validating) else {
            return Ok(None);
        };
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result = Some(result.clone());
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        max_retries: i32,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|j| j.status.is_processing()) else {
            return Ok(None);
        };
        let retry = job.retry_count < max_retries;
        job.retry_count += 1;
        job.error = Some(error.to_string());
        if retry {
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.worker_id = None;
            job.progress = 0;
            job.completed_at = None;
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
        }
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn mark_failed_permanently(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id).filter(|j| j.status.is_processing()) else {
            return Ok(None);
        };
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn add_tokens_used(
        &self,
        id: Uuid,
        tokens: i64,
    ) -> Result<Option<TokenUsage>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.tokens_used += tokens;
        job.updated_at = Utc::now();
        Ok(Some(TokenUsage {
            tokens_used: job.tokens_used,
            token_budget: job.token_budget,
        }))
    }

    async fn expire_stuck(&self, cutoff: DateTime<Utc>, error: &str) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let mut count = 0u64;
        for job in jobs.values_mut() {
            let stuck = job.status.is_processing()
                && job.started_at.map(|t| t < cutoff).unwrap_or(false);
            if stuck {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, j| !(j.status.is_terminal() && j.created_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}
