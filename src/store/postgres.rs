use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::models::artifact::{Artifact, Plan};
use crate::models::job::{Job, JobStatus, RetrievalSnapshot};
use crate::store::{JobStore, StoreError, TokenUsage};

/// PostgreSQL-backed job store. Every conditional update is one SQL
/// statement, so the row transition is atomic under concurrent workers.
pub struct PgJobStore {
    pool: PgPool,
}

const JOB_COLUMNS: &str = "id, user_id, notebook_id, artifact_type, content, source_ids, options, \
     status, progress, request_fingerprint, retrieval_snapshot, plan, result, error, retry_count, \
     tokens_used, token_budget, worker_id, created_at, started_at, completed_at, updated_at";

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status_text: String = row.try_get("status")?;
    let status = status_text
        .parse::<JobStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown status '{status_text}'")))?;

    let type_text: String = row.try_get("artifact_type")?;
    let artifact_type = type_text
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown artifact type '{type_text}'")))?;

    let snapshot_value: serde_json::Value = row.try_get("retrieval_snapshot")?;
    let snapshot = RetrievalSnapshot::parse(&snapshot_value, "unversioned", "unversioned")?;

    let options = serde_json::from_value(row.try_get::<serde_json::Value, _>("options")?)?;
    let plan: Option<Plan> = row
        .try_get::<Option<serde_json::Value>, _>("plan")?
        .map(serde_json::from_value)
        .transpose()?;
    let result: Option<Artifact> = row
        .try_get::<Option<serde_json::Value>, _>("result")?
        .map(serde_json::from_value)
        .transpose()?;

    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        notebook_id: row.try_get("notebook_id")?,
        artifact_type,
        content: row.try_get("content")?,
        source_ids: row.try_get("source_ids")?,
        options,
        status,
        progress: row.try_get("progress")?,
        request_fingerprint: row.try_get("request_fingerprint")?,
        snapshot,
        plan,
        result,
        error: row.try_get("error")?,
        retry_count: row.try_get("retry_count")?,
        tokens_used: row.try_get("tokens_used")?,
        token_budget: row.try_get("token_budget")?,
        worker_id: row.try_get("worker_id")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO artifact_jobs
                (id, user_id, notebook_id, artifact_type, content, source_ids, options,
                 status, progress, request_fingerprint, retrieval_snapshot,
                 retry_count, tokens_used, token_budget, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(job.id)
        .bind(&job.user_id)
        .bind(&job.notebook_id)
        .bind(job.artifact_type.to_string())
        .bind(&job.content)
        .bind(&job.source_ids)
        .bind(serde_json::to_value(&job.options)?)
        .bind(job.status.to_string())
        .bind(job.progress)
        .bind(&job.request_fingerprint)
        .bind(serde_json::to_value(&job.snapshot)?)
        .bind(job.retry_count)
        .bind(job.tokens_used)
        .bind(job.token_budget)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateActive)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM artifact_jobs WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_active_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM artifact_jobs \
             WHERE request_fingerprint = $1 AND status NOT IN ('completed', 'failed')"
        );
        let row = sqlx::query(&sql)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        // FOR UPDATE SKIP LOCKED guarantees two racing workers never both
        // match the same row.
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET status = 'planning',
                worker_id = $1,
                progress = 0,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM artifact_jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET progress = GREATEST(progress, $2),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('planning', 'generating', 'validating')
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(progress)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn store_plan(&self, id: Uuid, plan: &Plan) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET plan = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'planning'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(serde_json::to_value(plan)?)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET status = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(from.to_string())
            .bind(to.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn mark_completed(&self, id: Uuid, result: &Artifact) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET status = 'completed',
                progress = 100,
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'validating'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(serde_json::to_value(result)?)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        max_retries: i32,
    ) -> Result<Option<Job>, StoreError> {
        // The CASE expressions all see the pre-update retry_count, so the
        // retry-or-fail branch happens inside the single atomic update.
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET retry_count = retry_count + 1,
                error = $2,
                status = CASE WHEN retry_count < $3 THEN 'pending' ELSE 'failed' END,
                started_at = CASE WHEN retry_count < $3 THEN NULL ELSE started_at END,
                worker_id = CASE WHEN retry_count < $3 THEN NULL ELSE worker_id END,
                progress = CASE WHEN retry_count < $3 THEN 0 ELSE progress END,
                completed_at = CASE WHEN retry_count < $3 THEN NULL ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('planning', 'generating', 'validating')
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(error)
            .bind(max_retries)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn mark_failed_permanently(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE artifact_jobs
            SET status = 'failed',
                error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('planning', 'generating', 'validating')
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(error)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn add_tokens_used(
        &self,
        id: Uuid,
        tokens: i64,
    ) -> Result<Option<TokenUsage>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE artifact_jobs
            SET tokens_used = tokens_used + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING tokens_used, token_budget
            "#,
        )
        .bind(id)
        .bind(tokens)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(TokenUsage {
                tokens_used: r.try_get("tokens_used")?,
                token_budget: r.try_get("token_budget")?,
            }),
            None => None,
        })
    }

    async fn expire_stuck(&self, cutoff: DateTime<Utc>, error: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE artifact_jobs
            SET status = 'failed',
                error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status IN ('planning', 'generating', 'validating')
              AND started_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM artifact_jobs \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM artifact_jobs
            WHERE status IN ('completed', 'failed') AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
