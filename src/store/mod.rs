//! Job Store contract and implementations.
//!
//! Every mutating method is a single atomic find-one-and-update: the store
//! locates one matching record and mutates it in the same indivisible step.
//! Callers never read a job and write it back separately; that would
//! reintroduce the race the atomic claim exists to prevent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::artifact::{Artifact, Plan};
use crate::models::job::Job;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("an active job with the same fingerprint already exists")]
    DuplicateActive,

    #[error("corrupt job row: {0}")]
    Corrupt(String),
}

/// Running token total after an atomic increment.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub tokens_used: i64,
    pub token_budget: i64,
}

impl TokenUsage {
    pub fn within_budget(&self) -> bool {
        self.tokens_used <= self.token_budget
    }
}

/// Persistence contract for artifact jobs.
///
/// Conditional updates return `Ok(None)` when no record matched the guard
/// (wrong status, or job missing); the caller decides how loudly to fail.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with [`StoreError::DuplicateActive`] if an
    /// active job with the same fingerprint already exists.
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Find the non-terminal job carrying this fingerprint, if any.
    async fn find_active_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<Job>, StoreError>;

    /// Atomically claim the oldest pending job: transition it to `planning`,
    /// record the worker, reset progress and stamp `started_at`. Under
    /// concurrent callers at most one receives any given job.
    async fn claim_next_pending(&self, worker_id: &str) -> Result<Option<Job>, StoreError>;

    /// Raise progress (monotonic: the stored value never decreases) while the
    /// job is in a processing status.
    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<Option<Job>, StoreError>;

    /// Persist the plan; requires the job to be in `planning`.
    async fn store_plan(&self, id: Uuid, plan: &Plan) -> Result<Option<Job>, StoreError>;

    /// Transition `from` -> `to`; matches only if the job currently holds
    /// `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: crate::models::job::JobStatus,
        to: crate::models::job::JobStatus,
    ) -> Result<Option<Job>, StoreError>;

    /// Terminal success: requires `validating`, sets progress to 100, stores
    /// the result and stamps `completed_at`.
    async fn mark_completed(&self, id: Uuid, result: &Artifact) -> Result<Option<Job>, StoreError>;

    /// Record a failed attempt for a job in a processing status. In the same
    /// atomic update: if `retry_count < max_retries` the job is requeued to
    /// `pending` (counter incremented, progress and ownership reset),
    /// otherwise it becomes terminally `failed`.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        max_retries: i32,
    ) -> Result<Option<Job>, StoreError>;

    /// Force a processing job straight to terminal `failed`, bypassing the
    /// retry policy.
    async fn mark_failed_permanently(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<Job>, StoreError>;

    /// Atomically add to `tokens_used` and return the new totals.
    async fn add_tokens_used(&self, id: Uuid, tokens: i64)
        -> Result<Option<TokenUsage>, StoreError>;

    /// Fail every processing job whose `started_at` predates `cutoff`.
    /// Returns the number of jobs transitioned.
    async fn expire_stuck(&self, cutoff: DateTime<Utc>, error: &str) -> Result<u64, StoreError>;

    async fn list_recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError>;

    /// Retention sweep: delete terminal jobs older than `cutoff`.
    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Initialize PostgreSQL connection pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
