//! Worker loop: claims pending jobs and drives each through the three-phase
//! pipeline (plan, generate, validate/repair). Many workers may run against
//! the same store; the atomic claim is the only synchronization between them.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::models::artifact::{Artifact, Violation};
use crate::models::job::{Job, JobStatus};
use crate::services::events::{EventPublisher, JobEvent};
use crate::services::generation::{Generator, Planner, Repairer, SemanticValidator};
use crate::services::guard::{GuardError, GuardedProvider, Phase};
use crate::services::jobs::{validate_snapshot_compatibility, JobError, JobService};
use crate::services::validation;

/// Progress checkpoints after each persisted phase.
const PROGRESS_PLANNED: i32 = 20;
const PROGRESS_GENERATED: i32 = 60;

/// How often the periodic stuck-job and retention sweeps run.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub stuck_timeout: chrono::Duration,
    pub retention: chrono::Duration,
    pub max_repair_attempts: u32,
    /// Retrieval scheme this pool runs; jobs snapshotted under a different
    /// scheme fail the compatibility gate.
    pub embedding_model: String,
    pub chunking_version: String,
}

/// A failed phase, classified for the retry policy.
#[derive(Debug)]
struct PhaseFailure {
    permanent: bool,
    reason: String,
}

impl From<GuardError> for PhaseFailure {
    fn from(e: GuardError) -> Self {
        PhaseFailure {
            // A bigger budget needs human action; retrying won't help.
            permanent: matches!(e, GuardError::BudgetExceeded { .. }),
            reason: e.to_string(),
        }
    }
}

impl From<JobError> for PhaseFailure {
    fn from(e: JobError) -> Self {
        PhaseFailure {
            permanent: false,
            reason: e.to_string(),
        }
    }
}

pub struct Worker {
    jobs: JobService,
    guard: GuardedProvider,
    planner: Arc<dyn Planner>,
    generator: Arc<dyn Generator>,
    semantic: Arc<dyn SemanticValidator>,
    repairer: Arc<dyn Repairer>,
    events: Arc<dyn EventPublisher>,
    config: WorkerConfig,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: JobService,
        guard: GuardedProvider,
        planner: Arc<dyn Planner>,
        generator: Arc<dyn Generator>,
        semantic: Arc<dyn SemanticValidator>,
        repairer: Arc<dyn Repairer>,
        events: Arc<dyn EventPublisher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            guard,
            planner,
            generator,
            semantic,
            repairer,
            events,
            config,
        }
    }

    /// Run forever: crash recovery once, then poll-claim-process.
    pub async fn run(&self) {
        match self.jobs.recover_stuck_jobs(self.config.stuck_timeout).await {
            Ok(count) => {
                tracing::info!(
                    worker_id = %self.config.worker_id,
                    recovered = count,
                    "startup recovery sweep finished"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "startup recovery sweep failed");
            }
        }

        let mut last_sweep = std::time::Instant::now();
        loop {
            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                if let Err(e) = self.jobs.recover_stuck_jobs(self.config.stuck_timeout).await {
                    tracing::error!(error = %e, "periodic recovery sweep failed");
                }
                if let Err(e) = self.jobs.purge_old_jobs(self.config.retention).await {
                    tracing::error!(error = %e, "retention sweep failed");
                }
                last_sweep = std::time::Instant::now();
            }

            match self.process_next().await {
                Ok(true) => {
                    tracing::debug!("job processed, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!("no claimable jobs, sleeping");
                    sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "error processing job, backing off");
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Claim and fully process one job.
    /// Returns Ok(true) if a job was claimed, Ok(false) if none was pending.
    pub async fn process_next(&self) -> Result<bool, JobError> {
        let Some(job) = self.jobs.claim_next_pending(&self.config.worker_id).await? else {
            return Ok(false);
        };

        let started = std::time::Instant::now();
        match self.process_claimed(&job).await {
            Ok(artifact) => match self.jobs.mark_completed(job.id, &artifact).await {
                Ok(done) => {
                    metrics::histogram!("artifact_job_seconds")
                        .record(started.elapsed().as_secs_f64());
                    self.events.publish(&JobEvent::completed(&done)).await;
                }
                // A recovery sweep took the job from us mid-flight.
                Err(JobError::InvalidTransition { actual, .. }) => {
                    tracing::warn!(
                        job_id = %job.id,
                        status = %actual,
                        "job no longer owned at completion, discarding result"
                    );
                }
                Err(e) => return Err(e),
            },
            Err(failure) => self.handle_failure(&job, failure).await?,
        }

        Ok(true)
    }

    /// The three-phase pipeline for a claimed job. Every model call goes
    /// through the guard; any error routes to the failure handler.
    async fn process_claimed(&self, job: &Job) -> Result<Artifact, PhaseFailure> {
        // Compatibility gate: never generate against a stale snapshot.
        if let Err(mismatch) = validate_snapshot_compatibility(
            &job.snapshot,
            &self.config.embedding_model,
            &self.config.chunking_version,
        ) {
            return Err(PhaseFailure {
                permanent: true,
                reason: format!("snapshot not reprocessable: {mismatch}"),
            });
        }
        let chunks = &job.snapshot.chunks;

        // Phase 1: plan.
        let plan = self
            .guard
            .call(job, Phase::Plan, self.planner.plan(job.artifact_type, chunks))
            .await?;
        self.jobs.store_plan(job.id, &plan).await?;
        self.jobs.update_progress(job.id, PROGRESS_PLANNED).await?;

        // Phase 2: generate, against the same snapshot.
        self.jobs.mark_generating(job.id).await?;
        let artifact = self
            .guard
            .call(
                job,
                Phase::Generate,
                self.generator.generate(&plan, chunks, &job.options),
            )
            .await?;
        self.jobs.update_progress(job.id, PROGRESS_GENERATED).await?;

        // Phase 3: validate, repair if needed.
        self.jobs.mark_validating(job.id).await?;
        let structural = validation::validate_structure(job.artifact_type, &artifact);
        let semantic = self
            .guard
            .call(
                job,
                Phase::Validate,
                self.semantic.validate(job.artifact_type, &artifact, chunks),
            )
            .await?;

        if structural.valid && semantic.valid {
            return Ok(artifact);
        }

        let violations: Vec<Violation> = structural
            .violations
            .into_iter()
            .chain(semantic.violations)
            .collect();
        tracing::warn!(
            job_id = %job.id,
            violations = violations.len(),
            "artifact failed validation, attempting repair"
        );

        let outcome = self
            .guard
            .call(
                job,
                Phase::Repair,
                self.repairer.repair(
                    job.artifact_type,
                    &artifact,
                    &plan,
                    chunks,
                    &violations,
                    self.config.max_repair_attempts,
                ),
            )
            .await?;

        if outcome.success {
            metrics::counter!("artifact_jobs_repaired_total").increment(1);
            tracing::info!(
                job_id = %job.id,
                attempts = outcome.attempts,
                "artifact repaired"
            );
            return Ok(outcome.artifact);
        }

        let listed = violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(PhaseFailure {
            permanent: true,
            reason: format!(
                "validation failed after {} repair attempts: {listed}",
                outcome.attempts
            ),
        })
    }

    /// Route a phase failure into the retry policy and publish the terminal
    /// event if the job is done for good.
    async fn handle_failure(&self, job: &Job, failure: PhaseFailure) -> Result<(), JobError> {
        tracing::error!(
            job_id = %job.id,
            permanent = failure.permanent,
            reason = %failure.reason,
            "job phase failed"
        );

        let updated = if failure.permanent {
            self.jobs
                .mark_failed_permanently(job.id, &failure.reason)
                .await
        } else {
            self.jobs.mark_failed(job.id, &failure.reason).await
        };

        match updated {
            Ok(done) if done.status == JobStatus::Failed => {
                self.events.publish(&JobEvent::failed(&done)).await;
                Ok(())
            }
            // Requeued for retry; another worker will pick it up.
            Ok(_) => Ok(()),
            Err(JobError::InvalidTransition { actual, .. }) => {
                tracing::warn!(
                    job_id = %job.id,
                    status = %actual,
                    "job no longer owned while recording failure"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
