//! The guarded call wrapper: one deadline and one budget check around every
//! model invocation. Stateless per call; retry policy lives in the Job
//! Service, never here.

use std::future::Future;
use std::time::Duration;
use strum::Display;

use crate::models::job::Job;
use crate::services::generation::{ModelOutput, ProviderError};
use crate::services::jobs::{JobError, JobService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Plan,
    Generate,
    Validate,
    Repair,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Generate => "generate",
            Phase::Validate => "validate",
            Phase::Repair => "repair",
        }
    }
}

/// Per-phase call deadlines.
#[derive(Debug, Clone, Copy)]
pub struct PhaseDeadlines {
    pub plan: Duration,
    pub generate: Duration,
    pub validate: Duration,
    pub repair: Duration,
}

impl PhaseDeadlines {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Plan => self.plan,
            Phase::Generate => self.generate,
            Phase::Validate => self.validate,
            Phase::Repair => self.repair,
        }
    }

    pub fn longest(&self) -> Duration {
        self.plan.max(self.generate).max(self.validate).max(self.repair)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("{phase} phase timed out after {deadline:?}")]
    Timeout { phase: Phase, deadline: Duration },

    #[error("token budget exceeded: {tokens_used} used of {token_budget}")]
    BudgetExceeded { tokens_used: i64, token_budget: i64 },

    #[error("{phase} call failed: {source}")]
    Provider {
        phase: Phase,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Wraps generation calls with a phase deadline and budget accounting.
#[derive(Clone)]
pub struct GuardedProvider {
    jobs: JobService,
    deadlines: PhaseDeadlines,
}

impl GuardedProvider {
    pub fn new(jobs: JobService, deadlines: PhaseDeadlines) -> Self {
        Self { jobs, deadlines }
    }

    /// Run one collaborator call for `job`: refuse if the budget is already
    /// blown, enforce the phase deadline, then bill the reported token spend.
    /// A post-flight overrun is fatal for the job, not a warning.
    pub async fn call<T, F>(&self, job: &Job, phase: Phase, fut: F) -> Result<T, GuardError>
    where
        T: Send,
        F: Future<Output = Result<ModelOutput<T>, ProviderError>> + Send,
    {
        // Pre-flight: a previous phase may already have pushed the job over.
        let current = self
            .jobs
            .get_job(job.id)
            .await?
            .ok_or(JobError::NotFound { id: job.id })?;
        if current.tokens_used > current.token_budget {
            return Err(GuardError::BudgetExceeded {
                tokens_used: current.tokens_used,
                token_budget: current.token_budget,
            });
        }

        let deadline = self.deadlines.for_phase(phase);
        let started = std::time::Instant::now();
        let output = tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| GuardError::Timeout { phase, deadline })?
            .map_err(|source| GuardError::Provider { phase, source })?;

        metrics::histogram!("artifact_phase_seconds", "phase" => phase.as_str())
            .record(started.elapsed().as_secs_f64());

        let within_budget = self
            .jobs
            .increment_tokens_used(job.id, output.tokens_spent)
            .await?;
        if !within_budget {
            return Err(GuardError::BudgetExceeded {
                tokens_used: current.tokens_used + output.tokens_spent,
                token_budget: current.token_budget,
            });
        }

        tracing::debug!(
            job_id = %job.id,
            phase = phase.as_str(),
            tokens_spent = output.tokens_spent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "guarded call finished"
        );

        Ok(output.value)
    }
}
