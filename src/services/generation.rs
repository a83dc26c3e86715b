//! Contracts for the external generation collaborators.
//!
//! The pipeline only ever talks to planning, generation, semantic validation
//! and repair through these ports; production wires them to the model client,
//! tests wire them to stubs.

use async_trait::async_trait;

use crate::models::artifact::{Artifact, ArtifactType, GenerationOptions, Plan, ValidationReport, Violation};
use crate::models::job::ContentChunk;

/// A collaborator response plus what it cost. Every model-backed call reports
/// its token spend so the guard can bill it against the job's budget.
#[derive(Debug, Clone)]
pub struct ModelOutput<T> {
    pub value: T,
    pub tokens_spent: i64,
}

impl<T> ModelOutput<T> {
    pub fn free(value: T) -> Self {
        Self {
            value,
            tokens_spent: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("model endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned malformed output: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Phase 1: derive a structured plan from the snapshot chunks.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        artifact_type: ArtifactType,
        chunks: &[ContentChunk],
    ) -> Result<ModelOutput<Plan>, ProviderError>;
}

/// Phase 2: generate the artifact from the plan and the same snapshot.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        plan: &Plan,
        chunks: &[ContentChunk],
        options: &GenerationOptions,
    ) -> Result<ModelOutput<Artifact>, ProviderError>;
}

/// Phase 3: judge whether the artifact is faithful to the snapshot content.
#[async_trait]
pub trait SemanticValidator: Send + Sync {
    async fn validate(
        &self,
        artifact_type: ArtifactType,
        artifact: &Artifact,
        chunks: &[ContentChunk],
    ) -> Result<ModelOutput<ValidationReport>, ProviderError>;
}

/// Result of a repair run.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub success: bool,
    pub attempts: u32,
    pub artifact: Artifact,
}

/// Phase 3 fallback: attempt to fix a violating artifact. Bounded by
/// `max_attempts`; the implementation re-validates internally and reports
/// whether it converged.
#[async_trait]
pub trait Repairer: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn repair(
        &self,
        artifact_type: ArtifactType,
        artifact: &Artifact,
        plan: &Plan,
        chunks: &[ContentChunk],
        violations: &[Violation],
        max_attempts: u32,
    ) -> Result<ModelOutput<RepairOutcome>, ProviderError>;
}
