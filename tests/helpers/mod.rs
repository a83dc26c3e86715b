//! Stub collaborators and a worker harness over the in-memory store.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use artifact_pipeline::models::artifact::{
    Artifact, ArtifactType, Difficulty, GenerationOptions, Plan, QuizQuestion, ValidationReport,
    Violation,
};
use artifact_pipeline::models::job::{ContentChunk, RetrievalSnapshot};
use artifact_pipeline::services::events::{EventPublisher, JobEvent};
use artifact_pipeline::services::generation::{
    Generator, ModelOutput, Planner, ProviderError, RepairOutcome, Repairer, SemanticValidator,
};
use artifact_pipeline::services::guard::{GuardedProvider, PhaseDeadlines};
use artifact_pipeline::services::jobs::{CreateJobRequest, JobService};
use artifact_pipeline::store::MemoryJobStore;
use artifact_pipeline::worker::{Worker, WorkerConfig};

pub const CHUNK_TEXT: &str = "Ownership moves values; borrowing grants temporary access.";

pub fn snapshot() -> RetrievalSnapshot {
    RetrievalSnapshot {
        embedding_model: "embed-v2".to_string(),
        chunking_version: "chunk-v3".to_string(),
        chunks: vec![ContentChunk {
            id: "c1".to_string(),
            text: CHUNK_TEXT.to_string(),
            score: Some(0.92),
        }],
    }
}

pub fn quiz_request(token_budget: Option<i64>) -> CreateJobRequest {
    CreateJobRequest {
        user_id: "u1".to_string(),
        notebook_id: "n1".to_string(),
        artifact_type: ArtifactType::Quiz,
        content: None,
        source_ids: vec!["s1".to_string(), "s2".to_string()],
        options: GenerationOptions::Quiz {
            num_questions: 1,
            difficulty: Difficulty::Medium,
        },
        token_budget,
    }
}

pub fn quiz_plan() -> Plan {
    Plan::Quiz { topics: vec![] }
}

/// A structurally valid quiz grounded in [`CHUNK_TEXT`].
pub fn grounded_quiz() -> Artifact {
    Artifact::Quiz {
        questions: vec![QuizQuestion {
            prompt: "What does borrowing grant?".to_string(),
            options: vec!["Temporary access".to_string(), "Ownership".to_string()],
            answer_index: 0,
            source_quote: Some("borrowing grants temporary access".to_string()),
        }],
    }
}

// --- stub collaborators ---------------------------------------------------

pub struct StubPlanner {
    pub tokens: i64,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl Default for StubPlanner {
    fn default() -> Self {
        Self {
            tokens: 10,
            delay: None,
            fail: false,
        }
    }
}

#[async_trait]
impl Planner for StubPlanner {
    async fn plan(
        &self,
        _artifact_type: ArtifactType,
        _chunks: &[ContentChunk],
    ) -> Result<ModelOutput<Plan>, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ProviderError::Other("upstream unavailable".to_string()));
        }
        Ok(ModelOutput {
            value: quiz_plan(),
            tokens_spent: self.tokens,
        })
    }
}

pub struct StubGenerator {
    pub artifact: Artifact,
    pub tokens: i64,
}

impl Default for StubGenerator {
    fn default() -> Self {
        Self {
            artifact: grounded_quiz(),
            tokens: 50,
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(
        &self,
        _plan: &Plan,
        _chunks: &[ContentChunk],
        _options: &GenerationOptions,
    ) -> Result<ModelOutput<Artifact>, ProviderError> {
        Ok(ModelOutput {
            value: self.artifact.clone(),
            tokens_spent: self.tokens,
        })
    }
}

pub struct StubSemanticValidator {
    pub violations: Vec<Violation>,
}

impl StubSemanticValidator {
    pub fn passing() -> Self {
        Self { violations: vec![] }
    }

    pub fn failing(code: &str) -> Self {
        Self {
            violations: vec![Violation::new(code, "judged unfaithful to the snapshot")],
        }
    }
}

#[async_trait]
impl SemanticValidator for StubSemanticValidator {
    async fn validate(
        &self,
        _artifact_type: ArtifactType,
        _artifact: &Artifact,
        _chunks: &[ContentChunk],
    ) -> Result<ModelOutput<ValidationReport>, ProviderError> {
        Ok(ModelOutput::free(ValidationReport::from_violations(
            self.violations.clone(),
        )))
    }
}

pub struct StubRepairer {
    pub succeed: bool,
    pub repaired: Artifact,
    pub tokens: i64,
}

impl Default for StubRepairer {
    fn default() -> Self {
        Self {
            succeed: true,
            repaired: grounded_quiz(),
            tokens: 30,
        }
    }
}

#[async_trait]
impl Repairer for StubRepairer {
    async fn repair(
        &self,
        _artifact_type: ArtifactType,
        artifact: &Artifact,
        _plan: &Plan,
        _chunks: &[ContentChunk],
        _violations: &[Violation],
        max_attempts: u32,
    ) -> Result<ModelOutput<RepairOutcome>, ProviderError> {
        Ok(ModelOutput {
            value: RepairOutcome {
                success: self.succeed,
                attempts: if self.succeed { 1 } else { max_attempts },
                artifact: if self.succeed {
                    self.repaired.clone()
                } else {
                    artifact.clone()
                },
            },
            tokens_spent: self.tokens,
        })
    }
}

/// Captures published events for assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &JobEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// --- harness --------------------------------------------------------------

pub fn deadlines() -> PhaseDeadlines {
    PhaseDeadlines {
        plan: Duration::from_secs(5),
        generate: Duration::from_secs(5),
        validate: Duration::from_secs(5),
        repair: Duration::from_secs(5),
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        worker_id: "w-test".to_string(),
        poll_interval: Duration::from_millis(10),
        stuck_timeout: chrono::Duration::minutes(10),
        retention: chrono::Duration::days(30),
        max_repair_attempts: 2,
        embedding_model: "embed-v2".to_string(),
        chunking_version: "chunk-v3".to_string(),
    }
}

pub struct Harness {
    pub jobs: JobService,
    pub worker: Worker,
    pub published: Arc<RecordingPublisher>,
}

/// Assemble a worker over a fresh in-memory store with the given
/// collaborators and phase deadlines.
pub fn harness_with(
    planner: Arc<dyn Planner>,
    generator: Arc<dyn Generator>,
    semantic: Arc<dyn SemanticValidator>,
    repairer: Arc<dyn Repairer>,
    deadlines: PhaseDeadlines,
    config: WorkerConfig,
) -> Harness {
    let jobs = JobService::new(Arc::new(MemoryJobStore::new()), 1, 10_000);
    let guard = GuardedProvider::new(jobs.clone(), deadlines);
    let published = Arc::new(RecordingPublisher::default());
    let worker = Worker::new(
        jobs.clone(),
        guard,
        planner,
        generator,
        semantic,
        repairer,
        published.clone(),
        config,
    );
    Harness {
        jobs,
        worker,
        published,
    }
}

pub fn happy_harness() -> Harness {
    harness_with(
        Arc::new(StubPlanner::default()),
        Arc::new(StubGenerator::default()),
        Arc::new(StubSemanticValidator::passing()),
        Arc::new(StubRepairer::default()),
        deadlines(),
        worker_config(),
    )
}
