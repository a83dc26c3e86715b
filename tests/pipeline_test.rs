//! Pipeline tests over the in-memory store: a real worker with stub
//! collaborators, driven one claim at a time.

mod helpers;

use helpers::*;
use std::sync::Arc;
use std::time::Duration;

use artifact_pipeline::models::job::JobStatus;
use artifact_pipeline::services::events::EventType;
use artifact_pipeline::services::jobs::STUCK_ERROR;

#[tokio::test]
async fn test_happy_path_completes_and_publishes() {
    let h = happy_harness();
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    assert!(h.worker.process_next().await.unwrap());

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.result, Some(grounded_quiz()));
    assert!(job.plan.is_some());
    // Planner spent 10, generator 50, validator 0.
    assert_eq!(job.tokens_used, 60);

    let events = h.published.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ArtifactCompleted);
    assert_eq!(events[0].job_id, created.job.id);
    assert!(events[0].error.is_none());

    // Nothing left to claim.
    assert!(!h.worker.process_next().await.unwrap());
}

#[tokio::test]
async fn test_jobs_are_processed_oldest_first() {
    let h = happy_harness();
    let first = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    let mut second_req = quiz_request(None);
    second_req.notebook_id = "n2".to_string();
    let second = h.jobs.create_job(second_req, snapshot()).await.unwrap();

    assert!(h.worker.process_next().await.unwrap());
    assert!(h.worker.process_next().await.unwrap());

    let events = h.published.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].job_id, first.job.id);
    assert_eq!(events[1].job_id, second.job.id);
}

#[tokio::test]
async fn test_resubmission_while_active_deduplicates() {
    let h = happy_harness();
    let first = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();
    assert!(!first.deduplicated);

    let again = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.job.id, first.job.id);

    assert!(h.worker.process_next().await.unwrap());

    // Once terminal, an identical request starts a fresh job.
    let fresh = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();
    assert!(!fresh.deduplicated);
    assert_ne!(fresh.job.id, first.job.id);
}

#[tokio::test]
async fn test_concurrent_claims_hand_out_each_job_once() {
    let h = happy_harness();
    h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    let claims = futures::future::join_all((0..8).map(|i| {
        let jobs = h.jobs.clone();
        async move { jobs.claim_next_pending(&format!("w{i}")).await.unwrap() }
    }))
    .await;

    let winners = claims.iter().filter(|c| c.is_some()).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_transient_failure_retries_once_then_fails() {
    let h = harness_with(
        Arc::new(StubPlanner {
            fail: true,
            ..Default::default()
        }),
        Arc::new(StubGenerator::default()),
        Arc::new(StubSemanticValidator::passing()),
        Arc::new(StubRepairer::default()),
        deadlines(),
        worker_config(),
    );
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    // First attempt requeues without publishing anything.
    assert!(h.worker.process_next().await.unwrap());
    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.progress, 0);
    assert!(h.published.events().is_empty());

    // Second attempt exhausts the retry budget.
    assert!(h.worker.process_next().await.unwrap());
    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert!(job.error.unwrap().contains("upstream unavailable"));

    let events = h.published.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ArtifactFailed);
}

#[tokio::test]
async fn test_phase_timeout_is_a_transient_failure() {
    let mut slow_deadlines = deadlines();
    slow_deadlines.plan = Duration::from_millis(20);
    let h = harness_with(
        Arc::new(StubPlanner {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        }),
        Arc::new(StubGenerator::default()),
        Arc::new(StubSemanticValidator::passing()),
        Arc::new(StubRepairer::default()),
        slow_deadlines,
        worker_config(),
    );
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    assert!(h.worker.process_next().await.unwrap());

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert!(job.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_budget_overrun_fails_permanently_without_retry() {
    let h = happy_harness();
    // Planner (10) fits, generator (50) pushes past the budget.
    let created = h
        .jobs
        .create_job(quiz_request(Some(40)), snapshot())
        .await
        .unwrap();

    assert!(h.worker.process_next().await.unwrap());

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.error.as_deref().unwrap().contains("token budget exceeded"));
    // The overrunning spend is still on the books.
    assert_eq!(job.tokens_used, 60);

    let events = h.published.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ArtifactFailed);
}

#[tokio::test]
async fn test_incompatible_snapshot_fails_permanently() {
    let mut config = worker_config();
    config.embedding_model = "embed-v9".to_string();
    let h = harness_with(
        Arc::new(StubPlanner::default()),
        Arc::new(StubGenerator::default()),
        Arc::new(StubSemanticValidator::passing()),
        Arc::new(StubRepairer::default()),
        deadlines(),
        config,
    );
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    assert!(h.worker.process_next().await.unwrap());

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job
        .error
        .as_deref()
        .unwrap()
        .contains("snapshot not reprocessable"));
    // No model was ever called.
    assert_eq!(job.tokens_used, 0);
}

#[tokio::test]
async fn test_failed_validation_is_repaired() {
    let h = harness_with(
        Arc::new(StubPlanner::default()),
        Arc::new(StubGenerator::default()),
        Arc::new(StubSemanticValidator::failing("semantic/unfaithful")),
        Arc::new(StubRepairer::default()),
        deadlines(),
        worker_config(),
    );
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    assert!(h.worker.process_next().await.unwrap());

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(grounded_quiz()));
    // Repair spend (30) is billed like any other phase.
    assert_eq!(job.tokens_used, 90);
}

#[tokio::test]
async fn test_exhausted_repair_fails_with_violations_listed() {
    let h = harness_with(
        Arc::new(StubPlanner::default()),
        Arc::new(StubGenerator::default()),
        Arc::new(StubSemanticValidator::failing("semantic/unfaithful")),
        Arc::new(StubRepairer {
            succeed: false,
            ..Default::default()
        }),
        deadlines(),
        worker_config(),
    );
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    assert!(h.worker.process_next().await.unwrap());

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("validation failed after 2 repair attempts"));
    assert!(error.contains("semantic/unfaithful"));

    let events = h.published.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ArtifactFailed);
}

#[tokio::test]
async fn test_stuck_job_is_recovered_and_stays_failed() {
    let h = happy_harness();
    let created = h.jobs.create_job(quiz_request(None), snapshot()).await.unwrap();

    // Simulate a worker that claimed the job and died.
    h.jobs.claim_next_pending("w-crashed").await.unwrap().unwrap();

    let recovered = h
        .jobs
        .recover_stuck_jobs(chrono::Duration::seconds(-1))
        .await
        .unwrap();
    assert_eq!(recovered, 1);

    let job = h.jobs.get_job(created.job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with(STUCK_ERROR));

    // The recovered job is invisible to a healthy worker.
    assert!(!h.worker.process_next().await.unwrap());
}
