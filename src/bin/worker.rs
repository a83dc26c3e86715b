use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use artifact_pipeline::config::AppConfig;
use artifact_pipeline::services::events::RedisEventPublisher;
use artifact_pipeline::services::guard::GuardedProvider;
use artifact_pipeline::services::jobs::JobService;
use artifact_pipeline::services::model::ModelClient;
use artifact_pipeline::services::validation::GroundingValidator;
use artifact_pipeline::store::{self, PgJobStore};
use artifact_pipeline::worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting artifact generation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = store::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let jobs = JobService::new(
        Arc::new(PgJobStore::new(db_pool)),
        config.max_retries,
        config.default_token_budget,
    );
    let guard = GuardedProvider::new(jobs.clone(), config.phase_deadlines());

    let model = Arc::new(ModelClient::new(
        config.model_endpoint.clone(),
        config.model_api_key.clone(),
        config.model_name.clone(),
    ));

    let events = Arc::new(
        RedisEventPublisher::new(&config.redis_url, &config.event_channel)
            .expect("Failed to initialize event publisher"),
    );

    let worker_config = WorkerConfig {
        worker_id: format!("worker-{}", Uuid::new_v4()),
        poll_interval: config.poll_interval(),
        stuck_timeout: config.stuck_timeout(),
        retention: config.retention(),
        max_repair_attempts: config.max_repair_attempts,
        embedding_model: config.embedding_model.clone(),
        chunking_version: config.chunking_version.clone(),
    };

    tracing::info!(worker_id = %worker_config.worker_id, "Worker ready, starting job processing loop");

    let worker = Worker::new(
        jobs,
        guard,
        model.clone(),
        model.clone(),
        Arc::new(GroundingValidator),
        model,
        events,
        worker_config,
    );

    worker.run().await;
}
