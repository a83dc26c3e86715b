use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use artifact_pipeline::app_state::AppState;
use artifact_pipeline::config::AppConfig;
use artifact_pipeline::routes;
use artifact_pipeline::services::events::RedisEventPublisher;
use artifact_pipeline::services::jobs::JobService;
use artifact_pipeline::store::{self, PgJobStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    config.validate().expect("Invalid configuration");

    tracing::info!("Initializing artifact-pipeline server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "artifact_jobs_submitted_total",
        "Total artifact jobs submitted"
    );
    metrics::describe_counter!("artifact_jobs_claimed_total", "Total jobs claimed by workers");
    metrics::describe_counter!(
        "artifact_jobs_completed_total",
        "Total jobs that completed successfully"
    );
    metrics::describe_counter!("artifact_jobs_failed_total", "Total jobs that failed permanently");
    metrics::describe_counter!("artifact_jobs_retried_total", "Total jobs requeued for retry");
    metrics::describe_counter!(
        "artifact_jobs_recovered_total",
        "Total stuck jobs failed by the recovery sweep"
    );
    metrics::describe_counter!(
        "artifact_jobs_repaired_total",
        "Total artifacts fixed by the repair loop"
    );
    metrics::describe_histogram!("artifact_job_seconds", "End-to-end job processing time");
    metrics::describe_histogram!("artifact_phase_seconds", "Per-phase model call time");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = store::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    store::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis event publisher
    tracing::info!("Connecting to Redis");
    let events = RedisEventPublisher::new(&config.redis_url, &config.event_channel)
        .expect("Failed to initialize event publisher");

    let jobs = JobService::new(
        Arc::new(PgJobStore::new(db_pool.clone())),
        config.max_retries,
        config.default_token_budget,
    );

    // Create shared application state
    let state = AppState::new(
        db_pool,
        jobs,
        events,
        &config.embedding_model,
        &config.chunking_version,
    );

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/artifacts",
            post(routes::artifacts::submit_artifact).get(routes::artifacts::list_jobs),
        )
        .route(
            "/api/v1/artifacts/{job_id}",
            get(routes::artifacts::get_job_status),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024)); // 2 MB limit

    tracing::info!("Starting artifact-pipeline on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
