use sqlx::PgPool;
use std::sync::Arc;

use crate::services::events::RedisEventPublisher;
use crate::services::jobs::JobService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jobs: JobService,
    pub events: Arc<RedisEventPublisher>,
    /// Retrieval scheme identifiers used to tag legacy (unversioned)
    /// snapshot submissions.
    pub embedding_model: Arc<str>,
    pub chunking_version: Arc<str>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        jobs: JobService,
        events: RedisEventPublisher,
        embedding_model: &str,
        chunking_version: &str,
    ) -> Self {
        Self {
            db,
            jobs,
            events: Arc::new(events),
            embedding_model: Arc::from(embedding_model),
            chunking_version: Arc::from(chunking_version),
        }
    }
}
