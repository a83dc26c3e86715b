use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "artifact.completed")]
    ArtifactCompleted,
    #[serde(rename = "artifact.failed")]
    ArtifactFailed,
}

/// Terminal job outcome notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub event_type: EventType,
    pub job_id: Uuid,
    pub user_id: String,
    pub notebook_id: String,
    pub artifact_type: String,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn completed(job: &Job) -> Self {
        Self {
            event_type: EventType::ArtifactCompleted,
            job_id: job.id,
            user_id: job.user_id.clone(),
            notebook_id: job.notebook_id.clone(),
            artifact_type: job.artifact_type.to_string(),
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failed(job: &Job) -> Self {
        Self {
            event_type: EventType::ArtifactFailed,
            job_id: job.id,
            user_id: job.user_id.clone(),
            notebook_id: job.notebook_id.clone(),
            artifact_type: job.artifact_type.to_string(),
            error: job.error.clone(),
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget publisher of terminal job outcomes. Delivery is
/// at-least-once at best; a publish failure must never fail the job.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &JobEvent);
}

/// Redis pub/sub backed publisher.
pub struct RedisEventPublisher {
    client: redis::Client,
    channel: String,
}

impl RedisEventPublisher {
    pub fn new(redis_url: &str, channel: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            channel: channel.to_string(),
        })
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &JobEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(job_id = %event.job_id, error = %e, "failed to serialize job event");
                return;
            }
        };

        let result = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.publish::<_, _, ()>(&self.channel, &payload).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                job_id = %event.job_id,
                error = %e,
                "failed to publish job event, dropping"
            );
        }
    }
}
