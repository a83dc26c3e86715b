use serde::Deserialize;
use std::time::Duration;

use crate::services::guard::PhaseDeadlines;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for event publishing
    pub redis_url: String,

    /// Redis channel terminal job events are published to
    #[serde(default = "default_event_channel")]
    pub event_channel: String,

    /// Completion endpoint URL for the generation model
    pub model_endpoint: String,

    /// API token for the model endpoint
    pub model_api_key: String,

    /// Model identifier sent with each completion request
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Embedding scheme this pool's retrieval subsystem currently runs.
    /// Snapshots produced under a different scheme are not reprocessable.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Chunking scheme version, same compatibility rule as above
    #[serde(default = "default_chunking_version")]
    pub chunking_version: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs stuck in a processing status longer than this are failed by the
    /// recovery sweep. Must exceed every phase deadline.
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,

    #[serde(default = "default_plan_deadline_secs")]
    pub plan_deadline_secs: u64,

    #[serde(default = "default_generate_deadline_secs")]
    pub generate_deadline_secs: u64,

    #[serde(default = "default_validate_deadline_secs")]
    pub validate_deadline_secs: u64,

    #[serde(default = "default_repair_deadline_secs")]
    pub repair_deadline_secs: u64,

    /// Token ceiling for jobs that don't specify their own
    #[serde(default = "default_token_budget")]
    pub default_token_budget: i64,

    /// Automatic retries per job before permanent failure
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Bound on repair iterations within the validate phase
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,

    /// Terminal jobs older than this are deleted by the retention sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_event_channel() -> String {
    "artifact.events".to_string()
}

fn default_model_name() -> String {
    "default".to_string()
}

fn default_embedding_model() -> String {
    "embed-v2".to_string()
}

fn default_chunking_version() -> String {
    "chunk-v3".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stuck_timeout_secs() -> u64 {
    600
}

fn default_plan_deadline_secs() -> u64 {
    60
}

fn default_generate_deadline_secs() -> u64 {
    120
}

fn default_validate_deadline_secs() -> u64 {
    30
}

fn default_repair_deadline_secs() -> u64 {
    120
}

fn default_token_budget() -> i64 {
    50_000
}

fn default_max_retries() -> i32 {
    1
}

fn default_max_repair_attempts() -> u32 {
    2
}

fn default_retention_days() -> i64 {
    30
}

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(String);

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// The stuck-job timeout must be strictly larger than the longest phase
    /// deadline, or the sweep could reclaim jobs that are still inside a
    /// legitimate call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let longest = self.phase_deadlines().longest();
        if Duration::from_secs(self.stuck_timeout_secs) <= longest {
            return Err(ConfigError(format!(
                "stuck_timeout_secs ({}) must exceed the longest phase deadline ({}s)",
                self.stuck_timeout_secs,
                longest.as_secs()
            )));
        }
        if self.max_retries < 0 {
            return Err(ConfigError("max_retries must be non-negative".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stuck_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stuck_timeout_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn phase_deadlines(&self) -> PhaseDeadlines {
        PhaseDeadlines {
            plan: Duration::from_secs(self.plan_deadline_secs),
            generate: Duration::from_secs(self.generate_deadline_secs),
            validate: Duration::from_secs(self.validate_deadline_secs),
            repair: Duration::from_secs(self.repair_deadline_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            bind_addr: default_bind_addr(),
            database_url: "postgres://localhost/test".to_string(),
            redis_url: "redis://localhost".to_string(),
            event_channel: default_event_channel(),
            model_endpoint: "http://localhost:8080/v1/completions".to_string(),
            model_api_key: "test".to_string(),
            model_name: default_model_name(),
            embedding_model: default_embedding_model(),
            chunking_version: default_chunking_version(),
            poll_interval_ms: default_poll_interval_ms(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            plan_deadline_secs: default_plan_deadline_secs(),
            generate_deadline_secs: default_generate_deadline_secs(),
            validate_deadline_secs: default_validate_deadline_secs(),
            repair_deadline_secs: default_repair_deadline_secs(),
            default_token_budget: default_token_budget(),
            max_retries: default_max_retries(),
            max_repair_attempts: default_max_repair_attempts(),
            retention_days: default_retention_days(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_stuck_timeout_must_exceed_phase_deadlines() {
        let mut config = base_config();
        config.stuck_timeout_secs = 60; // below the 120s generate deadline
        assert!(config.validate().is_err());
    }
}
