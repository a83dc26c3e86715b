use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::artifact::{Artifact, ArtifactType, GenerationOptions, Plan};

/// Status of an artifact generation job.
///
/// `Pending` jobs are claimable; `Planning`/`Generating`/`Validating` are the
/// processing states owned by exactly one worker; `Completed`/`Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Planning,
    Generating,
    Validating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// True while a worker owns the job (claimed but not terminal).
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            JobStatus::Planning | JobStatus::Generating | JobStatus::Validating
        )
    }
}

/// One retrieved content chunk, captured at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Immutable copy of retrieved content, versioned by the embedding and
/// chunking scheme active when it was produced. Workers never re-query
/// retrieval; every phase of every attempt reads this snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSnapshot {
    pub embedding_model: String,
    pub chunking_version: String,
    pub chunks: Vec<ContentChunk>,
}

impl RetrievalSnapshot {
    /// Parse a snapshot document. Accepts the versioned wrapper shape, or the
    /// legacy bare chunk array (older rows predate snapshot versioning), in
    /// which case the supplied fallback identifiers are used.
    pub fn parse(
        value: &serde_json::Value,
        fallback_embedding_model: &str,
        fallback_chunking_version: &str,
    ) -> Result<Self, serde_json::Error> {
        if value.is_array() {
            let chunks: Vec<ContentChunk> = serde_json::from_value(value.clone())?;
            return Ok(Self {
                embedding_model: fallback_embedding_model.to_string(),
                chunking_version: fallback_chunking_version.to_string(),
                chunks,
            });
        }
        serde_json::from_value(value.clone())
    }
}

/// An artifact generation job: the central persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub notebook_id: String,
    pub artifact_type: ArtifactType,
    /// Optional free-text instructions from the submitter.
    pub content: Option<String>,
    pub source_ids: Vec<String>,
    pub options: GenerationOptions,
    pub status: JobStatus,
    /// 0-100, monotonically non-decreasing within one attempt.
    pub progress: i32,
    /// Hash of the semantic identity of the request; used only for
    /// idempotent lookup, never mutated.
    pub request_fingerprint: String,
    pub snapshot: RetrievalSnapshot,
    pub plan: Option<Plan>,
    pub result: Option<Artifact>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub tokens_used: i64,
    pub token_budget: i64,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Planning,
            JobStatus::Generating,
            JobStatus::Validating,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let text = status.to_string();
            assert_eq!(text.parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_processing_and_terminal_partition() {
        assert!(JobStatus::Planning.is_processing());
        assert!(JobStatus::Generating.is_processing());
        assert!(JobStatus::Validating.is_processing());
        assert!(!JobStatus::Pending.is_processing());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Validating.is_terminal());
    }

    #[test]
    fn test_snapshot_parses_versioned_wrapper() {
        let value = serde_json::json!({
            "embedding_model": "embed-v2",
            "chunking_version": "chunk-v3",
            "chunks": [{ "id": "c1", "text": "ownership moves values" }]
        });
        let snapshot = RetrievalSnapshot::parse(&value, "fallback", "fallback").unwrap();
        assert_eq!(snapshot.embedding_model, "embed-v2");
        assert_eq!(snapshot.chunks.len(), 1);
    }

    #[test]
    fn test_snapshot_parses_legacy_flat_array() {
        let value = serde_json::json!([
            { "id": "c1", "text": "borrowing grants access" },
            { "id": "c2", "text": "lifetimes bound references", "score": 0.9 }
        ]);
        let snapshot = RetrievalSnapshot::parse(&value, "embed-v2", "chunk-v3").unwrap();
        assert_eq!(snapshot.embedding_model, "embed-v2");
        assert_eq!(snapshot.chunking_version, "chunk-v3");
        assert_eq!(snapshot.chunks.len(), 2);
        assert_eq!(snapshot.chunks[1].score, Some(0.9));
    }
}
