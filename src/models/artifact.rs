use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The closed set of artifact kinds the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactType {
    Quiz,
    Flashcards,
    Mindmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Per-type generation options. Tagged so an open-ended map can never
/// reach the pipeline; the tag must agree with the job's `artifact_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact_type", rename_all = "snake_case")]
pub enum GenerationOptions {
    Quiz {
        num_questions: u32,
        #[serde(default)]
        difficulty: Difficulty,
    },
    Flashcards {
        num_cards: u32,
    },
    Mindmap {
        max_nodes: u32,
    },
}

impl GenerationOptions {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            GenerationOptions::Quiz { .. } => ArtifactType::Quiz,
            GenerationOptions::Flashcards { .. } => ArtifactType::Flashcards,
            GenerationOptions::Mindmap { .. } => ArtifactType::Mindmap,
        }
    }
}

/// Structured output of the planning phase, written once per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact_type", rename_all = "snake_case")]
pub enum Plan {
    Quiz { topics: Vec<PlannedTopic> },
    Flashcards { concepts: Vec<String> },
    Mindmap { central_topic: String, branches: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTopic {
    pub topic: String,
    pub question_count: u32,
}

impl Plan {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            Plan::Quiz { .. } => ArtifactType::Quiz,
            Plan::Flashcards { .. } => ArtifactType::Flashcards,
            Plan::Mindmap { .. } => ArtifactType::Mindmap,
        }
    }
}

/// The final generated artifact, stored on the job only on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact_type", rename_all = "snake_case")]
pub enum Artifact {
    Quiz { questions: Vec<QuizQuestion> },
    Flashcards { cards: Vec<Flashcard> },
    Mindmap { root: MindmapNode },
}

impl Artifact {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            Artifact::Quiz { .. } => ArtifactType::Quiz,
            Artifact::Flashcards { .. } => ArtifactType::Flashcards,
            Artifact::Mindmap { .. } => ArtifactType::Mindmap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    /// Verbatim passage from the snapshot the question is grounded in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_quote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_quote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapNode {
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindmapNode>,
}

/// A single validation finding, structural or semantic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub detail: String,
}

impl Violation {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// Outcome of a structural or semantic validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn passing() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
        }
    }

    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_tag_matches_type() {
        let opts = GenerationOptions::Quiz {
            num_questions: 5,
            difficulty: Difficulty::Medium,
        };
        assert_eq!(opts.artifact_type(), ArtifactType::Quiz);
    }

    #[test]
    fn test_options_reject_unknown_tag() {
        let raw = serde_json::json!({ "artifact_type": "poster", "num_questions": 5 });
        assert!(serde_json::from_value::<GenerationOptions>(raw).is_err());
    }

    #[test]
    fn test_artifact_round_trips_through_json() {
        let artifact = Artifact::Quiz {
            questions: vec![QuizQuestion {
                prompt: "What is ownership?".to_string(),
                options: vec!["a".to_string(), "b".to_string()],
                answer_index: 0,
                source_quote: None,
            }],
        };
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["artifact_type"], "quiz");
        let back: Artifact = serde_json::from_value(value).unwrap();
        assert_eq!(back, artifact);
    }
}
