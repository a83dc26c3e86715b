use async_trait::async_trait;
use strsim::jaro_winkler;

use crate::models::artifact::{
    Artifact, ArtifactType, MindmapNode, ValidationReport, Violation,
};
use crate::models::job::ContentChunk;
use crate::services::generation::{ModelOutput, ProviderError, SemanticValidator};

/// Threshold for fuzzy-matching a source quote against snapshot sentences.
const QUOTE_MATCH_THRESHOLD: f64 = 0.85;

/// Mindmap depth past which the structure is considered degenerate.
const MAX_MINDMAP_DEPTH: usize = 6;

/// Structural validation: pure per-type shape checks on a generated artifact.
///
/// Performs:
/// - Artifact tag vs requested type
/// - Quiz: question presence, option counts, answer index bounds, duplicates
/// - Flashcards: card presence, non-empty faces
/// - Mindmap: non-empty labels, depth bound
pub fn validate_structure(artifact_type: ArtifactType, artifact: &Artifact) -> ValidationReport {
    let mut violations = Vec::new();

    if artifact.artifact_type() != artifact_type {
        violations.push(Violation::new(
            "artifact_type_mismatch",
            format!(
                "expected {artifact_type}, got {}",
                artifact.artifact_type()
            ),
        ));
        return ValidationReport::from_violations(violations);
    }

    match artifact {
        Artifact::Quiz { questions } => {
            if questions.is_empty() {
                violations.push(Violation::new("empty_quiz", "quiz has no questions"));
            }
            for (i, q) in questions.iter().enumerate() {
                if q.prompt.trim().is_empty() {
                    violations.push(Violation::new(
                        "empty_prompt",
                        format!("question {i} has an empty prompt"),
                    ));
                }
                if q.options.len() < 2 {
                    violations.push(Violation::new(
                        "too_few_options",
                        format!("question {i} has {} options, need at least 2", q.options.len()),
                    ));
                }
                if q.answer_index >= q.options.len() {
                    violations.push(Violation::new(
                        "answer_out_of_range",
                        format!(
                            "question {i} answer index {} out of range for {} options",
                            q.answer_index,
                            q.options.len()
                        ),
                    ));
                }
                let mut seen: Vec<&str> = Vec::with_capacity(q.options.len());
                for option in &q.options {
                    let normalized = option.trim();
                    if seen.contains(&normalized) {
                        violations.push(Violation::new(
                            "duplicate_option",
                            format!("question {i} repeats option '{normalized}'"),
                        ));
                    } else {
                        seen.push(normalized);
                    }
                }
            }
        }
        Artifact::Flashcards { cards } => {
            if cards.is_empty() {
                violations.push(Violation::new("empty_deck", "deck has no cards"));
            }
            for (i, card) in cards.iter().enumerate() {
                if card.front.trim().is_empty() {
                    violations.push(Violation::new(
                        "empty_front",
                        format!("card {i} has an empty front"),
                    ));
                }
                if card.back.trim().is_empty() {
                    violations.push(Violation::new(
                        "empty_back",
                        format!("card {i} has an empty back"),
                    ));
                }
            }
        }
        Artifact::Mindmap { root } => {
            check_mindmap_node(root, 0, &mut violations);
        }
    }

    ValidationReport::from_violations(violations)
}

fn check_mindmap_node(node: &MindmapNode, depth: usize, violations: &mut Vec<Violation>) {
    if node.label.trim().is_empty() {
        violations.push(Violation::new(
            "empty_label",
            format!("node at depth {depth} has an empty label"),
        ));
    }
    if depth > MAX_MINDMAP_DEPTH {
        violations.push(Violation::new(
            "excessive_depth",
            format!("mindmap exceeds depth {MAX_MINDMAP_DEPTH}"),
        ));
        return;
    }
    for child in &node.children {
        check_mindmap_node(child, depth + 1, violations);
    }
}

/// Semantic grounding: every `source_quote` an artifact carries must actually
/// occur in the snapshot, exactly or near-exactly (fuzzy match against the
/// chunk's sentences to tolerate minor transcription drift).
pub fn check_grounding(artifact: &Artifact, chunks: &[ContentChunk]) -> ValidationReport {
    let mut violations = Vec::new();

    let quotes: Vec<(String, &str)> = match artifact {
        Artifact::Quiz { questions } => questions
            .iter()
            .enumerate()
            .filter_map(|(i, q)| {
                q.source_quote
                    .as_deref()
                    .map(|quote| (format!("question {i}"), quote))
            })
            .collect(),
        Artifact::Flashcards { cards } => cards
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.source_quote
                    .as_deref()
                    .map(|quote| (format!("card {i}"), quote))
            })
            .collect(),
        // Mindmaps carry no quotes.
        Artifact::Mindmap { .. } => Vec::new(),
    };

    for (location, quote) in quotes {
        if !quote_is_grounded(quote, chunks) {
            violations.push(Violation::new(
                "ungrounded_quote",
                format!("{location} cites text not present in the snapshot: '{quote}'"),
            ));
        }
    }

    ValidationReport::from_violations(violations)
}

fn quote_is_grounded(quote: &str, chunks: &[ContentChunk]) -> bool {
    let needle = quote.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    for chunk in chunks {
        let haystack = chunk.text.to_lowercase();
        if haystack.contains(&needle) {
            return true;
        }
        for sentence in haystack.split(['.', '\n']) {
            let sentence = sentence.trim();
            if !sentence.is_empty() && jaro_winkler(sentence, &needle) >= QUOTE_MATCH_THRESHOLD {
                return true;
            }
        }
    }
    false
}

/// The shipped semantic validator: a local grounding check over the snapshot.
/// Costs no tokens; still routed through the guard like every phase call.
pub struct GroundingValidator;

#[async_trait]
impl SemanticValidator for GroundingValidator {
    async fn validate(
        &self,
        _artifact_type: ArtifactType,
        artifact: &Artifact,
        chunks: &[ContentChunk],
    ) -> Result<ModelOutput<ValidationReport>, ProviderError> {
        Ok(ModelOutput::free(check_grounding(artifact, chunks)))
    }
}
