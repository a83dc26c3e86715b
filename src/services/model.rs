use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::artifact::{Artifact, ArtifactType, GenerationOptions, Plan, Violation};
use crate::models::job::ContentChunk;
use crate::services::generation::{
    Generator, ModelOutput, Planner, ProviderError, RepairOutcome, Repairer,
};
use crate::services::validation;

/// How much snapshot text to inline into a prompt.
const MAX_CONTEXT_CHARS: usize = 24_000;

/// Client for an OpenAI-style text completion endpoint, implementing the
/// plan, generate and repair collaborators.
pub struct ModelClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    total_tokens: i64,
}

impl ModelClient {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            api_key,
            model,
        }
    }

    /// Send one completion request. Returns the raw text and the token spend
    /// (endpoint-reported, or a character-based estimate if absent).
    async fn complete(&self, prompt: String, max_tokens: u32) -> Result<(String, i64), ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": 0.2,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::Http)?
            .error_for_status()
            .map_err(ProviderError::Http)?;

        let completion: CompletionResponse = response.json().await.map_err(ProviderError::Http)?;
        let tokens = if completion.usage.total_tokens > 0 {
            completion.usage.total_tokens
        } else {
            ((prompt.len() + completion.text.len()) / 4) as i64
        };
        Ok((completion.text, tokens))
    }

    fn context_digest(chunks: &[ContentChunk]) -> String {
        let mut digest = String::new();
        for chunk in chunks {
            if digest.len() + chunk.text.len() > MAX_CONTEXT_CHARS {
                break;
            }
            digest.push_str("[chunk ");
            digest.push_str(&chunk.id);
            digest.push_str("]\n");
            digest.push_str(&chunk.text);
            digest.push_str("\n\n");
        }
        digest
    }
}

/// Pull the first JSON object or array out of a completion, tolerating
/// surrounding prose.
fn extract_json(text: &str) -> Result<&str, ProviderError> {
    let start = text
        .find(['{', '['])
        .ok_or_else(|| ProviderError::Other("completion contains no JSON".to_string()))?;
    let end = text
        .rfind(['}', ']'])
        .filter(|&end| end >= start)
        .ok_or_else(|| ProviderError::Other("completion contains unterminated JSON".to_string()))?;
    Ok(&text[start..=end])
}

#[async_trait]
impl Planner for ModelClient {
    async fn plan(
        &self,
        artifact_type: ArtifactType,
        chunks: &[ContentChunk],
    ) -> Result<ModelOutput<Plan>, ProviderError> {
        let prompt = format!(
            "You are planning a {artifact_type} study artifact.\n\
             Source material:\n{}\n\
             Return ONLY a JSON plan object with an \"artifact_type\" field set to \
             \"{artifact_type}\" and the fields appropriate for that type.",
            Self::context_digest(chunks),
        );
        let (text, tokens_spent) = self.complete(prompt, 1024).await?;
        let plan: Plan = serde_json::from_str(extract_json(&text)?)?;
        Ok(ModelOutput {
            value: plan,
            tokens_spent,
        })
    }
}

#[async_trait]
impl Generator for ModelClient {
    async fn generate(
        &self,
        plan: &Plan,
        chunks: &[ContentChunk],
        options: &GenerationOptions,
    ) -> Result<ModelOutput<Artifact>, ProviderError> {
        let prompt = format!(
            "Generate a study artifact strictly following this plan:\n{}\n\
             Options:\n{}\n\
             Source material (quote from it verbatim in source_quote fields):\n{}\n\
             Return ONLY the artifact as JSON with an \"artifact_type\" tag.",
            serde_json::to_string_pretty(plan)?,
            serde_json::to_string(options)?,
            Self::context_digest(chunks),
        );
        let (text, tokens_spent) = self.complete(prompt, 4096).await?;
        let artifact: Artifact = serde_json::from_str(extract_json(&text)?)?;
        Ok(ModelOutput {
            value: artifact,
            tokens_spent,
        })
    }
}

#[async_trait]
impl Repairer for ModelClient {
    /// Iteratively ask the model to fix the artifact, re-validating locally
    /// after each attempt. Stops at the first clean result or when
    /// `max_attempts` is exhausted.
    async fn repair(
        &self,
        artifact_type: ArtifactType,
        artifact: &Artifact,
        plan: &Plan,
        chunks: &[ContentChunk],
        violations: &[Violation],
        max_attempts: u32,
    ) -> Result<ModelOutput<RepairOutcome>, ProviderError> {
        let mut current = artifact.clone();
        let mut current_violations: Vec<Violation> = violations.to_vec();
        let mut total_tokens = 0i64;

        for attempt in 1..=max_attempts {
            let listed = current_violations
                .iter()
                .map(|v| format!("- {v}"))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "This {artifact_type} artifact failed validation:\n{}\n\
                 Violations:\n{listed}\n\
                 Plan it must follow:\n{}\n\
                 Source material (source_quote fields must quote it verbatim):\n{}\n\
                 Return ONLY the corrected artifact as JSON.",
                serde_json::to_string_pretty(&current)?,
                serde_json::to_string_pretty(plan)?,
                Self::context_digest(chunks),
            );
            let (text, tokens) = self.complete(prompt, 4096).await?;
            total_tokens += tokens;

            let repaired: Artifact = match serde_json::from_str(extract_json(&text)?) {
                Ok(a) => a,
                // A malformed repair attempt consumes the attempt, not the job.
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "repair attempt returned malformed JSON");
                    continue;
                }
            };

            let structural = validation::validate_structure(artifact_type, &repaired);
            let grounding = validation::check_grounding(&repaired, chunks);
            if structural.valid && grounding.valid {
                return Ok(ModelOutput {
                    value: RepairOutcome {
                        success: true,
                        attempts: attempt,
                        artifact: repaired,
                    },
                    tokens_spent: total_tokens,
                });
            }

            current_violations = structural
                .violations
                .into_iter()
                .chain(grounding.violations)
                .collect();
            current = repaired;
        }

        Ok(ModelOutput {
            value: RepairOutcome {
                success: false,
                attempts: max_attempts,
                artifact: current,
            },
            tokens_spent: total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_strips_prose() {
        let text = "Sure, here is the plan:\n{\"artifact_type\":\"quiz\",\"topics\":[]}\nHope it helps!";
        assert_eq!(
            extract_json(text).unwrap(),
            "{\"artifact_type\":\"quiz\",\"topics\":[]}"
        );
    }

    #[test]
    fn test_extract_json_rejects_plain_prose() {
        assert!(extract_json("no json here").is_err());
    }

    #[test]
    fn test_context_digest_is_bounded() {
        let chunks: Vec<ContentChunk> = (0..100)
            .map(|i| ContentChunk {
                id: format!("c{i}"),
                text: "x".repeat(1_000),
                score: None,
            })
            .collect();
        let digest = ModelClient::context_digest(&chunks);
        assert!(digest.len() <= MAX_CONTEXT_CHARS + 1_100);
    }
}
