use sha2::{Digest, Sha256};

use crate::models::artifact::{ArtifactType, GenerationOptions};

/// Compute the request fingerprint: a SHA-256 over the semantic identity of a
/// submission. Order-independent in `source_ids`; options are hashed through
/// their canonical JSON encoding.
pub fn fingerprint(
    user_id: &str,
    notebook_id: &str,
    artifact_type: ArtifactType,
    source_ids: &[String],
    options: &GenerationOptions,
) -> Result<String, serde_json::Error> {
    let mut sorted_ids: Vec<&str> = source_ids.iter().map(String::as_str).collect();
    sorted_ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(notebook_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(artifact_type.to_string().as_bytes());
    hasher.update([0x1f]);
    for id in &sorted_ids {
        hasher.update(id.as_bytes());
        hasher.update([0x1e]);
    }
    hasher.update([0x1f]);
    hasher.update(serde_json::to_vec(options)?);

    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::Difficulty;

    fn quiz_options(n: u32) -> GenerationOptions {
        GenerationOptions::Quiz {
            num_questions: n,
            difficulty: Difficulty::Medium,
        }
    }

    #[test]
    fn test_same_inputs_same_hash() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let one = fingerprint("u1", "n1", ArtifactType::Quiz, &ids, &quiz_options(5)).unwrap();
        let two = fingerprint("u1", "n1", ArtifactType::Quiz, &ids, &quiz_options(5)).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_source_order_is_irrelevant() {
        let forward = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let shuffled = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let one = fingerprint("u1", "n1", ArtifactType::Quiz, &forward, &quiz_options(5)).unwrap();
        let two = fingerprint("u1", "n1", ArtifactType::Quiz, &shuffled, &quiz_options(5)).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_different_options_different_hash() {
        let ids = vec!["a".to_string()];
        let five = fingerprint("u1", "n1", ArtifactType::Quiz, &ids, &quiz_options(5)).unwrap();
        let ten = fingerprint("u1", "n1", ArtifactType::Quiz, &ids, &quiz_options(10)).unwrap();
        assert_ne!(five, ten);
    }

    #[test]
    fn test_different_user_different_hash() {
        let ids = vec!["a".to_string()];
        let u1 = fingerprint("u1", "n1", ArtifactType::Quiz, &ids, &quiz_options(5)).unwrap();
        let u2 = fingerprint("u2", "n1", ArtifactType::Quiz, &ids, &quiz_options(5)).unwrap();
        assert_ne!(u1, u2);
    }

    #[test]
    fn test_id_concatenation_is_unambiguous() {
        // ["ab"] and ["a", "b"] must not collide.
        let joined = vec!["ab".to_string()];
        let split = vec!["a".to_string(), "b".to_string()];
        let one = fingerprint("u1", "n1", ArtifactType::Quiz, &joined, &quiz_options(5)).unwrap();
        let two = fingerprint("u1", "n1", ArtifactType::Quiz, &split, &quiz_options(5)).unwrap();
        assert_ne!(one, two);
    }
}
