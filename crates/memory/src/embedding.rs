//! Deterministic feature-hashing embedder.
//!
//! Each lowercase word (and each adjacent word pair) is hashed into one of
//! `dimension` buckets with a hash-derived sign, then the vector is
//! L2-normalized. Texts sharing vocabulary get a high cosine similarity.
//! No model files, no network, identical output across runs.

use temple_core::error::MemoryError;
use temple_core::memory::Embedder;
use sha2::{Digest, Sha256};

pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let value = u64::from_le_bytes(raw);
        let index = (value % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Lowercase words. Text with no word characters (emoji, punctuation)
/// falls back to its non-whitespace characters.
fn tokenize(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    if !words.is_empty() {
        return words;
    }
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(String::from)
        .collect()
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(MemoryError::EmbeddingFailed(
                "cannot embed empty text".into(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            let (i, sign) = self.bucket(token);
            vector[i] += sign;
        }
        // Bigrams carry a bit of word order at half weight.
        for pair in tokens.windows(2) {
            let (i, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[i] += 0.5 * sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Rust ownership rules").unwrap();
        let b = embedder.embed("Rust ownership rules").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("rust programming language").unwrap();
        let close = embedder.embed("I love the Rust programming language").unwrap();
        let far = embedder.embed("recipe for banana bread").unwrap();
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn blank_text_fails() {
        let embedder = HashingEmbedder::default();
        assert!(embedder.embed("").is_err());
        assert!(embedder.embed("  \n\t ").is_err());
    }

    #[test]
    fn symbol_only_text_embeds() {
        let embedder = HashingEmbedder::new(64);
        let party = embedder.embed("🎉🎉 :-)").unwrap();
        let norm: f32 = party.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(party, embedder.embed("🎉🎉 :-)").unwrap());
        assert!(embedder.embed("?").is_ok());
    }
}
