//! Deterministic feature-hashing embedder.
//!
//! Lowercases the text, splits it into alphanumeric word tokens (so
//! `add_two` contributes `add` and `two`), hashes each token into one of
//! `dims` buckets with SHA-256, and L2-normalises the counts. Vectors are
//! non-negative, so cosine distances stay within `[0, 1]`.
//!
//! The bucket assignment only depends on the token bytes, which keeps
//! persisted vectors comparable across processes and platforms.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Embedder;
use crate::error::SkillError;

pub(crate) const DEFAULT_DIMS: usize = 256;

pub struct HashingProvider {
    dims: usize,
    model_name: String,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model_name: format!("hashing-{}", dims),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            vector[index] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashingProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SkillError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
