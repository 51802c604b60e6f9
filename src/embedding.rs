use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::error::Result;

/// Default dimension of [`HashedEmbedder`] vectors.
pub const DEFAULT_HASHED_DIMENSION: usize = 256;

/// Turns a piece of text into one dense vector.
///
/// Implementations may load models lazily, hence `&mut self`.
pub trait Embedder: Send {
    /// Identifier recorded alongside stored vectors.
    fn model_id(&self) -> &str;

    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Needs no model download, so it backs offline use and tests. Texts sharing
/// words land close to each other; nothing more is promised.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimension: usize,
    model_id: String,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHED_DIMENSION)
    }
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashed-{dimension}"),
        }
    }
}

impl Embedder for HashedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two equally sized vectors; 0 when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_is_deterministic_and_normalized() {
        let mut a = HashedEmbedder::default();
        let mut b = HashedEmbedder::default();
        let va = a.embed("Rust ownership and borrowing").unwrap();
        let vb = b.embed("Rust ownership and borrowing").unwrap();

        assert_eq!(va, vb);
        assert_eq!(va.len(), DEFAULT_HASHED_DIMENSION);
        let norm: f32 = va.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashed_ignores_case_and_punctuation() {
        let mut e = HashedEmbedder::new(64);
        let a = e.embed("Hello, World!").unwrap();
        let b = e.embed("hello world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shared_words_score_higher() {
        let mut e = HashedEmbedder::default();
        let query = e.embed("neural network training").unwrap();
        let close = e.embed("training a neural network on images").unwrap();
        let far = e.embed("grocery list: eggs, milk, bread").unwrap();

        assert!(
            cosine_similarity(&query, &close) > cosine_similarity(&query, &far)
        );
    }

    #[test]
    fn empty_text_embeds_to_zero() {
        let mut e = HashedEmbedder::new(8);
        let v = e.embed("   ").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }

    #[test]
    fn model_id_names_dimension() {
        assert_eq!(HashedEmbedder::new(32).model_id(), "hashed-32");
    }
}
