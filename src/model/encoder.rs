//! Deterministic feature-hash text encoder
//!
//! The stand-in for the heavy embedding model: token features are hashed
//! into a fixed-dimension vector and weighted by a projection table built
//! at load time. Deterministic across processes, so a vector produced in a
//! worker is comparable to one produced anywhere else.

use super::error::{ModelError, ModelResult};

/// Feature-hash text encoder with a fixed embedding dimension.
pub struct TextEncoder {
    dimension: usize,
    /// Per-bucket weights, built once at load
    projection: Vec<f32>,
}

impl TextEncoder {
    /// Build the encoder, allocating its projection table.
    ///
    /// This allocation is what cache eviction frees again.
    pub fn load(dimension: usize) -> ModelResult<Self> {
        if dimension == 0 {
            return Err(ModelError::InvalidDimension { dimension });
        }

        let projection = (0..dimension)
            .map(|i| {
                let h = splitmix64(i as u64 ^ 0x9e37_79b9_7f4a_7c15);
                // Bucket weights in [0.5, 1.5]
                0.5 + (h >> 11) as f32 / (1u64 << 53) as f32
            })
            .collect();

        Ok(Self {
            dimension,
            projection,
        })
    }

    /// Embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a text into an L2-normalized vector.
    ///
    /// Empty or non-alphanumeric input yields the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * self.projection[bucket];
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }

    /// Cosine similarity between two vectors of equal dimension.
    pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        dot / (na * nb)
    }

    /// Best-scoring candidate for a query, as `(index, score)`.
    ///
    /// Returns `None` when there are no candidates.
    pub fn rank(&self, query: &str, candidates: &[String]) -> Option<(usize, f32)> {
        let query_vec = self.embed(query);

        candidates
            .iter()
            .enumerate()
            .map(|(i, text)| (i, Self::cosine(&query_vec, &self.embed(text))))
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Lowercased alphanumeric tokens
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// FNV-1a hash
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// SplitMix64 mixer for the projection table
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
