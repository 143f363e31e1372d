use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding blob length {0} is not a multiple of 4 (expected little-endian f32 values)")]
    MalformedBlob(usize),
}

/// Face embedding vector.
///
/// Fixed dimensionality per deployment — 512 for ArcFace-class backends,
/// 128 for dlib-class backends — never mixed within one store. Equality
/// is only meaningful up to similarity, never exact comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// An all-zero vector carries no face signal; the embedding backend
    /// produces one only on a failed extraction.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Always processes all dimensions; a zero vector yields 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Return an L2-normalized copy. A zero vector is returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Embedding::new(self.values.iter().map(|x| x / norm).collect())
        } else {
            self.clone()
        }
    }

    /// Encode as little-endian f32 bytes — the on-disk BLOB format.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode from the little-endian f32 BLOB format.
    pub fn from_blob(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        if bytes.len() % 4 != 0 {
            return Err(EmbeddingError::MalformedBlob(bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_zero_vector_is_zero() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn similarity_is_scale_invariant() {
        let a = Embedding::new(vec![0.5, 0.5]);
        let b = Embedding::new(vec![2.0, 2.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn blob_round_trip() {
        let e = Embedding::new(vec![1.5, -0.25, 0.0, 3.75]);
        let decoded = Embedding::from_blob(&e.to_blob()).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn blob_rejects_truncated_input() {
        let e = Embedding::new(vec![1.0, 2.0]);
        let mut bytes = e.to_blob();
        bytes.pop();
        assert!(matches!(
            Embedding::from_blob(&bytes),
            Err(EmbeddingError::MalformedBlob(7))
        ));
    }

    #[test]
    fn normalized_has_unit_norm() {
        let e = Embedding::new(vec![3.0, 4.0]);
        let n = e.l2_normalized();
        let norm: f32 = n.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_detected() {
        assert!(Embedding::new(vec![0.0; 8]).is_zero());
        assert!(!Embedding::new(vec![0.0, 1e-9]).is_zero());
    }
}
