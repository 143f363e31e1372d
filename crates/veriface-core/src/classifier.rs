//! Nearest-centroid probabilistic classifier.
//!
//! Each identity's reference embedding becomes an L2-normalized centroid,
//! and confidence is the max class probability from a softmax over the
//! scaled cosine scores. The contract matches the similarity index:
//! predict plus a probability in [0, 1], with at least two distinct
//! identities required to train.

use crate::embedding::Embedding;
use crate::index::{EnrolledFace, IdentityId, Match, MatchError};
use crate::model::TrainingError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Softmax temperature over cosine scores. Cosine lives in [-1, 1], so a
/// scale around 12 separates a same-person score (~0.7+) from an
/// impostor score (~0.3) into a decisive probability gap.
const SCORE_SCALE: f32 = 12.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidClassifier {
    dim: usize,
    /// Class labels, sorted by ascending id; row i of `centroids`
    /// corresponds to `classes[i]`.
    classes: Vec<(IdentityId, String)>,
    centroids: Array2<f32>,
}

impl CentroidClassifier {
    /// Fit the classifier over one reference embedding per identity.
    ///
    /// Requires at least two distinct identities with correctly-sized
    /// embeddings; fewer is a training error, never a silently degenerate
    /// one-class model.
    pub fn fit(dim: usize, mut faces: Vec<EnrolledFace>) -> Result<Self, TrainingError> {
        faces.sort_by_key(|f| f.id);
        faces.dedup_by_key(|f| f.id);

        if faces.len() < 2 {
            return Err(TrainingError::InsufficientIdentities {
                required: 2,
                got: faces.len(),
            });
        }

        let mut centroids = Array2::<f32>::zeros((faces.len(), dim));
        let mut classes = Vec::with_capacity(faces.len());

        for (row, face) in faces.iter().enumerate() {
            if face.embedding.dim() != dim {
                return Err(TrainingError::Dimension {
                    id: face.id,
                    expected: dim,
                    got: face.embedding.dim(),
                });
            }
            let normalized = face.embedding.l2_normalized();
            for (col, v) in normalized.values.iter().enumerate() {
                centroids[[row, col]] = *v;
            }
            classes.push((face.id, face.name.clone()));
        }

        Ok(Self {
            dim,
            classes,
            centroids,
        })
    }

    /// Predict the class and take the max class probability as confidence;
    /// below-threshold predictions report unrecognized with the probability.
    pub fn match_probe(&self, probe: &Embedding, threshold: f32) -> Result<Match, MatchError> {
        if probe.dim() != self.dim {
            return Err(MatchError::Dimension {
                expected: self.dim,
                got: probe.dim(),
            });
        }
        if self.classes.is_empty() {
            return Err(MatchError::EmptyIndex);
        }

        let p = Array1::from_vec(probe.l2_normalized().values);
        let scores = self.centroids.dot(&p);
        let probs = softmax(&scores.to_vec(), SCORE_SCALE);

        // Strictly-greater: equal probabilities keep the lowest id, since
        // classes are sorted ascending.
        let mut best_idx = 0;
        for (i, prob) in probs.iter().enumerate() {
            if *prob > probs[best_idx] {
                best_idx = i;
            }
        }

        let confidence = probs[best_idx];
        if confidence >= threshold {
            let (id, name) = &self.classes[best_idx];
            Ok(Match {
                identity_id: Some(*id),
                name: Some(name.clone()),
                confidence,
            })
        } else {
            Ok(Match {
                identity_id: None,
                name: None,
                confidence,
            })
        }
    }

    pub fn ids(&self) -> Vec<IdentityId> {
        self.classes.iter().map(|(id, _)| *id).collect()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }
}

/// Numerically stable softmax over `scale * scores`.
fn softmax(scores: &[f32], scale: f32) -> Vec<f32> {
    let max = scores.iter().fold(f32::NEG_INFINITY, |m, s| m.max(scale * s));
    let exps: Vec<f32> = scores.iter().map(|s| (scale * s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
