//! Identity index — nearest-match queries over the enrolled gallery.
//!
//! Two interchangeable strategies sit behind [`IdentityIndex::match_probe`]:
//! a full-scan cosine similarity search and a trained probabilistic
//! classifier. Both return the same normalized [`Match`] shape, so callers
//! never care which one is configured.

use crate::classifier::CentroidClassifier;
use crate::embedding::Embedding;
use crate::model::TrainingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical identity identifier, minted once per enrollment and carried
/// everywhere: store rows, model labels, attendance keys.
pub type IdentityId = i64;

/// One enrolled identity's reference embedding, as snapshotted from the
/// store at index build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub id: IdentityId,
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    #[error("identity index is empty — enroll identities and retrain")]
    EmptyIndex,
}

/// Result of resolving a probe embedding against the index.
///
/// `identity_id` is `None` when nothing cleared the threshold; the best
/// confidence observed is still reported so callers can log near-misses.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub identity_id: Option<IdentityId>,
    pub name: Option<String>,
    /// Normalized confidence: cosine similarity in [-1, 1] for the
    /// similarity strategy, max class probability in [0, 1] for the
    /// classifier strategy.
    pub confidence: f32,
}

impl Match {
    fn unrecognized(confidence: f32) -> Self {
        Self {
            identity_id: None,
            name: None,
            confidence,
        }
    }
}

/// Matching strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Full-scan cosine similarity against every enrolled embedding.
    Similarity,
    /// Nearest-centroid classifier with softmax class probabilities.
    Classifier,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Similarity => write!(f, "similarity"),
            Self::Classifier => write!(f, "classifier"),
        }
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(Self::Similarity),
            "classifier" => Ok(Self::Classifier),
            other => Err(format!(
                "unknown match strategy '{other}' (expected 'similarity' or 'classifier')"
            )),
        }
    }
}

/// Linear-scan cosine similarity index.
///
/// Complexity is linear in the enrolled count per query — fine for the
/// target scale of tens to low hundreds of identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityIndex {
    dim: usize,
    /// Sorted by ascending id so equal scores deterministically keep the
    /// lowest id.
    entries: Vec<EnrolledFace>,
}

impl SimilarityIndex {
    pub fn build(dim: usize, mut faces: Vec<EnrolledFace>) -> Result<Self, TrainingError> {
        if faces.is_empty() {
            return Err(TrainingError::InsufficientIdentities {
                required: 1,
                got: 0,
            });
        }
        for face in &faces {
            if face.embedding.dim() != dim {
                return Err(TrainingError::Dimension {
                    id: face.id,
                    expected: dim,
                    got: face.embedding.dim(),
                });
            }
        }
        faces.sort_by_key(|f| f.id);
        Ok(Self { dim, entries: faces })
    }

    pub fn match_probe(&self, probe: &Embedding, threshold: f32) -> Result<Match, MatchError> {
        if probe.dim() != self.dim {
            return Err(MatchError::Dimension {
                expected: self.dim,
                got: probe.dim(),
            });
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best: Option<&EnrolledFace> = None;

        // Strictly-greater keeps the lowest id on a tie; entries are
        // already sorted ascending.
        for face in &self.entries {
            let sim = probe.similarity(&face.embedding);
            if sim > best_sim {
                best_sim = sim;
                best = Some(face);
            }
        }

        match best {
            Some(face) if best_sim >= threshold => Ok(Match {
                identity_id: Some(face.id),
                name: Some(face.name.clone()),
                confidence: best_sim,
            }),
            Some(_) => Ok(Match::unrecognized(best_sim)),
            None => Err(MatchError::EmptyIndex),
        }
    }

    pub fn ids(&self) -> Vec<IdentityId> {
        self.entries.iter().map(|f| f.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unified index over both matching strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum IdentityIndex {
    Similarity(SimilarityIndex),
    Classifier(CentroidClassifier),
}

impl IdentityIndex {
    /// Resolve a probe embedding to the best identity candidate.
    ///
    /// Side-effect free. Never errors for "no match" — only for a
    /// malformed probe or an empty index.
    pub fn match_probe(&self, probe: &Embedding, threshold: f32) -> Result<Match, MatchError> {
        match self {
            Self::Similarity(idx) => idx.match_probe(probe, threshold),
            Self::Classifier(clf) => clf.match_probe(probe, threshold),
        }
    }

    /// The identity ids this index can resolve, ascending.
    pub fn ids(&self) -> Vec<IdentityId> {
        match self {
            Self::Similarity(idx) => idx.ids(),
            Self::Classifier(clf) => clf.ids(),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Similarity(idx) => idx.dim,
            Self::Classifier(clf) => clf.dim(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Similarity(idx) => idx.len(),
            Self::Classifier(clf) => clf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn strategy(&self) -> MatchStrategy {
        match self {
            Self::Similarity(_) => MatchStrategy::Similarity,
            Self::Classifier(_) => MatchStrategy::Classifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(id: IdentityId, name: &str, values: Vec<f32>) -> EnrolledFace {
        EnrolledFace {
            id,
            name: name.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn exact_match_yields_full_confidence() {
        let idx = SimilarityIndex::build(
            4,
            vec![
                face(1, "alice", vec![1.0, 0.0, 0.0, 0.0]),
                face(2, "bob", vec![0.0, 1.0, 0.0, 0.0]),
            ],
        )
        .unwrap();

        let m = idx
            .match_probe(&Embedding::new(vec![1.0, 0.0, 0.0, 0.0]), 0.6)
            .unwrap();
        assert_eq!(m.identity_id, Some(1));
        assert_eq!(m.name.as_deref(), Some("alice"));
        assert!((m.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn below_threshold_is_unrecognized_not_an_error() {
        // Probe halfway between alice and bob: cos = 1/sqrt(2) ~ 0.707
        // against each, below a 0.75 threshold.
        let idx = SimilarityIndex::build(
            4,
            vec![
                face(1, "alice", vec![1.0, 0.0, 0.0, 0.0]),
                face(2, "bob", vec![0.0, 1.0, 0.0, 0.0]),
            ],
        )
        .unwrap();

        let m = idx
            .match_probe(&Embedding::new(vec![0.5, 0.5, 0.0, 0.0]), 0.75)
            .unwrap();
        assert_eq!(m.identity_id, None);
        assert!((m.confidence - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn tie_prefers_lowest_id() {
        // Two identities with identical embeddings; the lower id must win
        // regardless of insertion order.
        let idx = SimilarityIndex::build(
            2,
            vec![
                face(7, "late", vec![1.0, 0.0]),
                face(3, "early", vec![1.0, 0.0]),
            ],
        )
        .unwrap();

        let m = idx.match_probe(&Embedding::new(vec![1.0, 0.0]), 0.6).unwrap();
        assert_eq!(m.identity_id, Some(3));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let idx = SimilarityIndex::build(4, vec![face(1, "a", vec![1.0, 0.0, 0.0, 0.0])]).unwrap();
        let err = idx
            .match_probe(&Embedding::new(vec![1.0, 0.0]), 0.6)
            .unwrap_err();
        assert!(matches!(err, MatchError::Dimension { expected: 4, got: 2 }));
    }

    #[test]
    fn build_rejects_mixed_dimensions() {
        let err = SimilarityIndex::build(
            4,
            vec![
                face(1, "a", vec![1.0, 0.0, 0.0, 0.0]),
                face(2, "b", vec![1.0, 0.0]),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::Dimension { id: 2, expected: 4, got: 2 }
        ));
    }

    #[test]
    fn build_rejects_empty_gallery() {
        assert!(matches!(
            SimilarityIndex::build(4, vec![]),
            Err(TrainingError::InsufficientIdentities { required: 1, got: 0 })
        ));
    }

    #[test]
    fn strategy_parse_round_trip() {
        for s in [MatchStrategy::Similarity, MatchStrategy::Classifier] {
            assert_eq!(s.to_string().parse::<MatchStrategy>().unwrap(), s);
        }
        assert!("svm".parse::<MatchStrategy>().is_err());
    }
}
