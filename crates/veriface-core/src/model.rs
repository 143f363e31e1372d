//! Trained model lifecycle: training, the persisted artifact, and
//! consistency checks against the enrolled-identity set.
//!
//! A model is a derived, disposable artifact built from a snapshot of the
//! store. At most one is live at a time; replacement discards the prior
//! artifact (no versioned rollback).

use crate::embedding::Embedding;
use crate::index::{
    EnrolledFace, IdentityId, IdentityIndex, Match, MatchError, MatchStrategy, SimilarityIndex,
};
use crate::classifier::CentroidClassifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("need at least {required} enrolled identities with valid embeddings, got {got}")]
    InsufficientIdentities { required: usize, got: usize },
    #[error("identity {id} has a {got}-dimensional embedding, expected {expected}")]
    Dimension {
        id: IdentityId,
        expected: usize,
        got: usize,
    },
}

#[derive(Error, Debug)]
pub enum ModelIoError {
    #[error("model artifact i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("model artifact encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// A trained identity model: the index plus provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub index: IdentityIndex,
}

impl TrainedModel {
    /// Train a model over a snapshot of enrolled identities.
    ///
    /// Identities with zero embeddings are skipped (no face signal);
    /// wrong-dimension embeddings fail the whole training run. The
    /// classifier strategy needs at least two usable identities, the
    /// similarity strategy at least one.
    pub fn train(
        strategy: MatchStrategy,
        dim: usize,
        snapshot: Vec<EnrolledFace>,
    ) -> Result<Self, TrainingError> {
        let usable: Vec<EnrolledFace> = snapshot
            .into_iter()
            .filter(|f| {
                if f.embedding.is_zero() {
                    tracing::warn!(id = f.id, name = %f.name, "skipping identity with zero embedding");
                    false
                } else {
                    true
                }
            })
            .collect();

        let index = match strategy {
            MatchStrategy::Similarity => {
                IdentityIndex::Similarity(SimilarityIndex::build(dim, usable)?)
            }
            MatchStrategy::Classifier => {
                IdentityIndex::Classifier(CentroidClassifier::fit(dim, usable)?)
            }
        };

        let model = Self {
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            index,
        };
        tracing::info!(
            model_id = %model.model_id,
            strategy = %strategy,
            identities = model.index.len(),
            dim,
            "trained identity model"
        );
        Ok(model)
    }

    pub fn match_probe(&self, probe: &Embedding, threshold: f32) -> Result<Match, MatchError> {
        self.index.match_probe(probe, threshold)
    }

    /// The set of ids this model can predict.
    pub fn ids(&self) -> BTreeSet<IdentityId> {
        self.index.ids().into_iter().collect()
    }

    /// Persist the artifact as JSON, replacing any prior artifact
    /// atomically (write to a temp file, then rename over the target).
    pub fn save(&self, path: &Path) -> Result<(), ModelIoError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), model_id = %self.model_id, "model artifact saved");
        Ok(())
    }

    /// Load a previously saved artifact.
    pub fn load(path: &Path) -> Result<Self, ModelIoError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Divergence between a trained model and the current enrolled set.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub model_id: Uuid,
    /// Ids the model predicts but the store no longer has. Any entry here
    /// makes the model invalid until retrained.
    pub stale: Vec<IdentityId>,
    /// Enrolled ids the model does not know about; predictions still
    /// resolve to real identities, but a retrain is due.
    pub unindexed: Vec<IdentityId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.stale.is_empty() && self.unindexed.is_empty()
    }

    /// Stale entries mean the model could resolve a probe to a removed
    /// identity — it must not keep serving.
    pub fn model_invalid(&self) -> bool {
        !self.stale.is_empty()
    }
}

/// Compare the ids a model can predict against the ids currently enrolled.
pub fn verify_consistency(
    model: &TrainedModel,
    store_ids: &BTreeSet<IdentityId>,
) -> ConsistencyReport {
    let model_ids = model.ids();
    ConsistencyReport {
        model_id: model.model_id,
        stale: model_ids.difference(store_ids).copied().collect(),
        unindexed: store_ids.difference(&model_ids).copied().collect(),
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

    fn snapshot() -> Vec<EnrolledFace> {
        vec![
            face(1, "alice", vec![1.0, 0.0, 0.0, 0.0]),
            face(2, "bob", vec![0.0, 1.0, 0.0, 0.0]),
        ]
    }

    #[test]
    fn train_both_strategies() {
        for strategy in [MatchStrategy::Similarity, MatchStrategy::Classifier] {
            let model = TrainedModel::train(strategy, 4, snapshot()).unwrap();
            assert_eq!(model.index.strategy(), strategy);
            assert_eq!(model.ids().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        }
    }

    #[test]
    fn zero_embeddings_are_skipped() {
        let mut snap = snapshot();
        snap.push(face(3, "ghost", vec![0.0, 0.0, 0.0, 0.0]));
        let model = TrainedModel::train(MatchStrategy::Similarity, 4, snap).unwrap();
        assert!(!model.ids().contains(&3));
    }

    #[test]
    fn classifier_fails_fast_below_two_usable() {
        let snap = vec![
            face(1, "alice", vec![1.0, 0.0, 0.0, 0.0]),
            face(2, "ghost", vec![0.0; 4]),
        ];
        let err = TrainedModel::train(MatchStrategy::Classifier, 4, snap).unwrap_err();
        assert!(matches!(
            err,
            TrainingError::InsufficientIdentities { required: 2, got: 1 }
        ));
    }

    #[test]
    fn artifact_round_trip() {
        let dir = std::env::temp_dir().join(format!("veriface-model-{}", Uuid::new_v4()));
        let path = dir.join("model.json");

        let model = TrainedModel::train(MatchStrategy::Classifier, 4, snapshot()).unwrap();
        model.save(&path).unwrap();

        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(loaded.model_id, model.model_id);
        let m = loaded
            .match_probe(&Embedding::new(vec![1.0, 0.0, 0.0, 0.0]), 0.6)
            .unwrap();
        assert_eq!(m.identity_id, Some(1));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn save_replaces_prior_artifact() {
        let dir = std::env::temp_dir().join(format!("veriface-model-{}", Uuid::new_v4()));
        let path = dir.join("model.json");

        let first = TrainedModel::train(MatchStrategy::Similarity, 4, snapshot()).unwrap();
        first.save(&path).unwrap();
        let second = TrainedModel::train(MatchStrategy::Similarity, 4, snapshot()).unwrap();
        second.save(&path).unwrap();

        assert_eq!(TrainedModel::load(&path).unwrap().model_id, second.model_id);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn consistency_flags_stale_and_unindexed() {
        let model = TrainedModel::train(MatchStrategy::Similarity, 4, snapshot()).unwrap();

        // Store lost bob and gained carol.
        let store_ids: BTreeSet<IdentityId> = [1, 3].into_iter().collect();
        let report = verify_consistency(&model, &store_ids);
        assert_eq!(report.stale, vec![2]);
        assert_eq!(report.unindexed, vec![3]);
        assert!(report.model_invalid());
        assert!(!report.is_consistent());
    }

    #[test]
    fn consistency_clean_when_sets_match() {
        let model = TrainedModel::train(MatchStrategy::Similarity, 4, snapshot()).unwrap();
        let store_ids: BTreeSet<IdentityId> = [1, 2].into_iter().collect();
        let report = verify_consistency(&model, &store_ids);
        assert!(report.is_consistent());
        assert!(!report.model_invalid());
    }
}
