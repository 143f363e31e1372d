//! Recognition engine: the identity model lifecycle plus the attendance
//! recording loop, safe to drive from the recognition surface and the
//! administrative surface at the same time.
//!
//! Concurrency model: store mutations and model replacement are
//! single-writer (one mutex around the store); `match` reads a complete
//! model snapshot behind an atomically-swapped `Arc` and never blocks on
//! a retrain in progress — a new model only becomes visible once fully
//! built.

use crate::notify::{AttendanceEvent, AttendanceEventKind, Notifier};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;
use veriface_core::model::ModelIoError;
use veriface_core::{
    verify_consistency, ConsistencyReport, Embedding, Match, MatchError, MatchStrategy,
    TrainedModel, TrainingError,
};
use veriface_store::{
    AttendanceTracker, Contact, Identity, RecordOutcome, Store, StoreError,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    ModelIo(#[from] ModelIoError),
    #[error("no trained model is live — enroll identities and retrain")]
    NoModel,
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Engine knobs, distilled from the daemon [`crate::Config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dim: usize,
    pub strategy: MatchStrategy,
    pub threshold: f32,
    pub cooldown: Duration,
    /// Where to persist the model artifact; `None` keeps it in memory only.
    pub model_path: Option<PathBuf>,
}

impl From<&crate::Config> for EngineConfig {
    fn from(cfg: &crate::Config) -> Self {
        Self {
            dim: cfg.embedding_dim,
            strategy: cfg.strategy,
            threshold: cfg.match_threshold,
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            model_path: Some(cfg.model_path.clone()),
        }
    }
}

/// Result of one recognition-loop observation.
#[derive(Debug, Serialize)]
pub struct Observation {
    pub matched: Match,
    /// `None` when nothing cleared the threshold or the match turned out
    /// to reference an identity no longer enrolled.
    pub outcome: Option<RecordOutcome>,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub identities: usize,
    pub dim: usize,
    pub strategy: MatchStrategy,
    pub threshold: f32,
    pub model: Option<ModelStatus>,
    /// Set when a consistency failure could not be healed by retraining;
    /// cleared by the next successful retrain.
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelStatus {
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub identities: usize,
}

pub struct Engine {
    store: Mutex<Store>,
    tracker: Mutex<AttendanceTracker>,
    model: RwLock<Option<Arc<TrainedModel>>>,
    degraded: AtomicBool,
    notifier: Box<dyn Notifier>,
    cfg: EngineConfig,
}

impl Engine {
    /// Build the engine around an open store: load the persisted model
    /// artifact if present, then run a consistency check (which trains a
    /// first model when none is live and the store has identities).
    pub fn new(
        store: Store,
        cfg: EngineConfig,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let engine = Self {
            store: Mutex::new(store),
            tracker: Mutex::new(AttendanceTracker::new(cfg.cooldown)),
            model: RwLock::new(None),
            degraded: AtomicBool::new(false),
            notifier,
            cfg,
        };
        engine.load_artifact();
        engine.consistency_check()?;
        Ok(engine)
    }

    fn load_artifact(&self) {
        let Some(path) = &self.cfg.model_path else {
            return;
        };
        if !path.exists() {
            return;
        }
        match TrainedModel::load(path) {
            Ok(model)
                if model.index.dim() == self.cfg.dim
                    && model.index.strategy() == self.cfg.strategy =>
            {
                tracing::info!(
                    model_id = %model.model_id,
                    trained_at = %model.trained_at,
                    "loaded model artifact"
                );
                self.set_model(Some(Arc::new(model)));
            }
            Ok(model) => {
                tracing::warn!(
                    model_id = %model.model_id,
                    artifact_dim = model.index.dim(),
                    artifact_strategy = %model.index.strategy(),
                    "model artifact does not match configuration; discarding"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to load model artifact; will retrain");
            }
        }
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Store>, EngineError> {
        self.store.lock().map_err(|_| EngineError::LockPoisoned)
    }

    fn lock_tracker(&self) -> Result<MutexGuard<'_, AttendanceTracker>, EngineError> {
        self.tracker.lock().map_err(|_| EngineError::LockPoisoned)
    }

    /// Clone out the live model reference. Readers work against this
    /// snapshot; a concurrent retrain swaps the slot without touching it.
    fn snapshot_model(&self) -> Option<Arc<TrainedModel>> {
        self.model.read().ok().and_then(|slot| slot.clone())
    }

    fn set_model(&self, model: Option<Arc<TrainedModel>>) {
        if let Ok(mut slot) = self.model.write() {
            *slot = model;
        }
    }

    // --- administrative surface -------------------------------------------

    pub fn enroll(
        &self,
        name: &str,
        embedding: Embedding,
        contact: Contact,
    ) -> Result<Identity, EngineError> {
        let identity = self.lock_store()?.enroll(name, embedding, contact)?;
        self.retrain_after_mutation("enroll");
        Ok(identity)
    }

    pub fn update(
        &self,
        id: i64,
        embedding: Option<Embedding>,
        contact: Option<Contact>,
    ) -> Result<Identity, EngineError> {
        let identity = self.lock_store()?.update(id, embedding, contact)?;
        self.retrain_after_mutation("update");
        Ok(identity)
    }

    pub fn remove(&self, id: i64) -> Result<(), EngineError> {
        self.lock_store()?.remove(id)?;
        self.retrain_after_mutation("remove");
        Ok(())
    }

    pub fn list_identities(&self) -> Result<Vec<Identity>, EngineError> {
        Ok(self.lock_store()?.get_all()?)
    }

    // --- recognition surface ----------------------------------------------

    /// Resolve a probe embedding against the live model. Side-effect free;
    /// never blocks on a retrain in progress.
    pub fn match_embedding(&self, probe: &Embedding) -> Result<Match, EngineError> {
        let model = self.snapshot_model().ok_or(EngineError::NoModel)?;
        Ok(model.match_probe(probe, self.cfg.threshold)?)
    }

    /// One step of the recognition loop: resolve the probe, and on a
    /// confident match record attendance and raise a first-sighting
    /// notification. A match against an identity that has since been
    /// removed is logged and downgraded to "no actionable match" — the
    /// loop must never crash on it.
    pub fn observe(
        &self,
        probe: &Embedding,
        now: NaiveDateTime,
    ) -> Result<Observation, EngineError> {
        let matched = self.match_embedding(probe)?;
        let Some(id) = matched.identity_id else {
            tracing::debug!(confidence = matched.confidence, "probe unrecognized");
            return Ok(Observation {
                matched,
                outcome: None,
            });
        };

        let outcome = {
            let mut store = self.lock_store()?;
            let mut tracker = self.lock_tracker()?;
            tracker.record(&mut store, id, now)
        };

        match outcome {
            Ok(outcome) => {
                if outcome == RecordOutcome::Created {
                    let event = AttendanceEvent {
                        identity_id: id,
                        name: matched
                            .name
                            .clone()
                            .unwrap_or_else(|| format!("#{id}")),
                        kind: AttendanceEventKind::FirstSighting,
                        timestamp: now,
                    };
                    if let Err(e) = self.notifier.notify(&event) {
                        // Delivery failure never rolls back the write.
                        tracing::warn!(error = %e, id, "notification delivery failed");
                    }
                }
                Ok(Observation {
                    matched,
                    outcome: Some(outcome),
                })
            }
            Err(StoreError::UnknownIdentity(stale)) => {
                tracing::warn!(
                    id = stale,
                    "match resolved to an identity no longer enrolled; healing model"
                );
                if let Err(e) = self.consistency_check() {
                    tracing::error!(error = %e, "consistency check after stale match failed");
                }
                Ok(Observation {
                    matched: Match {
                        identity_id: None,
                        name: None,
                        confidence: matched.confidence,
                    },
                    outcome: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // --- model lifecycle --------------------------------------------------

    /// Train a fresh model from the store and swap it in atomically.
    ///
    /// Training runs without holding the store lock, so an administrative
    /// mutation can land mid-train; rather than cancelling, the finished
    /// model is re-verified against the store and rebuilt once if it
    /// drifted.
    pub fn retrain(&self) -> Result<Arc<TrainedModel>, EngineError> {
        let mut model = self.train_once()?;
        let ids = self.lock_store()?.ids()?;
        if !verify_consistency(&model, &ids).is_consistent() {
            tracing::warn!("store changed during training; rebuilding from fresh snapshot");
            model = self.train_once()?;
        }
        let model = Arc::new(model);
        self.install(model.clone());
        Ok(model)
    }

    fn train_once(&self) -> Result<TrainedModel, EngineError> {
        let snapshot = self.lock_store()?.snapshot()?;
        Ok(TrainedModel::train(
            self.cfg.strategy,
            self.cfg.dim,
            snapshot,
        )?)
    }

    fn install(&self, model: Arc<TrainedModel>) {
        if let Some(path) = &self.cfg.model_path {
            if let Err(e) = model.save(path) {
                // In-memory model is still good; only persistence is degraded.
                tracing::warn!(error = %e, "failed to persist model artifact");
            }
        }
        self.set_model(Some(model));
        self.degraded.store(false, Ordering::Relaxed);
    }

    /// Retrain after a store mutation. A failure leaves the previous model
    /// live (fail-safe) — unless that model now predicts removed ids, in
    /// which case it is cleared rather than served stale.
    fn retrain_after_mutation(&self, op: &str) {
        match self.retrain() {
            Ok(model) => {
                tracing::info!(op, model_id = %model.model_id, "model retrained after mutation");
            }
            Err(e) => {
                tracing::error!(op, error = %e, "retrain after mutation failed");
                let invalid = match (self.snapshot_model(), self.lock_store().map(|s| s.ids())) {
                    (Some(model), Ok(Ok(ids))) => {
                        verify_consistency(&model, &ids).model_invalid()
                    }
                    _ => false,
                };
                if invalid {
                    tracing::error!(
                        op,
                        "previous model predicts removed identities; clearing it"
                    );
                    self.set_model(None);
                    self.degraded.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    /// Compare the live model against the store and self-heal on drift.
    ///
    /// Returns the drift report (`None` when no model is live). Invoked
    /// at startup, periodically by the daemon, and whenever a stale match
    /// surfaces. If the healing retrain fails the engine keeps a valid
    /// last-good model, drops an invalid one, and flags itself degraded.
    pub fn consistency_check(&self) -> Result<Option<ConsistencyReport>, EngineError> {
        let ids = self.lock_store()?.ids()?;

        let Some(model) = self.snapshot_model() else {
            if !ids.is_empty() {
                match self.retrain() {
                    Ok(model) => {
                        tracing::info!(model_id = %model.model_id, "trained initial model");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "no live model and training failed");
                        self.degraded.store(true, Ordering::Relaxed);
                    }
                }
            }
            return Ok(None);
        };

        let report = verify_consistency(&model, &ids);
        if !report.is_consistent() {
            tracing::warn!(
                model_id = %report.model_id,
                stale = ?report.stale,
                unindexed = ?report.unindexed,
                "model/store drift detected; retraining"
            );
            if let Err(e) = self.retrain() {
                tracing::error!(error = %e, "self-healing retrain failed");
                if report.model_invalid() {
                    self.set_model(None);
                }
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
        Ok(Some(report))
    }

    pub fn status(&self) -> Result<EngineStatus, EngineError> {
        let identities = self.lock_store()?.count()?;
        let model = self.snapshot_model().map(|m| ModelStatus {
            model_id: m.model_id,
            trained_at: m.trained_at,
            identities: m.index.len(),
        });
        Ok(EngineStatus {
            identities,
            dim: self.cfg.dim,
            strategy: self.cfg.strategy,
            threshold: self.cfg.threshold,
            model,
            degraded: self.degraded.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn axis(i: usize, dim: usize) -> Embedding {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        Embedding::new(v)
    }

    /// Captures events instead of delivering them.
    struct RecordingNotifier {
        events: Arc<StdMutex<Vec<AttendanceEvent>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: &AttendanceEvent) -> Result<(), crate::notify::NotifyError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn test_engine(strategy: MatchStrategy) -> (Engine, Arc<StdMutex<Vec<AttendanceEvent>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let notifier = RecordingNotifier {
            events: events.clone(),
        };
        let cfg = EngineConfig {
            dim: 4,
            strategy,
            threshold: 0.6,
            cooldown: Duration::from_secs(60),
            model_path: None,
        };
        let store = Store::open_in_memory(4).unwrap();
        let engine = Engine::new(store, cfg, Box::new(notifier)).unwrap();
        (engine, events)
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn enroll_then_match_round_trip() {
        let (engine, _) = test_engine(MatchStrategy::Similarity);
        let a = engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();
        engine.enroll("bob", axis(1, 4), Contact::default()).unwrap();

        let m = engine.match_embedding(&axis(0, 4)).unwrap();
        assert_eq!(m.identity_id, Some(a.id));
        assert!(m.confidence >= 0.6);
    }

    #[test]
    fn ambiguous_probe_reports_best_score_without_identity() {
        let (engine, _) = test_engine(MatchStrategy::Similarity);
        engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();
        engine.enroll("bob", axis(1, 4), Contact::default()).unwrap();

        // Equal 0.5 cosine against both identities, below the 0.6
        // threshold: unrecognized, best score still reported.
        let m = engine
            .match_embedding(&Embedding::new(vec![0.5, 0.5, 0.5, 0.5]))
            .unwrap();
        assert_eq!(m.identity_id, None);
        assert!((m.confidence - 0.5).abs() < 1e-4);
    }

    #[test]
    fn match_without_model_is_an_error() {
        let (engine, _) = test_engine(MatchStrategy::Similarity);
        assert!(matches!(
            engine.match_embedding(&axis(0, 4)),
            Err(EngineError::NoModel)
        ));
    }

    #[test]
    fn observe_records_and_notifies_once_per_day() {
        let (engine, events) = test_engine(MatchStrategy::Similarity);
        let a = engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();

        let obs = engine.observe(&axis(0, 4), ts("2026-08-30 09:00:00")).unwrap();
        assert_eq!(obs.matched.identity_id, Some(a.id));
        assert_eq!(obs.outcome, Some(RecordOutcome::Created));

        // Within cooldown: recognized but not persisted, no second event.
        let obs = engine.observe(&axis(0, 4), ts("2026-08-30 09:00:30")).unwrap();
        assert_eq!(obs.outcome, Some(RecordOutcome::Skipped));

        let obs = engine.observe(&axis(0, 4), ts("2026-08-30 09:05:00")).unwrap();
        assert_eq!(obs.outcome, Some(RecordOutcome::Updated));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identity_id, a.id);
        assert_eq!(events[0].kind, AttendanceEventKind::FirstSighting);
    }

    #[test]
    fn unrecognized_probe_records_nothing() {
        let (engine, events) = test_engine(MatchStrategy::Similarity);
        engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();

        let obs = engine.observe(&axis(2, 4), ts("2026-08-30 09:00:00")).unwrap();
        assert_eq!(obs.matched.identity_id, None);
        assert_eq!(obs.outcome, None);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn removal_heals_model_and_forgets_identity() {
        let (engine, _) = test_engine(MatchStrategy::Similarity);
        let a = engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();
        engine.enroll("bob", axis(1, 4), Contact::default()).unwrap();

        engine.remove(a.id).unwrap();

        // Auto-retrain already ran; the live model must not predict alice.
        let report = engine.consistency_check().unwrap().unwrap();
        assert!(report.is_consistent());
        let m = engine.match_embedding(&axis(0, 4)).unwrap();
        assert_ne!(m.identity_id, Some(a.id));
    }

    #[test]
    fn stale_artifact_is_detected_and_healed() {
        // Simulate drift introduced behind the engine's back: train on two
        // identities, then rebuild the engine over a store that lost one.
        let dir = std::env::temp_dir().join(format!("veriface-engine-{}", uuid::Uuid::new_v4()));
        let model_path = dir.join("model.json");
        let cfg = EngineConfig {
            dim: 4,
            strategy: MatchStrategy::Similarity,
            threshold: 0.6,
            cooldown: Duration::from_secs(60),
            model_path: Some(model_path.clone()),
        };

        let db_path = dir.join("attendance.db");
        {
            let store = Store::open(&db_path, 4).unwrap();
            let engine = Engine::new(store, cfg.clone(), Box::new(crate::LogNotifier)).unwrap();
            let a = engine
                .enroll("alice", axis(0, 4), Contact::default())
                .unwrap();
            engine.enroll("bob", axis(1, 4), Contact::default()).unwrap();

            // Mutate the store directly, as an admin tool would.
            engine.lock_store().unwrap().remove(a.id).unwrap();
        }

        // Fresh engine loads the (now stale) artifact, then self-heals at
        // startup: the healed model no longer predicts the removed id.
        let store = Store::open(&db_path, 4).unwrap();
        let engine = Engine::new(store, cfg, Box::new(crate::LogNotifier)).unwrap();
        let m = engine.match_embedding(&axis(0, 4)).unwrap();
        assert_eq!(m.identity_id, None);
        let status = engine.status().unwrap();
        assert!(!status.degraded);
        assert_eq!(status.model.unwrap().identities, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_retrain_clears_invalid_model() {
        // Classifier needs two identities: removing one makes retraining
        // impossible and the old model invalid, so nothing stays live.
        let (engine, _) = test_engine(MatchStrategy::Classifier);
        let a = engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();
        engine.enroll("bob", axis(1, 4), Contact::default()).unwrap();
        assert!(engine.match_embedding(&axis(0, 4)).is_ok());

        engine.remove(a.id).unwrap();

        assert!(matches!(
            engine.match_embedding(&axis(0, 4)),
            Err(EngineError::NoModel)
        ));
        assert!(engine.status().unwrap().degraded);
    }

    #[test]
    fn classifier_strategy_round_trip() {
        let (engine, _) = test_engine(MatchStrategy::Classifier);
        let a = engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();
        engine.enroll("bob", axis(1, 4), Contact::default()).unwrap();

        let m = engine.match_embedding(&axis(0, 4)).unwrap();
        assert_eq!(m.identity_id, Some(a.id));
        assert!(m.confidence > 0.6 && m.confidence <= 1.0);
    }

    #[test]
    fn status_reflects_store_and_model() {
        let (engine, _) = test_engine(MatchStrategy::Similarity);
        engine
            .enroll("alice", axis(0, 4), Contact::default())
            .unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.identities, 1);
        assert_eq!(status.model.unwrap().identities, 1);
        assert!(!status.degraded);
    }
}
