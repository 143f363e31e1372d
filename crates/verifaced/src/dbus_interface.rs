use std::sync::Arc;
use verifaced::{Engine, EngineError};
use veriface_core::Embedding;
use zbus::interface;

/// D-Bus interface for the VeriFace attendance daemon.
///
/// Bus name: org.veriface.Attendance1
/// Object path: /org/veriface/Attendance1
///
/// Probe embeddings arrive from the external embedding provider as `ad`
/// (array of double); payloads go back as JSON strings. Engine calls run
/// on the blocking pool — rusqlite underneath is synchronous.
pub struct AttendanceService {
    engine: Arc<Engine>,
}

impl AttendanceService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

fn to_embedding(values: Vec<f64>) -> Embedding {
    Embedding::new(values.into_iter().map(|v| v as f32).collect())
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

async fn blocking<T, F>(f: F) -> zbus::fdo::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("engine task failed: {e}")))?
        .map_err(failed)
}

#[interface(name = "org.veriface.Attendance1")]
impl AttendanceService {
    /// Recognition-loop entry point: resolve the probe and, on a confident
    /// match, record attendance. Returns the observation as JSON.
    async fn observe(&self, embedding: Vec<f64>) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let obs = blocking(move || {
            let now = chrono::Local::now().naive_local();
            engine.observe(&to_embedding(embedding), now)
        })
        .await?;
        json(&obs)
    }

    /// Resolve a probe without recording anything.
    async fn recognize(&self, embedding: Vec<f64>) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let matched =
            blocking(move || engine.match_embedding(&to_embedding(embedding))).await?;
        json(&matched)
    }

    /// Rebuild the identity model from the store. Returns the new model id.
    async fn retrain(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let model = blocking(move || engine.retrain()).await?;
        Ok(model.model_id.to_string())
    }

    /// Compare the live model against the store, self-healing on drift.
    /// Returns the drift report as JSON ("null" when no model is live).
    async fn verify_consistency(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let report = blocking(move || engine.consistency_check()).await?;
        json(&report)
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let status = blocking(move || engine.status()).await?;
        json(&status)
    }

    /// Enrolled identities (without embeddings) as JSON.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine.clone();
        let identities = blocking(move || engine.list_identities()).await?;
        json(&identities)
    }
}
