use std::path::PathBuf;
use veriface_core::MatchStrategy;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the trained model artifact.
    pub model_path: PathBuf,
    /// Embedding dimensionality for this deployment (128 or 512).
    pub embedding_dim: usize,
    /// Matching strategy: similarity search or trained classifier.
    pub strategy: MatchStrategy,
    /// Acceptance threshold for a positive match.
    pub match_threshold: f32,
    /// Minimum seconds between persisted attendance updates per identity.
    pub cooldown_secs: u64,
    /// Interval for the periodic model/store consistency check.
    pub consistency_check_secs: u64,
}

impl Config {
    /// Load configuration from `VERIFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("veriface");

        let db_path = std::env::var("VERIFACE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));
        let model_path = std::env::var("VERIFACE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("model.json"));

        let strategy = std::env::var("VERIFACE_MATCH_STRATEGY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(MatchStrategy::Similarity);

        Self {
            db_path,
            model_path,
            embedding_dim: env_usize("VERIFACE_EMBEDDING_DIM", 512),
            strategy,
            match_threshold: env_f32(
                "VERIFACE_MATCH_THRESHOLD",
                veriface_core::DEFAULT_MATCH_THRESHOLD,
            ),
            cooldown_secs: env_u64(
                "VERIFACE_COOLDOWN_SECS",
                veriface_store::DEFAULT_COOLDOWN.as_secs(),
            ),
            consistency_check_secs: env_u64("VERIFACE_CONSISTENCY_CHECK_SECS", 300),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
