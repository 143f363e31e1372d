//! veriface-core — Identity resolution engine.
//!
//! Turns a probe face embedding into a best identity candidate with a
//! normalized confidence score, using either direct cosine similarity
//! search or a trained probabilistic classifier. Also owns the trained
//! model artifact and its consistency checks against the enrolled set.

pub mod classifier;
pub mod embedding;
pub mod index;
pub mod model;

pub use embedding::{Embedding, EmbeddingError};
pub use index::{EnrolledFace, IdentityId, IdentityIndex, Match, MatchError, MatchStrategy};
pub use model::{verify_consistency, ConsistencyReport, TrainedModel, TrainingError};

/// Default acceptance threshold for a positive match. Tunable per
/// deployment via configuration.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
