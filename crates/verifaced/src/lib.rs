//! verifaced — Attendance daemon library.
//!
//! Wires the identity resolution core and the enrollment store into one
//! engine: a continuous recognition surface (probe embeddings in,
//! attendance records out) running concurrently with administrative
//! mutations, with the trained model swapped atomically behind the scenes.

pub mod config;
pub mod engine;
pub mod notify;

pub use config::Config;
pub use engine::{Engine, EngineConfig, EngineError, Observation};
pub use notify::{AttendanceEvent, LogNotifier, Notifier};
