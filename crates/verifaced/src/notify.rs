//! Outbound notification boundary.
//!
//! The tracker raises an event on the first detection of an identity each
//! day; delivery is someone else's problem (messaging, webhooks, ...).
//! A failed delivery never rolls back the attendance write.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use veriface_core::IdentityId;

#[derive(Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceEventKind {
    /// First confident detection of the identity today.
    FirstSighting,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub identity_id: IdentityId,
    pub name: String,
    pub kind: AttendanceEventKind,
    pub timestamp: NaiveDateTime,
}

/// Dispatcher for attendance events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AttendanceEvent) -> Result<(), NotifyError>;
}

/// Default dispatcher: structured log line, nothing else.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &AttendanceEvent) -> Result<(), NotifyError> {
        tracing::info!(
            id = event.identity_id,
            name = %event.name,
            kind = ?event.kind,
            at = %event.timestamp,
            "attendance event"
        );
        Ok(())
    }
}
