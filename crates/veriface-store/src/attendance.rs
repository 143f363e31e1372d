//! Attendance tracking — one presence window per identity per day.
//!
//! The tracker is a state machine per `(identity, day)`: the first
//! confident match of the day creates the row (`first_seen = last_seen`),
//! every later match only advances `last_seen`. A per-identity cooldown
//! suppresses redundant writes from continuous video frames; the cooldown
//! map is in-memory only, so a restart costs at most one extra persisted
//! update, never a correctness violation.

use crate::{Store, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use veriface_core::IdentityId;

/// Minimum interval between persisted updates per identity.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// What a `record` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// First confident match of the day — row created, notification due.
    Created,
    /// Subsequent match — `last_seen` advanced.
    Updated,
    /// Match within the cooldown window — recognized but not persisted.
    Skipped,
}

pub struct AttendanceTracker {
    cooldown: chrono::Duration,
    last_write: HashMap<IdentityId, NaiveDateTime>,
}

impl AttendanceTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            last_write: HashMap::new(),
        }
    }

    /// Record a confident sighting of `id` at `now`.
    ///
    /// Re-validates the identity against the store inside the write
    /// transaction — the matcher's view may be stale relative to a
    /// deletion, and a removed identity must never gain attendance rows.
    /// The select-then-write runs in one transaction so concurrent
    /// recorders cannot lose updates.
    pub fn record(
        &mut self,
        store: &mut Store,
        id: IdentityId,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, StoreError> {
        let day = now.date().format(DAY_FORMAT).to_string();
        let ts = now.format(TS_FORMAT).to_string();

        let tx = store.conn.transaction()?;

        // Re-validation runs before the cooldown: a removed identity must
        // surface as an error on the very next sighting, not hide behind
        // a Skipped until the window expires.
        let enrolled: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM identities WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if enrolled.is_none() {
            self.last_write.remove(&id);
            return Err(StoreError::UnknownIdentity(id));
        }

        // Cooldown only suppresses same-day writes; a day rollover always
        // goes through so the new day's row is created promptly.
        if let Some(last) = self.last_write.get(&id) {
            if last.date() == now.date() && now - *last < self.cooldown {
                tracing::trace!(id, "attendance write suppressed by cooldown");
                return Ok(RecordOutcome::Skipped);
            }
        }

        let existing: Option<String> = tx
            .query_row(
                "SELECT first_seen FROM attendance WHERE identity_id = ?1 AND day = ?2",
                params![id, day],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO attendance (identity_id, day, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![id, day, ts],
                )?;
                RecordOutcome::Created
            }
            Some(_) => {
                // first_seen is immutable once set; last_seen never moves
                // backwards (MAX on this text format compares chronologically).
                tx.execute(
                    "UPDATE attendance SET last_seen = MAX(last_seen, ?1)
                     WHERE identity_id = ?2 AND day = ?3",
                    params![ts, id, day],
                )?;
                RecordOutcome::Updated
            }
        };
        tx.commit()?;

        self.last_write.insert(id, now);
        tracing::debug!(id, ?outcome, %ts, "attendance recorded");
        Ok(outcome)
    }
}

/// One report row; `name` falls back to `#<id>` for identities removed
/// after the attendance was taken (history is retained for audit).
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRow {
    pub identity_id: IdentityId,
    pub name: String,
    pub day: String,
    pub first_seen: String,
    pub last_seen: String,
    pub duration_minutes: f64,
}

impl Store {
    /// Attendance rows for `[from, to]` inclusive, optionally filtered to
    /// one identity, ordered by day then id.
    pub fn attendance_report(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        identity: Option<IdentityId>,
    ) -> Result<Vec<AttendanceRow>, StoreError> {
        let from = from.format(DAY_FORMAT).to_string();
        let to = to.format(DAY_FORMAT).to_string();

        let mut stmt = self.conn.prepare(
            "SELECT a.identity_id, i.name, a.day, a.first_seen, a.last_seen
             FROM attendance a
             LEFT JOIN identities i ON i.id = a.identity_id
             WHERE a.day BETWEEN ?1 AND ?2
               AND (?3 IS NULL OR a.identity_id = ?3)
             ORDER BY a.day, a.identity_id",
        )?;
        let rows = stmt.query_map(params![from, to, identity], |row| {
            let identity_id: IdentityId = row.get(0)?;
            let name: Option<String> = row.get(1)?;
            Ok((
                identity_id,
                name,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (identity_id, name, day, first_seen, last_seen) = row?;
            let duration_minutes = duration_minutes(&first_seen, &last_seen);
            out.push(AttendanceRow {
                identity_id,
                name: name.unwrap_or_else(|| format!("#{identity_id}")),
                day,
                first_seen,
                last_seen,
                duration_minutes,
            });
        }
        Ok(out)
    }

    /// Convenience wrapper: all rows for one day.
    pub fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRow>, StoreError> {
        self.attendance_report(day, day, None)
    }

    /// Administrative purge: delete every attendance row. The caller must
    /// also discard the live trained model so nothing references the
    /// purged history.
    pub fn purge_attendance(&mut self) -> Result<usize, StoreError> {
        let n = self.conn.execute("DELETE FROM attendance", [])?;
        tracing::warn!(rows = n, "attendance history purged");
        Ok(n)
    }
}

fn duration_minutes(first_seen: &str, last_seen: &str) -> f64 {
    match (
        NaiveDateTime::parse_from_str(first_seen, TS_FORMAT),
        NaiveDateTime::parse_from_str(last_seen, TS_FORMAT),
    ) {
        (Ok(a), Ok(b)) => (b - a).num_seconds() as f64 / 60.0,
        _ => 0.0,
    }
}
