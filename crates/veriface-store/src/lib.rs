//! veriface-store — Persistent enrollment and attendance storage.
//!
//! SQLite-backed source of truth for who is known. Two tables:
//! `identities` (one reference embedding plus profile fields per person)
//! and `attendance` (one presence window per identity per calendar day).
//!
//! Identifiers are minted `max + 1` inside the enrollment transaction;
//! callers that share a store across threads must serialize mutations
//! behind a single writer (the daemon wraps the store in a mutex).

pub mod attendance;

pub use attendance::{AttendanceRow, AttendanceTracker, RecordOutcome, DEFAULT_COOLDOWN};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use veriface_core::{Embedding, EmbeddingError, EnrolledFace, IdentityId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("duplicate identity: {0}")]
    Duplicate(String),
    #[error("identity {0} not found")]
    NotFound(IdentityId),
    #[error("identity {0} is not enrolled")]
    UnknownIdentity(IdentityId),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Optional contact metadata. Validated for format, never used by the
/// matching logic itself.
#[derive(Debug, Clone, Default)]
pub struct Contact {
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// One enrolled person: the canonical id, display name, reference
/// embedding, and contact metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    #[serde(skip)]
    pub embedding: Embedding,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn enrolled_face(&self) -> EnrolledFace {
        EnrolledFace {
            id: self.id,
            name: self.name.clone(),
            embedding: self.embedding.clone(),
        }
    }
}

pub struct Store {
    pub(crate) conn: Connection,
    dim: usize,
}

impl Store {
    /// Open (or create) the database at `path`. `dim` fixes the embedding
    /// dimensionality for every identity in this store.
    pub fn open(path: &Path, dim: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Validation(format!("cannot create data dir: {e}")))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, dim)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(dim: usize) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, dim)
    }

    fn with_connection(conn: Connection, dim: usize) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                 id        INTEGER PRIMARY KEY,
                 name      TEXT NOT NULL UNIQUE,
                 embedding BLOB NOT NULL,
                 phone     TEXT,
                 email     TEXT
             );
             -- No foreign key to identities: attendance rows outlive
             -- enrollment (retained for audit after a removal).
             CREATE TABLE IF NOT EXISTS attendance (
                 identity_id INTEGER NOT NULL,
                 day         TEXT NOT NULL,
                 first_seen  TEXT NOT NULL,
                 last_seen   TEXT NOT NULL,
                 PRIMARY KEY (identity_id, day)
             );",
        )?;
        Ok(Self { conn, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn check_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.dim() != self.dim {
            return Err(StoreError::Dimension {
                expected: self.dim,
                got: embedding.dim(),
            });
        }
        if embedding.is_zero() {
            return Err(StoreError::Validation(
                "embedding is all zeros — no usable face signal".into(),
            ));
        }
        Ok(())
    }

    /// Enroll a new identity.
    ///
    /// Rejects on name or email collision — this store never silently
    /// deletes-and-reinserts, since that loses ids and audit history.
    /// The new id is `max + 1`, computed inside the same transaction as
    /// the insert.
    pub fn enroll(
        &mut self,
        name: &str,
        embedding: Embedding,
        contact: Contact,
    ) -> Result<Identity, StoreError> {
        validate_name(name)?;
        validate_contact(&contact)?;
        self.check_embedding(&embedding)?;

        let tx = self.conn.transaction()?;

        let collision: Option<(IdentityId, String)> = tx
            .query_row(
                "SELECT id, name FROM identities
                 WHERE name = ?1 OR (email IS NOT NULL AND email = ?2)",
                params![name, contact.email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((id, existing)) = collision {
            return Err(StoreError::Duplicate(format!(
                "'{existing}' (id {id}) already enrolled with this name or email"
            )));
        }

        let id: IdentityId =
            tx.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM identities", [], |row| {
                row.get(0)
            })?;
        tx.execute(
            "INSERT INTO identities (id, name, embedding, phone, email)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, embedding.to_blob(), contact.phone, contact.email],
        )?;
        tx.commit()?;

        tracing::info!(id, name, "identity enrolled");
        Ok(Identity {
            id,
            name: name.to_string(),
            embedding,
            phone: contact.phone,
            email: contact.email,
        })
    }

    /// Re-enrollment / profile update: replaces only the provided fields.
    /// An embedding replacement is atomic — the old embedding is never
    /// matched once the call returns.
    pub fn update(
        &mut self,
        id: IdentityId,
        embedding: Option<Embedding>,
        contact: Option<Contact>,
    ) -> Result<Identity, StoreError> {
        if let Some(ref e) = embedding {
            self.check_embedding(e)?;
        }
        if let Some(ref c) = contact {
            validate_contact(c)?;
        }

        let tx = self.conn.transaction()?;
        if let Some(ref e) = embedding {
            let n = tx.execute(
                "UPDATE identities SET embedding = ?1 WHERE id = ?2",
                params![e.to_blob(), id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(id));
            }
        }
        if let Some(ref c) = contact {
            let n = tx.execute(
                "UPDATE identities SET phone = ?1, email = ?2 WHERE id = ?3",
                params![c.phone, c.email, id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(id));
            }
        }
        tx.commit()?;

        tracing::info!(
            id,
            embedding = embedding.is_some(),
            contact = contact.is_some(),
            "identity updated"
        );
        self.get(id)
    }

    /// Remove an identity. Attendance history is retained for audit; see
    /// DESIGN.md for the policy decision. Callers must retrain afterwards.
    pub fn remove(&mut self, id: IdentityId) -> Result<(), StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound(id));
        }
        tracing::info!(id, "identity removed");
        Ok(())
    }

    pub fn get(&self, id: IdentityId) -> Result<Identity, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, embedding, phone, email FROM identities WHERE id = ?1",
                params![id],
                row_to_identity,
            )
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    /// All identities, ordered by id — a stable ordering keeps training
    /// snapshots reproducible.
    pub fn get_all(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, embedding, phone, email FROM identities ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_identity)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn ids(&self) -> Result<BTreeSet<IdentityId>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM identities")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    /// Training snapshot: (id, name, embedding) per identity, ascending id.
    pub fn snapshot(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        Ok(self.get_all()?.iter().map(Identity::enrolled_face).collect())
    }

    /// Duplicate-enrollment probe: match on display name or email.
    pub fn find_by_name_or_contact(
        &self,
        name: &str,
        email: Option<&str>,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, embedding, phone, email FROM identities
                 WHERE name = ?1 OR (email IS NOT NULL AND email = ?2)",
                params![name, email],
                row_to_identity,
            )
            .optional()?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    let blob: Vec<u8> = row.get(2)?;
    let embedding = Embedding::from_blob(&blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(e))
    })?;
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        embedding,
        phone: row.get(3)?,
        email: row.get(4)?,
    })
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("name must not be empty".into()));
    }
    Ok(())
}

fn validate_contact(contact: &Contact) -> Result<(), StoreError> {
    if let Some(email) = contact.email.as_deref() {
        validate_email(email)?;
    }
    if let Some(phone) = contact.phone.as_deref() {
        validate_phone(phone)?;
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), StoreError> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next();
    match domain {
        Some(d) if !local.is_empty() && d.contains('.') && !d.starts_with('.') && !d.ends_with('.') => {
            Ok(())
        }
        _ => Err(StoreError::Validation(format!("invalid email '{email}'"))),
    }
}

fn validate_phone(phone: &str) -> Result<(), StoreError> {
    let digits = phone
        .chars()
        .filter(|c| c.is_ascii_digit())
        .count();
    let valid_chars = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    if digits >= 7 && valid_chars {
        Ok(())
    } else {
        Err(StoreError::Validation(format!("invalid phone '{phone}'")))
    }
}
