//! SQLite-backed roster and attendance log.
//!
//! The `UNIQUE (subject_id, date)` constraint is what keeps concurrent
//! check-ins for one subject from producing two records; a violation is
//! reported as `StoreError::Conflict`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use presence_core::codec::{decode_signature, encode_signature};
use presence_core::{AttendanceEntry, AttendanceRecord, AttendanceStatus, AttendanceStore, StoreError, Subject};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS subjects (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id  TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    category    TEXT NOT NULL,
    signature   TEXT NOT NULL,
    enrolled_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id) ON DELETE CASCADE,
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('Present', 'Late')),
    confidence  REAL NOT NULL,
    UNIQUE (subject_id, date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, bootstrapping the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(backend)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(backend)?;
        conn.pragma_update(None, "foreign_keys", 1).map_err(backend)?;
        conn.execute_batch(SCHEMA_SQL).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database lock poisoned".into()))
    }
}

impl AttendanceStore for SqliteStore {
    fn subjects(&self) -> Result<Vec<Subject>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT subject_id, name, category, signature, enrolled_at
                 FROM subjects ORDER BY seq",
            )
            .map_err(backend)?;
        let rows = stmt.query_map([], decode_subject_row).map_err(backend)?;

        let mut roster = Vec::new();
        for row in rows {
            match row {
                Ok(subject) => roster.push(subject),
                // One corrupt signature must not take the whole roster down.
                Err(rusqlite::Error::FromSqlConversionFailure(SIGNATURE_COLUMN, _, err)) => {
                    tracing::warn!(error = %err, "skipping subject with undecodable signature");
                }
                Err(e) => return Err(backend(e)),
            }
        }
        Ok(roster)
    }

    fn subject(&self, id: &str) -> Result<Option<Subject>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT subject_id, name, category, signature, enrolled_at
                 FROM subjects WHERE subject_id = ?1",
                params![id],
                decode_subject_row,
            )
            .optional()
            .map_err(backend)
    }

    fn insert_subject(&self, subject: &Subject) -> Result<(), StoreError> {
        self.conn()?
            .execute(
                "INSERT INTO subjects (subject_id, name, category, signature, enrolled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    subject.id,
                    subject.name,
                    subject.category,
                    encode_signature(&subject.signature),
                    subject.enrolled_at,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateSubject(subject.id.clone())
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    fn has_attendance(&self, subject_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        self.conn()?
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM attendance WHERE subject_id = ?1 AND date = ?2)",
                params![subject_id, date],
                |row| row.get(0),
            )
            .map_err(backend)
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn()?
            .execute(
                "INSERT INTO attendance (subject_id, date, time, status, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.subject_id,
                    record.date,
                    record.time,
                    record.status.as_str(),
                    f64::from(record.confidence),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict {
                        subject_id: record.subject_id.clone(),
                        date: record.date,
                    }
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    fn attendance_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT a.subject_id, a.date, a.time, a.status, a.confidence, s.name, s.category
                 FROM attendance a
                 JOIN subjects s ON s.subject_id = a.subject_id
                 WHERE a.date = ?1
                 ORDER BY a.time DESC, a.id DESC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![date], decode_entry_row)
            .map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }
}

const SIGNATURE_COLUMN: usize = 3;

fn decode_subject_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    let text: String = row.get(SIGNATURE_COLUMN)?;
    let signature = decode_signature(&text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(SIGNATURE_COLUMN, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Subject {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        signature,
        enrolled_at: row.get::<_, NaiveDateTime>(4)?,
    })
}

fn decode_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceEntry> {
    let status_text: String = row.get(3)?;
    let status = status_text.parse::<AttendanceStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, err.into())
    })?;
    Ok(AttendanceEntry {
        record: AttendanceRecord {
            subject_id: row.get(0)?,
            date: row.get::<_, NaiveDate>(1)?,
            time: row.get::<_, NaiveTime>(2)?,
            status,
            confidence: row.get::<_, f64>(4)? as f32,
        },
        name: row.get(5)?,
        category: row.get(6)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
