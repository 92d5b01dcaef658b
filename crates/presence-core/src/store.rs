//! Storage contract for subjects and attendance records.

use crate::policy::AttendanceRecord;
use crate::types::Subject;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("subject {0} is already enrolled")]
    DuplicateSubject(String),
    #[error("attendance for {subject_id} on {date} already exists")]
    Conflict { subject_id: String, date: NaiveDate },
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Attendance record joined with the subject it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub name: String,
    pub category: String,
}

/// Persistent home of the roster and the attendance log.
///
/// Implementations must be safe to share between request handlers, and
/// `insert_attendance` must reject a second record for the same
/// (subject, date) with [`StoreError::Conflict`] even when two callers race.
pub trait AttendanceStore: Send + Sync {
    /// All enrolled subjects in insertion order.
    fn subjects(&self) -> Result<Vec<Subject>, StoreError>;

    fn subject(&self, id: &str) -> Result<Option<Subject>, StoreError>;

    fn insert_subject(&self, subject: &Subject) -> Result<(), StoreError>;

    fn has_attendance(&self, subject_id: &str, date: NaiveDate) -> Result<bool, StoreError>;

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// Records for `date`, latest check-in first.
    fn attendance_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    subjects: Vec<Subject>,
    records: Vec<AttendanceRecord>,
}

/// In-process store. Every operation runs under one lock, which also makes
/// the attendance uniqueness check and insert atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl AttendanceStore for MemoryStore {
    fn subjects(&self) -> Result<Vec<Subject>, StoreError> {
        Ok(self.state()?.subjects.clone())
    }

    fn subject(&self, id: &str) -> Result<Option<Subject>, StoreError> {
        Ok(self.state()?.subjects.iter().find(|s| s.id == id).cloned())
    }

    fn insert_subject(&self, subject: &Subject) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.subjects.iter().any(|s| s.id == subject.id) {
            return Err(StoreError::DuplicateSubject(subject.id.clone()));
        }
        state.subjects.push(subject.clone());
        Ok(())
    }

    fn has_attendance(&self, subject_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self
            .state()?
            .records
            .iter()
            .any(|r| r.subject_id == subject_id && r.date == date))
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state
            .records
            .iter()
            .any(|r| r.subject_id == record.subject_id && r.date == record.date)
        {
            return Err(StoreError::Conflict {
                subject_id: record.subject_id.clone(),
                date: record.date,
            });
        }
        state.records.push(record.clone());
        Ok(())
    }

    fn attendance_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError> {
        let state = self.state()?;
        let mut entries: Vec<AttendanceEntry> = state
            .records
            .iter()
            .filter(|r| r.date == date)
            .filter_map(|r| {
                let subject = state.subjects.iter().find(|s| s.id == r.subject_id)?;
                Some(AttendanceEntry {
                    record: r.clone(),
                    name: subject.name.clone(),
                    category: subject.category.clone(),
                })
            })
            .collect();
        // Newest insert first among equal times; sort_by is stable.
        entries.reverse();
        entries.sort_by(|a, b| b.record.time.cmp(&a.record.time));
        Ok(entries)
    }
}
