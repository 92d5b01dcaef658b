//! Enrollment and attendance orchestration over an injected store.

use crate::codec::{ExtractError, SignatureExtractor};
use crate::matcher::{Matcher, MeanAbsoluteMatcher, DEFAULT_MATCH_THRESHOLD};
use crate::policy::{AttendancePolicy, AttendanceRecord, DailySummary, PolicyError, DEFAULT_LATE_CUTOFF};
use crate::store::{AttendanceEntry, AttendanceStore, StoreError};
use crate::types::{Signature, Subject};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("no face detected in image: {0}")]
    NotAFace(String),
    #[error("face not recognized")]
    NoMatch,
    #[error("attendance already marked for {subject_id} on {date}")]
    AlreadyMarked { subject_id: String, date: NaiveDate },
    #[error("subject {0} is already enrolled")]
    DuplicateSubject(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("signature extractor failed: {0}")]
    Extractor(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateSubject(id) => EngineError::DuplicateSubject(id),
            StoreError::Conflict { subject_id, date } => EngineError::AlreadyMarked { subject_id, date },
            StoreError::Backend(msg) => EngineError::Storage(msg),
        }
    }
}

impl From<ExtractError> for EngineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NotAFace(reason) => EngineError::NotAFace(reason),
            ExtractError::Backend(msg) => EngineError::Extractor(msg),
        }
    }
}

impl From<PolicyError> for EngineError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::AlreadyMarked { subject_id, date } => EngineError::AlreadyMarked { subject_id, date },
        }
    }
}

/// Source of "now" for check-ins and enrollment timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Confidence a roster entry must strictly exceed.
    pub match_threshold: f32,
    pub late_cutoff: NaiveTime,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            late_cutoff: DEFAULT_LATE_CUTOFF,
        }
    }
}

/// Result of a successful recognition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub subject_id: String,
    pub name: String,
    pub category: String,
    pub confidence: f32,
}

/// Result of a successful check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckIn {
    pub name: String,
    pub category: String,
    #[serde(flatten)]
    pub record: AttendanceRecord,
}

/// Enrollment, recognition and check-in over a store and an extractor.
///
/// Holds no mutable state of its own; share it behind an `Arc` and call it
/// from any number of threads.
pub struct AttendanceEngine<S> {
    store: S,
    extractor: Box<dyn SignatureExtractor>,
    matcher: MeanAbsoluteMatcher,
    policy: AttendancePolicy,
    threshold: f32,
    clock: Box<dyn Clock>,
}

impl<S: AttendanceStore> AttendanceEngine<S> {
    pub fn new(store: S, extractor: Box<dyn SignatureExtractor>, config: EngineConfig) -> Self {
        Self {
            store,
            extractor,
            matcher: MeanAbsoluteMatcher,
            policy: AttendancePolicy::new(config.late_cutoff),
            threshold: config.match_threshold,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn policy(&self) -> &AttendancePolicy {
        &self.policy
    }

    /// Calendar date according to the engine clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    /// Extract a signature from `image` and store a new subject.
    ///
    /// Re-enrolling a known identifier is rejected with `DuplicateSubject`;
    /// the stored signature is never replaced.
    pub fn enroll(
        &self,
        subject_id: &str,
        name: &str,
        category: &str,
        image: &[u8],
    ) -> Result<Subject, EngineError> {
        let subject_id = subject_id.trim();
        let name = name.trim();
        if subject_id.is_empty() {
            return Err(EngineError::InvalidRequest("subject id is required".into()));
        }
        if name.is_empty() {
            return Err(EngineError::InvalidRequest("name is required".into()));
        }

        let signature = self.extractor.extract(image)?;
        let enrolled_at = self.clock.now();
        let subject = Subject {
            id: subject_id.to_string(),
            name: name.to_string(),
            category: category.trim().to_string(),
            signature,
            enrolled_at: enrolled_at.with_nanosecond(0).unwrap_or(enrolled_at),
        };

        self.store.insert_subject(&subject)?;
        tracing::info!(
            subject_id = %subject.id,
            dims = subject.signature.len(),
            extractor = self.extractor.name(),
            "subject enrolled"
        );
        Ok(subject)
    }

    /// Match `image` against the current roster with the configured threshold.
    pub fn recognize(&self, image: &[u8]) -> Result<Recognition, EngineError> {
        self.recognize_with_threshold(image, self.threshold)
    }

    /// Like [`recognize`](Self::recognize) with a per-call threshold in [0, 1].
    pub fn recognize_with_threshold(&self, image: &[u8], threshold: f32) -> Result<Recognition, EngineError> {
        let threshold = checked_threshold(threshold)?;
        let probe = self.extractor.extract(image)?;
        let (subject, confidence) = self.best_match(&probe, threshold)?;
        Ok(Recognition {
            subject_id: subject.id,
            name: subject.name,
            category: subject.category,
            confidence,
        })
    }

    /// Recognize `image` and record today's attendance for the match.
    pub fn check_in(&self, image: &[u8]) -> Result<CheckIn, EngineError> {
        self.check_in_at(image, self.clock.now())
    }

    pub fn check_in_at(&self, image: &[u8], recognized_at: NaiveDateTime) -> Result<CheckIn, EngineError> {
        let threshold = checked_threshold(self.threshold)?;
        let probe = self.extractor.extract(image)?;
        let (subject, confidence) = self.best_match(&probe, threshold)?;

        let date = recognized_at.date();
        let existing = self.store.has_attendance(&subject.id, date)?;
        let record = self.policy.mark(&subject.id, confidence, recognized_at, existing)?;

        // A concurrent check-in may have won since the read above; the
        // store's uniqueness turns that into AlreadyMarked.
        self.store.insert_attendance(&record)?;

        tracing::info!(
            subject_id = %record.subject_id,
            status = %record.status,
            confidence = record.confidence,
            time = %record.time,
            "attendance recorded"
        );

        Ok(CheckIn {
            name: subject.name,
            category: subject.category,
            record,
        })
    }

    pub fn subjects(&self) -> Result<Vec<Subject>, EngineError> {
        Ok(self.store.subjects()?)
    }

    pub fn subject(&self, id: &str) -> Result<Option<Subject>, EngineError> {
        Ok(self.store.subject(id)?)
    }

    pub fn attendance_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>, EngineError> {
        Ok(self.store.attendance_for_date(date)?)
    }

    /// Present/late counts for `date`, with absence inferred from roster size.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, EngineError> {
        let enrolled = self.store.subjects()?.len();
        let entries = self.store.attendance_for_date(date)?;
        Ok(DailySummary::tally(date, enrolled, entries.iter().map(|e| &e.record)))
    }

    fn best_match(&self, probe: &Signature, threshold: f32) -> Result<(Subject, f32), EngineError> {
        let mut roster = self.store.subjects()?;
        match self.matcher.compare(probe, &roster, threshold) {
            Some(m) => {
                tracing::debug!(
                    subject_id = %m.subject_id,
                    confidence = m.confidence,
                    roster = roster.len(),
                    "roster match"
                );
                Ok((roster.swap_remove(m.index), m.confidence))
            }
            None => {
                tracing::debug!(roster = roster.len(), threshold, "no roster entry above threshold");
                Err(EngineError::NoMatch)
            }
        }
    }
}

fn checked_threshold(threshold: f32) -> Result<f32, EngineError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(EngineError::InvalidRequest(format!(
            "match threshold {threshold} is outside [0, 1]"
        )))
    }
}
