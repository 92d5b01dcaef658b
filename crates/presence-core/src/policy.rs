//! Once-per-day attendance policy and on-time/late classification.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Check-ins at or before this time of day are on time.
pub const DEFAULT_LATE_CUTOFF: NaiveTime = match NaiveTime::from_hms_opt(9, 30, 0) {
    Some(t) => t,
    None => panic!("invalid default cutoff"),
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("attendance already marked for {subject_id} on {date}")]
    AlreadyMarked { subject_id: String, date: NaiveDate },
}

/// Derived status of a check-in. Absence is never recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Late => "Late",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(AttendanceStatus::Present),
            "Late" => Ok(AttendanceStatus::Late),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One check-in for one subject on one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub subject_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
    /// Recognition confidence, kept for audit.
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    cutoff: NaiveTime,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LATE_CUTOFF)
    }
}

impl AttendancePolicy {
    pub fn new(cutoff: NaiveTime) -> Self {
        Self {
            cutoff: whole_seconds(cutoff),
        }
    }

    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }

    /// `Present` up to and including the cutoff, `Late` after it.
    pub fn classify(&self, time: NaiveTime) -> AttendanceStatus {
        if whole_seconds(time) <= self.cutoff {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Late
        }
    }

    /// Decide the record for a recognized subject.
    ///
    /// `existing_record_today` must be read from storage immediately before
    /// this call; the insert that follows still has to be guarded by the
    /// store's (subject, date) uniqueness.
    pub fn mark(
        &self,
        subject_id: &str,
        confidence: f32,
        recognized_at: NaiveDateTime,
        existing_record_today: bool,
    ) -> Result<AttendanceRecord, PolicyError> {
        let date = recognized_at.date();
        if existing_record_today {
            return Err(PolicyError::AlreadyMarked {
                subject_id: subject_id.to_string(),
                date,
            });
        }

        let time = whole_seconds(recognized_at.time());
        Ok(AttendanceRecord {
            subject_id: subject_id.to_string(),
            date,
            time,
            status: self.classify(time),
            confidence,
        })
    }
}

/// Head count for one date; absence is inferred, not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub enrolled: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
}

impl DailySummary {
    pub fn tally<'a>(
        date: NaiveDate,
        enrolled: usize,
        records: impl IntoIterator<Item = &'a AttendanceRecord>,
    ) -> Self {
        let (mut present, mut late) = (0, 0);
        for record in records {
            match record.status {
                AttendanceStatus::Present => present += 1,
                AttendanceStatus::Late => late += 1,
            }
        }
        Self {
            date,
            enrolled,
            present,
            late,
            absent: enrolled.saturating_sub(present + late),
        }
    }
}

fn whole_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_cutoff_boundary() {
        let policy = AttendancePolicy::default();
        let on_time = policy.mark("E1", 0.9, at(9, 30, 0), false).unwrap();
        let late = policy.mark("E1", 0.9, at(9, 30, 1), false).unwrap();
        assert_eq!(on_time.status, AttendanceStatus::Present);
        assert_eq!(late.status, AttendanceStatus::Late);
    }

    #[test]
    fn test_subsecond_precision_is_dropped() {
        let policy = AttendancePolicy::default();
        let t = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_milli_opt(9, 30, 0, 400)
            .unwrap();
        let record = policy.mark("E1", 0.9, t, false).unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn test_early_and_late_day() {
        let policy = AttendancePolicy::default();
        assert_eq!(policy.classify(NaiveTime::from_hms_opt(0, 0, 0).unwrap()), AttendanceStatus::Present);
        assert_eq!(
            policy.classify(NaiveTime::from_hms_opt(23, 59, 59).unwrap()),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn test_custom_cutoff() {
        let policy = AttendancePolicy::new(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(policy.mark("E1", 0.7, at(8, 15, 0), false).unwrap().status, AttendanceStatus::Late);
    }

    #[test]
    fn test_already_marked() {
        let policy = AttendancePolicy::default();
        let err = policy.mark("E1", 0.9, at(8, 0, 0), true).unwrap_err();
        assert_eq!(
            err,
            PolicyError::AlreadyMarked {
                subject_id: "E1".into(),
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            }
        );
    }

    #[test]
    fn test_record_carries_confidence_and_date() {
        let record = AttendancePolicy::default().mark("E7", 0.8125, at(7, 45, 10), false).unwrap();
        assert_eq!(record.subject_id, "E7");
        assert_eq!(record.confidence, 0.8125);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(record.time, NaiveTime::from_hms_opt(7, 45, 10).unwrap());
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in [AttendanceStatus::Present, AttendanceStatus::Late] {
            assert_eq!(status.as_str().parse::<AttendanceStatus>().unwrap(), status);
        }
        assert!("Absent".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_daily_summary_infers_absence() {
        let policy = AttendancePolicy::default();
        let records = vec![
            policy.mark("E1", 0.9, at(9, 0, 0), false).unwrap(),
            policy.mark("E2", 0.9, at(9, 45, 0), false).unwrap(),
        ];
        let summary = DailySummary::tally(records[0].date, 5, &records);
        assert_eq!(summary.present, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.absent, 3);
    }
}
