//! presence-core — Face-signature matching and attendance decisions.
//!
//! Turns captured images into fixed-length signatures through a pluggable
//! extractor, matches them against the enrolled roster, and applies the
//! once-per-day attendance policy on top of an injected store.

pub mod codec;
pub mod engine;
pub mod matcher;
pub mod policy;
pub mod store;
pub mod types;

pub use codec::{CommandExtractor, ExtractError, HashExtractor, SignatureExtractor};
pub use engine::{AttendanceEngine, CheckIn, Clock, EngineConfig, EngineError, Recognition, SystemClock};
pub use matcher::{MatchResult, Matcher, MeanAbsoluteMatcher, DEFAULT_MATCH_THRESHOLD};
pub use policy::{
    AttendancePolicy, AttendanceRecord, AttendanceStatus, DailySummary, PolicyError, DEFAULT_LATE_CUTOFF,
};
pub use store::{AttendanceEntry, AttendanceStore, MemoryStore, StoreError};
pub use types::{Signature, SignatureError, Subject, SubjectInfo};
