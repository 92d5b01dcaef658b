use crate::types::{Signature, Subject};
use serde::Serialize;

/// Confidence a candidate must strictly exceed to be recognized.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Best roster candidate for a probe signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub subject_id: String,
    pub confidence: f32,
    /// Position of the winner in the roster slice that was scanned.
    #[serde(skip)]
    pub index: usize,
}

/// Strategy for comparing a probe signature against the enrolled roster.
pub trait Matcher {
    fn compare(&self, probe: &Signature, roster: &[Subject], threshold: f32) -> Option<MatchResult>;
}

/// Linear-scan matcher over [`Signature::similarity`].
///
/// A candidate replaces the current best only when its score is strictly
/// greater than both the best so far and the threshold, so ties keep the
/// earliest roster entry and a score equal to the threshold never matches.
/// Entries whose signature length differs from the probe are never
/// candidates, whatever the threshold.
pub struct MeanAbsoluteMatcher;

impl Matcher for MeanAbsoluteMatcher {
    fn compare(&self, probe: &Signature, roster: &[Subject], threshold: f32) -> Option<MatchResult> {
        let mut best: Option<(usize, f32)> = None;

        for (i, subject) in roster.iter().enumerate() {
            if subject.signature.len() != probe.len() {
                continue;
            }
            let score = probe.similarity(&subject.signature);
            if threshold.is_nan() || score <= threshold {
                continue;
            }
            let is_better = match best {
                None => true,
                Some((_, best_score)) => score > best_score,
            };
            if is_better {
                best = Some((i, score));
            }
        }

        best.map(|(index, confidence)| MatchResult {
            subject_id: roster[index].id.clone(),
            confidence,
            index,
        })
    }
}
