use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("signature has no values")]
    Empty,
    #[error("signature value {value} at index {index} is outside [0, 1]")]
    OutOfRange { index: usize, value: f32 },
}

/// Face signature: a fixed-length vector of values in [0, 1].
///
/// Construction validates the range, so every `Signature` in the system is
/// comparable by [`similarity`](Self::similarity) without further checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.is_empty() {
            return Err(SignatureError::Empty);
        }
        // `contains` is false for NaN, so non-finite values are rejected too.
        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(SignatureError::OutOfRange { index, value });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Confidence that two signatures come from the same face.
    ///
    /// `1 - mean(|a_i - b_i|)`, floored at zero. Signatures of different
    /// length are not comparable and score 0.
    pub fn similarity(&self, other: &Signature) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let total: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        let distance = total / self.values.len() as f32;

        (1.0 - distance).max(0.0)
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Signature::new(values)
    }
}

impl From<Signature> for Vec<f32> {
    fn from(signature: Signature) -> Self {
        signature.values
    }
}

/// An enrolled identity with its single reference signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub id: String,
    pub name: String,
    /// Grouping such as a department.
    pub category: String,
    pub signature: Signature,
    pub enrolled_at: NaiveDateTime,
}

impl Subject {
    pub fn info(&self) -> SubjectInfo {
        SubjectInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            enrolled_at: self.enrolled_at,
        }
    }
}

/// Public view of a subject, without the signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub enrolled_at: NaiveDateTime,
}
