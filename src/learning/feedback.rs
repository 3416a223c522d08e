//! Append-only feedback ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{check_range, MemoryError, Result};
use crate::types::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Positive,
    Negative,
    Correction,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Positive => "positive",
            FeedbackType::Negative => "negative",
            FeedbackType::Correction => "correction",
        }
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeedbackType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(FeedbackType::Positive),
            "negative" => Ok(FeedbackType::Negative),
            "correction" => Ok(FeedbackType::Correction),
            other => Err(MemoryError::validation(format!("unknown feedback type: {}", other))),
        }
    }
}

/// One feedback event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    /// May dangle once the pattern is cleaned up
    pub pattern_id: String,
    pub user_id: String,
    pub feedback_type: FeedbackType,
    pub original_output: String,
    #[serde(default)]
    pub corrected_output: Option<String>,
    pub feedback_score: f64,
    #[serde(with = "crate::types::timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Metadata,
}

/// Caller-supplied feedback, before an id and timestamp are assigned
#[derive(Debug, Clone)]
pub struct Feedback {
    pub pattern_id: String,
    pub user_id: String,
    pub feedback_type: FeedbackType,
    pub feedback_score: f64,
    pub original_output: String,
    pub corrected_output: Option<String>,
    pub context: Metadata,
}

impl Feedback {
    pub fn new(
        pattern_id: impl Into<String>,
        user_id: impl Into<String>,
        feedback_type: FeedbackType,
        feedback_score: f64,
        original_output: impl Into<String>,
    ) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            user_id: user_id.into(),
            feedback_type,
            feedback_score,
            original_output: original_output.into(),
            corrected_output: None,
            context: Metadata::new(),
        }
    }

    pub fn with_correction(mut self, corrected: impl Into<String>) -> Self {
        self.corrected_output = Some(corrected.into());
        self
    }

    pub fn with_context(mut self, context: Metadata) -> Self {
        self.context = context;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_range("feedback_score", self.feedback_score, -1.0, 1.0)?;
        if self.user_id.trim().is_empty() {
            return Err(MemoryError::validation("user_id is required"));
        }
        Ok(())
    }

    pub(crate) fn into_record(self) -> FeedbackRecord {
        FeedbackRecord {
            id: uuid::Uuid::new_v4().to_string(),
            pattern_id: self.pattern_id,
            user_id: self.user_id,
            feedback_type: self.feedback_type,
            original_output: self.original_output,
            corrected_output: self.corrected_output,
            feedback_score: self.feedback_score,
            timestamp: Utc::now(),
            context: self.context,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackLedger {
    records: Vec<FeedbackRecord>,
}

impl FeedbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_records(records: Vec<FeedbackRecord>) -> Self {
        Self { records }
    }

    pub fn append(&mut self, record: FeedbackRecord) {
        self.records.push(record);
    }

    pub fn by_pattern(&self, pattern_id: &str) -> Vec<FeedbackRecord> {
        self.records
            .iter()
            .filter(|r| r.pattern_id == pattern_id)
            .cloned()
            .collect()
    }

    pub fn by_user(&self, user_id: &str) -> Vec<FeedbackRecord> {
        self.records.iter().filter(|r| r.user_id == user_id).cloned().collect()
    }

    pub fn records(&self) -> &[FeedbackRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_type_parse() {
        assert_eq!("Positive".parse::<FeedbackType>().unwrap(), FeedbackType::Positive);
        assert_eq!("correction".parse::<FeedbackType>().unwrap(), FeedbackType::Correction);
        assert!("meh".parse::<FeedbackType>().is_err());
    }

    #[test]
    fn test_validate_score_range() {
        let ok = Feedback::new("p", "u", FeedbackType::Negative, -1.0, "x");
        assert!(ok.validate().is_ok());
        let bad = Feedback::new("p", "u", FeedbackType::Positive, 1.5, "x");
        assert!(bad.validate().is_err());
        let anonymous = Feedback::new("p", " ", FeedbackType::Positive, 0.5, "x");
        assert!(anonymous.validate().is_err());
    }

    #[test]
    fn test_ledger_filters() {
        let mut ledger = FeedbackLedger::new();
        ledger.append(Feedback::new("p1", "alice", FeedbackType::Positive, 1.0, "a").into_record());
        ledger.append(Feedback::new("p2", "alice", FeedbackType::Negative, -0.5, "b").into_record());
        ledger.append(Feedback::new("p1", "bob", FeedbackType::Positive, 0.5, "c").into_record());

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.by_pattern("p1").len(), 2);
        assert_eq!(ledger.by_user("alice").len(), 2);
        assert!(ledger.by_user("carol").is_empty());
    }

    #[test]
    fn test_record_serde() {
        let record = Feedback::new("p1", "alice", FeedbackType::Correction, 0.8, "old")
            .with_correction("new")
            .into_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["feedback_type"], "correction");
        assert_eq!(json["corrected_output"], "new");
        let back: FeedbackRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
