//! Learning patterns and the interactions they are learned from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{check_range, Result};
use crate::types::{BrainRegion, MetaValue, Metadata};

pub const DEFAULT_PATTERN_TYPE: &str = "conversation";

/// A stored (context, successful output, score) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPattern {
    pub id: String,
    pub pattern_type: String,
    pub input_context: String,
    pub successful_output: String,
    pub success_score: f64,
    pub brain_region: BrainRegion,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(with = "crate::types::timestamp")]
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    #[serde(with = "crate::types::timestamp")]
    pub last_used: DateTime<Utc>,
    pub effectiveness_score: f64,
}

impl LearningPattern {
    pub(crate) fn from_interaction(interaction: Interaction) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern_type: interaction.pattern_type,
            input_context: interaction.input_context,
            successful_output: interaction.output_result,
            success_score: interaction.success_score,
            brain_region: interaction.brain_region,
            metadata: interaction.metadata,
            created_at: now,
            usage_count: 1,
            last_used: now,
            effectiveness_score: interaction.success_score,
        }
    }

    /// Fold a repeated successful interaction into this pattern
    pub fn reinforce(&mut self, score: f64) {
        self.usage_count += 1;
        self.last_used = Utc::now();
        self.effectiveness_score = (self.effectiveness_score * 0.9 + score * 0.1).clamp(0.0, 1.0);
    }

    /// Blend a feedback score in `[-1, 1]` into the effectiveness estimate
    pub fn apply_feedback(&mut self, feedback_score: f64) {
        let normalized = (feedback_score + 1.0) / 2.0;
        self.effectiveness_score = (self.effectiveness_score * 0.8 + normalized * 0.2).clamp(0.0, 1.0);
    }

    /// Structural checks applied to records read back from disk
    pub(crate) fn validate(&self) -> Result<()> {
        check_range("success_score", self.success_score, 0.0, 1.0)?;
        check_range("effectiveness_score", self.effectiveness_score, 0.0, 1.0)?;
        if self.id.is_empty() {
            return Err(crate::error::MemoryError::validation("pattern id is empty"));
        }
        Ok(())
    }
}

/// Input to `LearningEngine::learn`
#[derive(Debug, Clone)]
pub struct Interaction {
    pub input_context: String,
    pub output_result: String,
    pub success_score: f64,
    pub brain_region: BrainRegion,
    pub pattern_type: String,
    pub metadata: Metadata,
}

impl Interaction {
    pub fn new(
        input_context: impl Into<String>,
        output_result: impl Into<String>,
        success_score: f64,
        brain_region: BrainRegion,
    ) -> Self {
        Self {
            input_context: input_context.into(),
            output_result: output_result.into(),
            success_score,
            brain_region,
            pattern_type: DEFAULT_PATTERN_TYPE.to_string(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_pattern_type(mut self, pattern_type: impl Into<String>) -> Self {
        self.pattern_type = pattern_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A pattern returned from retrieval with its ranking inputs
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPattern {
    pub pattern: LearningPattern,
    /// `0.7 * similarity + 0.3 * effectiveness`
    pub score: f64,
    pub similarity: f64,
}

/// Improvement suggestion derived from a retrieved pattern
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub pattern_id: String,
    pub suggestion_type: String,
    pub suggested_approach: String,
    pub confidence: f64,
    pub usage_count: u64,
    pub brain_region: BrainRegion,
}

impl From<&LearningPattern> for Suggestion {
    fn from(p: &LearningPattern) -> Self {
        Self {
            pattern_id: p.id.clone(),
            suggestion_type: p.pattern_type.clone(),
            suggested_approach: p.successful_output.clone(),
            confidence: p.effectiveness_score,
            usage_count: p.usage_count,
            brain_region: p.brain_region,
        }
    }
}
