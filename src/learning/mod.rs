//! Pattern learning system
//!
//! Learns (context, output, score) patterns from successful interactions,
//! retrieves them by TF-IDF similarity, and refines them from user feedback.

pub mod engine;
pub mod feedback;
pub mod pattern;
pub mod store;

pub use engine::{LearningEngine, LearningHealth, LearningStats, PatternUsage};
pub use feedback::{Feedback, FeedbackLedger, FeedbackRecord, FeedbackType};
pub use pattern::{Interaction, LearningPattern, RetrievedPattern, Suggestion, DEFAULT_PATTERN_TYPE};
pub use store::{PatternStore, StorePaths};
