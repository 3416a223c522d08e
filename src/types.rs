//! Shared types used across modules
//!
//! This module contains types that are used by both the learning store and
//! the conversation engine to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Subject-domain category for patterns and sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrainRegion {
    /// Short-term memory, immediate tasks
    FrontalLobe,
    /// Long-term memory
    TemporalLobe,
    /// Working memory, current task
    ParietalLobe,
    /// Personal memory and preferences
    OccipitalLobe,
    /// System, tools and learned patterns
    Cerebellum,
}

const MEMORY_WORDS: &[&str] = &["remember", "memory", "recall", "forget"];
const PERSONAL_WORDS: &[&str] = &["my", "i am", "personal", "preference"];
const TASK_WORDS: &[&str] = &["working", "current", "task", "now"];
const TOOL_WORDS: &[&str] = &["tool", "system", "function", "api"];

impl BrainRegion {
    pub const ALL: [BrainRegion; 5] = [
        BrainRegion::FrontalLobe,
        BrainRegion::TemporalLobe,
        BrainRegion::ParietalLobe,
        BrainRegion::OccipitalLobe,
        BrainRegion::Cerebellum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrainRegion::FrontalLobe => "FRONTAL_LOBE",
            BrainRegion::TemporalLobe => "TEMPORAL_LOBE",
            BrainRegion::ParietalLobe => "PARIETAL_LOBE",
            BrainRegion::OccipitalLobe => "OCCIPITAL_LOBE",
            BrainRegion::Cerebellum => "CEREBELLUM",
        }
    }

    /// Human-readable memory tier
    pub fn description(&self) -> &'static str {
        match self {
            BrainRegion::FrontalLobe => "Short-term memory",
            BrainRegion::TemporalLobe => "Long-term memory",
            BrainRegion::ParietalLobe => "Working memory",
            BrainRegion::OccipitalLobe => "Personal memory",
            BrainRegion::Cerebellum => "System and learned patterns",
        }
    }

    /// Classify a message into a region by keyword buckets.
    ///
    /// Buckets are checked in order (memory, personal, task, tool) and the first
    /// hit wins. Keywords match whole words, so "my" does not fire on "mystery".
    pub fn classify(message: &str, default: BrainRegion) -> BrainRegion {
        let normalized = normalize_words(message);
        let hit = |words: &[&str]| words.iter().any(|w| normalized.contains(&format!(" {} ", w)));

        if hit(MEMORY_WORDS) {
            BrainRegion::TemporalLobe
        } else if hit(PERSONAL_WORDS) {
            BrainRegion::OccipitalLobe
        } else if hit(TASK_WORDS) {
            BrainRegion::ParietalLobe
        } else if hit(TOOL_WORDS) {
            BrainRegion::Cerebellum
        } else {
            default
        }
    }
}

impl Default for BrainRegion {
    fn default() -> Self {
        BrainRegion::FrontalLobe
    }
}

impl std::fmt::Display for BrainRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BrainRegion {
    type Err = crate::error::MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase().replace(['-', ' '], "_");
        BrainRegion::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == upper)
            .ok_or_else(|| crate::error::MemoryError::validation(format!("unknown brain region '{}'", s)))
    }
}

/// Lowercase, collapse to single-space separated words, padded on both sides
fn normalize_words(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect();
    format!(" {} ", words.join(" "))
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Agent => "agent",
        }
    }

    /// Parse from a message-type string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "agent" => Some(Role::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Primitive value stored in metadata bags and flow variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            MetaValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{}", b),
            MetaValue::Int(i) => write!(f, "{}", i),
            MetaValue::Float(x) => write!(f, "{}", x),
            MetaValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<usize> for MetaValue {
    fn from(i: usize) -> Self {
        MetaValue::Int(i as i64)
    }
}

impl From<f64> for MetaValue {
    fn from(x: f64) -> Self {
        MetaValue::Float(x)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// Open string-to-primitive extension map
pub type Metadata = BTreeMap<String, MetaValue>;

/// Serde helpers for timestamps.
///
/// Writes RFC 3339. Reads RFC 3339 or a naive ISO-8601 string, which is taken
/// as UTC, so state files written by older tooling still load.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_buckets() {
        let d = BrainRegion::FrontalLobe;
        assert_eq!(BrainRegion::classify("Do you remember my cat?", d), BrainRegion::TemporalLobe);
        assert_eq!(BrainRegion::classify("My favourite colour is blue", d), BrainRegion::OccipitalLobe);
        assert_eq!(BrainRegion::classify("I am tired", d), BrainRegion::OccipitalLobe);
        assert_eq!(BrainRegion::classify("What is the current task?", d), BrainRegion::ParietalLobe);
        assert_eq!(BrainRegion::classify("Call the weather api", d), BrainRegion::Cerebellum);
        assert_eq!(BrainRegion::classify("Hello there", d), BrainRegion::FrontalLobe);
        assert_eq!(BrainRegion::classify("Hello there", BrainRegion::Cerebellum), BrainRegion::Cerebellum);
    }

    #[test]
    fn test_classify_whole_words() {
        let d = BrainRegion::FrontalLobe;
        assert_eq!(BrainRegion::classify("a mystery novel", d), BrainRegion::FrontalLobe);
        assert_eq!(BrainRegion::classify("I know things", d), BrainRegion::FrontalLobe);
    }

    #[test]
    fn test_brain_region_serde_and_parse() {
        let json = serde_json::to_string(&BrainRegion::Cerebellum).unwrap();
        assert_eq!(json, "\"CEREBELLUM\"");
        let parsed: BrainRegion = serde_json::from_str("\"TEMPORAL_LOBE\"").unwrap();
        assert_eq!(parsed, BrainRegion::TemporalLobe);
        assert_eq!("occipital_lobe".parse::<BrainRegion>().unwrap(), BrainRegion::OccipitalLobe);
        assert!("hippocampus".parse::<BrainRegion>().is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("USER"), Some(Role::User));
        assert_eq!(Role::parse("agent"), Some(Role::Agent));
        assert_eq!(Role::parse("robot"), None);
    }

    #[test]
    fn test_meta_value_untagged() {
        let mut meta = Metadata::new();
        meta.insert("source".into(), "user_correction".into());
        meta.insert("step".into(), MetaValue::from(2usize));
        meta.insert("ratio".into(), 0.5.into());
        meta.insert("flag".into(), true.into());

        let json = serde_json::to_string(&meta).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back["step"].as_i64(), Some(2));
        assert_eq!(back["source"].as_str(), Some("user_correction"));
    }

    #[test]
    fn test_timestamp_accepts_naive_iso() {
        let naive = timestamp::parse("2025-03-01T10:15:30.123456").unwrap();
        assert_eq!(naive.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-03-01 10:15:30");
        let rfc = timestamp::parse("2025-03-01T10:15:30+02:00").unwrap();
        assert_eq!(rfc.format("%H").to_string(), "08");
        assert!(timestamp::parse("yesterday").is_err());
    }
}
