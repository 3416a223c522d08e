//! Configuration management
//!
//! Learning thresholds, conversation limits and storage locations, read from
//! `config.toml` in the platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::learning::StorePaths;
use crate::types::BrainRegion;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Learning engine thresholds
    #[serde(default)]
    pub learning: LearningConfig,
    /// Conversation flow engine limits
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// State file locations
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Interactions scoring below this are not learned
    #[serde(default = "default_min_success_score")]
    pub min_success_score: f64,
    /// Context similarity at which a new interaction merges into an existing pattern
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Age in days after which weak patterns become eligible for cleanup
    #[serde(default = "default_pattern_decay_days")]
    pub pattern_decay_days: i64,
    #[serde(default = "default_cleanup_min_effectiveness")]
    pub cleanup_min_effectiveness: f64,
    #[serde(default = "default_cleanup_min_usage")]
    pub cleanup_min_usage: u64,
    /// Cap per pattern type; 0 disables eviction
    #[serde(default = "default_max_patterns_per_type")]
    pub max_patterns_per_type: usize,
    /// TF-IDF vocabulary size
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: usize,
}

fn default_min_success_score() -> f64 {
    0.7
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_pattern_decay_days() -> i64 {
    30
}

fn default_cleanup_min_effectiveness() -> f64 {
    0.5
}

fn default_cleanup_min_usage() -> u64 {
    3
}

fn default_max_patterns_per_type() -> usize {
    1000
}

fn default_max_features() -> usize {
    1000
}

fn default_suggestion_limit() -> usize {
    3
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_success_score: default_min_success_score(),
            similarity_threshold: default_similarity_threshold(),
            pattern_decay_days: default_pattern_decay_days(),
            cleanup_min_effectiveness: default_cleanup_min_effectiveness(),
            cleanup_min_usage: default_cleanup_min_usage(),
            max_patterns_per_type: default_max_patterns_per_type(),
            max_features: default_max_features(),
            suggestion_limit: default_suggestion_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Messages kept per session; older ones are dropped
    #[serde(default = "default_max_conversation_history")]
    pub max_conversation_history: usize,
    /// Advisory only; sessions are never expired in-process
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default)]
    pub default_brain_region: BrainRegion,
    /// A flow must score above this to be selected
    #[serde(default = "default_flow_threshold")]
    pub flow_threshold: f64,
}

fn default_max_conversation_history() -> usize {
    50
}

fn default_session_timeout_secs() -> u64 {
    3600
}

fn default_flow_threshold() -> f64 {
    0.5
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_conversation_history: default_max_conversation_history(),
            session_timeout_secs: default_session_timeout_secs(),
            default_brain_region: BrainRegion::default(),
            flow_threshold: default_flow_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to the platform data directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_patterns_file")]
    pub patterns_file: String,
    #[serde(default = "default_feedback_file")]
    pub feedback_file: String,
    #[serde(default = "default_vectorizer_file")]
    pub vectorizer_file: String,
    #[serde(default = "default_sessions_file")]
    pub sessions_file: String,
}

fn default_patterns_file() -> String {
    "learning_patterns.json".to_string()
}

fn default_feedback_file() -> String {
    "feedback_records.json".to_string()
}

fn default_vectorizer_file() -> String {
    "vectorizer.json".to_string()
}

fn default_sessions_file() -> String {
    "sessions.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            patterns_file: default_patterns_file(),
            feedback_file: default_feedback_file(),
            vectorizer_file: default_vectorizer_file(),
            sessions_file: default_sessions_file(),
        }
    }
}

impl StorageConfig {
    /// Configured data directory, or the platform default
    pub fn resolve_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }

    pub fn store_paths(&self, dir: &Path) -> StorePaths {
        StorePaths {
            patterns: dir.join(&self.patterns_file),
            feedback: dir.join(&self.feedback_file),
            vectorizer: dir.join(&self.vectorizer_file),
        }
    }

    pub fn sessions_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.sessions_file)
    }
}

impl Config {
    /// Load configuration from the default location, writing defaults if missing
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject thresholds outside their meaningful ranges
    pub fn validate(&self) -> Result<()> {
        let l = &self.learning;
        for (name, value) in [
            ("learning.min_success_score", l.min_success_score),
            ("learning.similarity_threshold", l.similarity_threshold),
            ("learning.cleanup_min_effectiveness", l.cleanup_min_effectiveness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if l.pattern_decay_days < 0 {
            anyhow::bail!("learning.pattern_decay_days must not be negative");
        }
        if l.max_features == 0 {
            anyhow::bail!("learning.max_features must be at least 1");
        }
        if self.conversation.max_conversation_history == 0 {
            anyhow::bail!("conversation.max_conversation_history must be at least 1");
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "metatron", "metatron-memory")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "metatron", "metatron-memory")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Print the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    let data_dir = config.storage.resolve_dir()?;

    println!("Learning:");
    println!("  min_success_score:         {}", config.learning.min_success_score);
    println!("  similarity_threshold:      {}", config.learning.similarity_threshold);
    println!("  pattern_decay_days:        {}", config.learning.pattern_decay_days);
    println!("  cleanup_min_effectiveness: {}", config.learning.cleanup_min_effectiveness);
    println!("  cleanup_min_usage:         {}", config.learning.cleanup_min_usage);
    println!("  max_patterns_per_type:     {}", config.learning.max_patterns_per_type);
    println!("  max_features:              {}", config.learning.max_features);
    println!("  suggestion_limit:          {}", config.learning.suggestion_limit);
    println!("\nConversation:");
    println!("  max_conversation_history:  {}", config.conversation.max_conversation_history);
    println!("  session_timeout_secs:      {}", config.conversation.session_timeout_secs);
    println!("  default_brain_region:      {}", config.conversation.default_brain_region);
    println!("  flow_threshold:            {}", config.conversation.flow_threshold);
    println!("\nStorage:");
    println!("  data_dir:                  {}", data_dir.display());
    println!("  patterns:                  {}", config.storage.patterns_file);
    println!("  feedback:                  {}", config.storage.feedback_file);
    println!("  vectorizer:                {}", config.storage.vectorizer_file);
    println!("  sessions:                  {}", config.storage.sessions_file);

    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.learning.min_success_score, 0.7);
        assert_eq!(config.learning.similarity_threshold, 0.8);
        assert_eq!(config.learning.pattern_decay_days, 30);
        assert_eq!(config.conversation.max_conversation_history, 50);
        assert_eq!(config.conversation.default_brain_region, BrainRegion::FrontalLobe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [learning]
            min_success_score = 0.6

            [conversation]
            default_brain_region = "CEREBELLUM"
            "#,
        )
        .unwrap();
        assert_eq!(config.learning.min_success_score, 0.6);
        assert_eq!(config.learning.max_features, 1000);
        assert_eq!(config.conversation.default_brain_region, BrainRegion::Cerebellum);
        assert_eq!(config.storage.sessions_file, "sessions.json");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.learning.suggestion_limit = 7;
        config.storage.data_dir = Some(dir.path().to_path_buf());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.learning.suggestion_limit, 7);
        assert_eq!(loaded.storage.resolve_dir().unwrap(), dir.path());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[learning]\nmin_success_score = 1.5\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let parsed: Config = toml::from_str(&default_config_toml()).unwrap();
        assert_eq!(parsed.learning.max_patterns_per_type, 1000);
    }
}
