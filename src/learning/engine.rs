//! Learning engine
//!
//! Orchestrates the pattern store: the significance gate, near-duplicate
//! merging, feedback with corrective re-learning, cleanup and statistics.
//! All state sits behind one lock so every read-modify-write is atomic.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::feedback::{Feedback, FeedbackRecord};
use super::pattern::{Interaction, LearningPattern, RetrievedPattern, Suggestion};
use super::store::{PatternStore, StorePaths};
use crate::config::LearningConfig;
use crate::error::{check_range, MemoryError, Result};
use crate::types::{BrainRegion, MetaValue};

/// Aggregate counts over the store
#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub total_patterns: usize,
    pub total_feedback: usize,
    pub patterns_by_type: BTreeMap<String, usize>,
    pub patterns_by_region: BTreeMap<String, usize>,
    pub average_effectiveness: f64,
    pub most_used_patterns: Vec<PatternUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternUsage {
    pub id: String,
    #[serde(rename = "type")]
    pub pattern_type: String,
    pub usage_count: u64,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningHealth {
    pub status: &'static str,
    pub total_patterns: usize,
    pub total_feedback: usize,
    pub vectorizer_fitted: bool,
    pub vocabulary_size: usize,
    pub persistent: bool,
}

pub struct LearningEngine {
    config: LearningConfig,
    store: RwLock<PatternStore>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig, store: PatternStore) -> Self {
        Self {
            config,
            store: RwLock::new(store),
        }
    }

    /// Engine without persistence
    pub fn in_memory(config: LearningConfig) -> Self {
        let store = PatternStore::in_memory(config.max_features);
        Self::new(config, store)
    }

    /// Engine backed by the state files at `paths`
    pub fn open(config: LearningConfig, paths: StorePaths) -> Self {
        let store = PatternStore::open(paths, config.max_features);
        Self::new(config, store)
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Learn from an interaction.
    ///
    /// Returns `Ok(None)` when the interaction is below the significance gate,
    /// otherwise the id of the new or merged pattern. A failed save is reported
    /// as an error; the in-memory change is kept.
    pub async fn learn(&self, interaction: Interaction) -> Result<Option<String>> {
        check_range("success_score", interaction.success_score, 0.0, 1.0)?;
        if interaction.input_context.trim().is_empty() {
            return Err(MemoryError::validation("input_context is required"));
        }
        if interaction.pattern_type.trim().is_empty() {
            return Err(MemoryError::validation("pattern_type is required"));
        }

        if interaction.success_score < self.config.min_success_score {
            debug!(
                "Skipping learning - success score {} below threshold {}",
                interaction.success_score, self.config.min_success_score
            );
            return Ok(None);
        }

        let mut store = self.store.write().await;
        let id = self.upsert(&mut store, interaction, None);
        store.save_patterns()?;
        Ok(Some(id))
    }

    /// Merge into a near-duplicate or insert. `exclude` keeps a correction from
    /// folding back into the pattern it corrects.
    fn upsert(&self, store: &mut PatternStore, interaction: Interaction, exclude: Option<&str>) -> String {
        let similar = store
            .find_similar(
                &interaction.input_context,
                &interaction.pattern_type,
                interaction.brain_region,
                self.config.similarity_threshold,
                exclude,
            );

        if let Some(id) = similar {
            if let Some(pattern) = store.get_mut(&id) {
                pattern.reinforce(interaction.success_score);
                info!(
                    "Updated existing pattern: {} (usage {}, effectiveness {:.3})",
                    id, pattern.usage_count, pattern.effectiveness_score
                );
                return id;
            }
        }

        let pattern = LearningPattern::from_interaction(interaction);
        let id = pattern.id.clone();
        info!(
            "Learned new pattern: {} ({} / {})",
            id, pattern.pattern_type, pattern.brain_region
        );
        store.insert(pattern, self.config.max_patterns_per_type);
        store.rebuild_index();
        id
    }

    /// Rank stored patterns against a query. Does not count as usage.
    pub async fn retrieve_patterns(
        &self,
        query_context: &str,
        pattern_type: Option<&str>,
        brain_region: Option<BrainRegion>,
        limit: usize,
    ) -> Vec<RetrievedPattern> {
        let store = self.store.read().await;
        let results = store.rank(query_context, pattern_type, brain_region, limit);
        debug!("Retrieved {} patterns for '{}'", results.len(), query_context);
        results
    }

    /// Record feedback on a pattern and update its effectiveness.
    ///
    /// A correction with a positive score is learned as a new pattern for the
    /// same context, tagged with `source = user_correction`.
    pub async fn record_feedback(&self, feedback: Feedback) -> Result<String> {
        feedback.validate()?;

        let mut store = self.store.write().await;
        let (context, pattern_type, brain_region) = {
            let pattern = store
                .get_mut(&feedback.pattern_id)
                .ok_or_else(|| MemoryError::not_found("pattern", feedback.pattern_id.clone()))?;
            pattern.apply_feedback(feedback.feedback_score);
            (
                pattern.input_context.clone(),
                pattern.pattern_type.clone(),
                pattern.brain_region,
            )
        };

        let pattern_id = feedback.pattern_id.clone();
        let score = feedback.feedback_score;
        let correction = feedback.corrected_output.clone().filter(|c| !c.trim().is_empty());

        let record = feedback.into_record();
        let feedback_id = record.id.clone();
        store.ledger_mut().append(record);

        if let Some(corrected) = correction {
            if score > 0.0 {
                let interaction = Interaction::new(context, corrected, (score + 0.5).min(1.0), brain_region)
                    .with_pattern_type(pattern_type)
                    .with_meta("source", "user_correction")
                    .with_meta("original_pattern", MetaValue::from(pattern_id.as_str()));
                let new_id = self.upsert(&mut store, interaction, Some(&pattern_id));
                info!("Learned correction {} for pattern {}", new_id, pattern_id);
            }
        }

        store.save()?;
        info!("Recorded feedback: {} for pattern {}", feedback_id, pattern_id);
        Ok(feedback_id)
    }

    /// Up to `suggestion_limit` suggestions for a context within a region
    pub async fn suggestions(&self, context: &str, brain_region: BrainRegion) -> Vec<Suggestion> {
        self.retrieve_patterns(context, None, Some(brain_region), self.config.suggestion_limit)
            .await
            .iter()
            .map(|r| Suggestion::from(&r.pattern))
            .collect()
    }

    /// Remove old, ineffective, rarely used patterns. Returns how many were removed.
    pub async fn cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.pattern_decay_days);
        let mut store = self.store.write().await;
        let removed = store.remove_stale(
            cutoff,
            self.config.cleanup_min_effectiveness,
            self.config.cleanup_min_usage,
        );
        if !removed.is_empty() {
            store.save_patterns()?;
        }
        info!("Cleanup complete: removed {} patterns", removed.len());
        Ok(removed.len())
    }

    pub async fn stats(&self) -> LearningStats {
        let store = self.store.read().await;

        let mut patterns_by_type = BTreeMap::new();
        let mut patterns_by_region = BTreeMap::new();
        let mut effectiveness_sum = 0.0;
        for p in store.patterns() {
            *patterns_by_type.entry(p.pattern_type.clone()).or_insert(0) += 1;
            *patterns_by_region.entry(p.brain_region.as_str().to_string()).or_insert(0) += 1;
            effectiveness_sum += p.effectiveness_score;
        }

        let mut by_usage: Vec<&LearningPattern> = store.patterns().collect();
        by_usage.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then_with(|| a.id.cmp(&b.id)));
        let most_used_patterns = by_usage
            .into_iter()
            .take(5)
            .map(|p| PatternUsage {
                id: p.id.clone(),
                pattern_type: p.pattern_type.clone(),
                usage_count: p.usage_count,
                effectiveness: p.effectiveness_score,
            })
            .collect();

        LearningStats {
            total_patterns: store.len(),
            total_feedback: store.ledger().len(),
            patterns_by_type,
            patterns_by_region,
            average_effectiveness: if store.is_empty() {
                0.0
            } else {
                effectiveness_sum / store.len() as f64
            },
            most_used_patterns,
        }
    }

    pub async fn health(&self) -> LearningHealth {
        let store = self.store.read().await;
        LearningHealth {
            status: "healthy",
            total_patterns: store.len(),
            total_feedback: store.ledger().len(),
            vectorizer_fitted: store.index().is_fitted(),
            vocabulary_size: store.index().vocabulary_len(),
            persistent: store.is_persistent(),
        }
    }

    pub async fn get_pattern(&self, id: &str) -> Result<LearningPattern> {
        self.store
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::not_found("pattern", id))
    }

    /// Patterns filtered by type and region, most used first
    pub async fn list_patterns(
        &self,
        pattern_type: Option<&str>,
        brain_region: Option<BrainRegion>,
        limit: usize,
    ) -> Vec<LearningPattern> {
        let store = self.store.read().await;
        let mut patterns: Vec<LearningPattern> = store
            .patterns()
            .filter(|p| pattern_type.map_or(true, |t| p.pattern_type == t))
            .filter(|p| brain_region.map_or(true, |r| p.brain_region == r))
            .cloned()
            .collect();
        patterns.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then_with(|| a.id.cmp(&b.id)));
        patterns.truncate(limit);
        patterns
    }

    pub async fn feedback_for_pattern(&self, pattern_id: &str) -> Vec<FeedbackRecord> {
        self.store.read().await.ledger().by_pattern(pattern_id)
    }

    pub async fn feedback_for_user(&self, user_id: &str) -> Vec<FeedbackRecord> {
        self.store.read().await.ledger().by_user(user_id)
    }

    /// Write all state to disk
    pub async fn flush(&self) -> Result<()> {
        let store = self.store.read().await;
        if let Err(e) = store.save() {
            warn!("Failed to flush learning state: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::feedback::FeedbackType;
    use tempfile::tempdir;

    fn engine() -> LearningEngine {
        LearningEngine::in_memory(LearningConfig::default())
    }

    fn interaction(ctx: &str, score: f64) -> Interaction {
        Interaction::new(ctx, "did the thing", score, BrainRegion::FrontalLobe)
    }

    #[tokio::test]
    async fn test_significance_gate() {
        let engine = engine();
        let id = engine.learn(interaction("low quality exchange", 0.5)).await.unwrap();
        assert!(id.is_none());
        assert_eq!(engine.stats().await.total_patterns, 0);
    }

    #[tokio::test]
    async fn test_out_of_range_score_rejected() {
        let engine = engine();
        let err = engine.learn(interaction("ctx", 1.2)).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        let err = engine.learn(interaction("   ", 0.9)).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_near_duplicate_merges() {
        let engine = engine();
        let first = engine.learn(interaction("summarize my inbox", 0.8)).await.unwrap();
        let second = engine.learn(interaction("summarize my inbox", 1.0)).await.unwrap();
        assert_eq!(first, second);

        let pattern = engine.get_pattern(&first.unwrap()).await.unwrap();
        assert_eq!(pattern.usage_count, 2);
        assert!((pattern.effectiveness_score - 0.82).abs() < 1e-9);
        assert_eq!(engine.stats().await.total_patterns, 1);
    }

    #[tokio::test]
    async fn test_different_region_does_not_merge() {
        let engine = engine();
        engine.learn(interaction("summarize my inbox", 0.8)).await.unwrap();
        engine
            .learn(Interaction::new("summarize my inbox", "x", 0.8, BrainRegion::Cerebellum))
            .await
            .unwrap();
        assert_eq!(engine.stats().await.total_patterns, 2);
    }

    #[tokio::test]
    async fn test_feedback_updates_effectiveness() {
        let engine = engine();
        let id = engine.learn(interaction("plan my week", 1.0)).await.unwrap().unwrap();

        engine
            .record_feedback(Feedback::new(&id, "alice", FeedbackType::Negative, -1.0, "did the thing"))
            .await
            .unwrap();
        let p = engine.get_pattern(&id).await.unwrap();
        assert!((p.effectiveness_score - 0.8).abs() < 1e-9);
        assert_eq!(engine.feedback_for_pattern(&id).await.len(), 1);
        assert_eq!(engine.feedback_for_user("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_unknown_pattern() {
        let engine = engine();
        let err = engine
            .record_feedback(Feedback::new("missing", "alice", FeedbackType::Positive, 1.0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
        assert_eq!(engine.stats().await.total_feedback, 0);
    }

    #[tokio::test]
    async fn test_correction_learns_new_pattern() {
        let engine = engine();
        let id = engine.learn(interaction("convert 5 miles to km", 0.9)).await.unwrap().unwrap();

        engine
            .record_feedback(
                Feedback::new(&id, "bob", FeedbackType::Correction, 0.6, "did the thing")
                    .with_correction("5 miles is 8.05 km"),
            )
            .await
            .unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats.total_patterns, 2);
        let corrected = engine
            .list_patterns(None, None, 10)
            .await
            .into_iter()
            .find(|p| p.id != id)
            .unwrap();
        assert_eq!(corrected.successful_output, "5 miles is 8.05 km");
        assert!((corrected.success_score - 1.0).abs() < 1e-9);
        assert_eq!(corrected.metadata.get("source").and_then(|v| v.as_str()), Some("user_correction"));
        assert_eq!(
            corrected.metadata.get("original_pattern").and_then(|v| v.as_str()),
            Some(id.as_str())
        );
    }

    #[tokio::test]
    async fn test_negative_correction_is_not_learned() {
        let engine = engine();
        let id = engine.learn(interaction("convert 5 miles to km", 0.9)).await.unwrap().unwrap();
        engine
            .record_feedback(
                Feedback::new(&id, "bob", FeedbackType::Correction, -0.2, "x").with_correction("y"),
            )
            .await
            .unwrap();
        assert_eq!(engine.stats().await.total_patterns, 1);
    }

    #[tokio::test]
    async fn test_suggestions_limited_to_region() {
        let engine = engine();
        for ctx in ["check the build", "check the tests", "check the lint", "check the docs"] {
            engine
                .learn(Interaction::new(ctx, format!("ran {}", ctx), 0.9, BrainRegion::Cerebellum))
                .await
                .unwrap();
        }
        engine.learn(interaction("check the build", 0.9)).await.unwrap();

        let suggestions = engine.suggestions("check the build", BrainRegion::Cerebellum).await;
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions.iter().all(|s| s.brain_region == BrainRegion::Cerebellum));
        assert_eq!(suggestions[0].suggested_approach, "ran check the build");
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let engine = engine();
        engine.learn(interaction("alpha task", 0.8)).await.unwrap();
        engine
            .learn(interaction("beta job", 1.0).with_pattern_type("tool_usage"))
            .await
            .unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats.total_patterns, 2);
        assert_eq!(stats.patterns_by_type.get("tool_usage"), Some(&1));
        assert_eq!(stats.patterns_by_region.get("FRONTAL_LOBE"), Some(&2));
        assert!((stats.average_effectiveness - 0.9).abs() < 1e-9);
        assert_eq!(stats.most_used_patterns.len(), 2);

        let health = engine.health().await;
        assert!(health.vectorizer_fitted);
        assert!(!health.persistent);
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());

        let engine = LearningEngine::open(LearningConfig::default(), paths.clone());
        let id = engine.learn(interaction("book a table for two", 0.9)).await.unwrap().unwrap();
        engine
            .record_feedback(Feedback::new(&id, "carol", FeedbackType::Positive, 1.0, "ok"))
            .await
            .unwrap();

        let reopened = LearningEngine::open(LearningConfig::default(), paths);
        let stats = reopened.stats().await;
        assert_eq!(stats.total_patterns, 1);
        assert_eq!(stats.total_feedback, 1);
        assert!(reopened.get_pattern(&id).await.is_ok());
    }
}
