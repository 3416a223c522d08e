//! Pattern Store - persistent storage for learning patterns and feedback
//!
//! Owns the pattern and feedback collections and the similarity index derived
//! from them. Both collections are written as pretty JSON arrays; the fitted
//! vectorizer sits next to them as a JSON artifact.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::feedback::{FeedbackLedger, FeedbackRecord};
use super::pattern::{LearningPattern, RetrievedPattern};
use crate::error::Result;
use crate::persist::write_json;
use crate::similarity::{text_similarity, word_overlap, SimilarityIndex};
use crate::types::BrainRegion;

const SIMILARITY_WEIGHT: f64 = 0.7;
const EFFECTIVENESS_WEIGHT: f64 = 0.3;

/// Locations of the persisted state
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub patterns: PathBuf,
    pub feedback: PathBuf,
    pub vectorizer: PathBuf,
}

impl StorePaths {
    /// Default file names inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            patterns: dir.join("learning_patterns.json"),
            feedback: dir.join("feedback_records.json"),
            vectorizer: dir.join("vectorizer.json"),
        }
    }
}

pub struct PatternStore {
    patterns: BTreeMap<String, LearningPattern>,
    ledger: FeedbackLedger,
    index: SimilarityIndex,
    paths: Option<StorePaths>,
}

impl PatternStore {
    /// Store that never touches disk
    pub fn in_memory(max_features: usize) -> Self {
        Self {
            patterns: BTreeMap::new(),
            ledger: FeedbackLedger::new(),
            index: SimilarityIndex::new(max_features),
            paths: None,
        }
    }

    /// Load state from `paths`. Unreadable files and malformed records are
    /// skipped with a warning.
    pub fn open(paths: StorePaths, max_features: usize) -> Self {
        let mut patterns = BTreeMap::new();
        for pattern in load_records::<LearningPattern>(&paths.patterns, "pattern") {
            if let Err(e) = pattern.validate() {
                warn!("Skipping pattern {}: {}", pattern.id, e);
                continue;
            }
            if patterns.contains_key(&pattern.id) {
                warn!("Skipping duplicate pattern {}", pattern.id);
                continue;
            }
            patterns.insert(pattern.id.clone(), pattern);
        }

        let feedback: Vec<FeedbackRecord> = load_records(&paths.feedback, "feedback record")
            .into_iter()
            .filter(|r: &FeedbackRecord| {
                let valid = (-1.0..=1.0).contains(&r.feedback_score);
                if !valid {
                    warn!("Skipping feedback {}: score {} out of range", r.id, r.feedback_score);
                }
                valid
            })
            .collect();

        info!(
            "Loaded {} learning patterns and {} feedback records",
            patterns.len(),
            feedback.len()
        );

        let mut store = Self {
            patterns,
            ledger: FeedbackLedger::from_records(feedback),
            index: SimilarityIndex::new(max_features),
            paths: Some(paths),
        };
        store.restore_index();
        store
    }

    fn restore_index(&mut self) {
        let stored = match &self.paths {
            Some(paths) => match SimilarityIndex::load_vectorizer(&paths.vectorizer) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Ignoring vectorizer artifact: {}", e);
                    None
                }
            },
            None => None,
        };
        let corpus = self
            .patterns
            .values()
            .map(|p| (p.id.as_str(), p.input_context.as_str()));
        match stored {
            Some(vectorizer) => self.index.restore(vectorizer, corpus),
            None => self.index.rebuild(corpus),
        }
    }

    /// Refit the similarity index over every stored pattern
    pub fn rebuild_index(&mut self) {
        self.index.rebuild(
            self.patterns
                .values()
                .map(|p| (p.id.as_str(), p.input_context.as_str())),
        );
    }

    pub fn get(&self, id: &str) -> Option<&LearningPattern> {
        self.patterns.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LearningPattern> {
        self.patterns.get_mut(id)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &LearningPattern> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn ledger(&self) -> &FeedbackLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut FeedbackLedger {
        &mut self.ledger
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Most similar pattern with the same type and region whose context
    /// similarity reaches `threshold`, skipping `exclude`
    pub fn find_similar(
        &self,
        input_context: &str,
        pattern_type: &str,
        brain_region: BrainRegion,
        threshold: f64,
        exclude: Option<&str>,
    ) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;
        for p in self.patterns.values() {
            if p.pattern_type != pattern_type || p.brain_region != brain_region {
                continue;
            }
            if exclude == Some(p.id.as_str()) {
                continue;
            }
            let sim = text_similarity(input_context, &p.input_context);
            if sim >= threshold && best.map_or(true, |(_, s)| sim > s) {
                best = Some((p.id.as_str(), sim));
            }
        }
        best.map(|(id, sim)| {
            debug!("Near-duplicate of {} (similarity {:.3})", id, sim);
            id.to_string()
        })
    }

    /// Insert a new pattern, evicting the weakest pattern of the same type when
    /// the type is at `max_per_type`. Returns the evicted id. The index is not
    /// rebuilt here.
    pub fn insert(&mut self, pattern: LearningPattern, max_per_type: usize) -> Option<String> {
        let same_type: Vec<&LearningPattern> = self
            .patterns
            .values()
            .filter(|p| p.pattern_type == pattern.pattern_type)
            .collect();

        let evicted = if max_per_type > 0 && same_type.len() >= max_per_type {
            same_type
                .into_iter()
                .min_by(|a, b| {
                    a.effectiveness_score
                        .partial_cmp(&b.effectiveness_score)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|p| p.id.clone())
        } else {
            None
        };

        if let Some(id) = &evicted {
            self.patterns.remove(id);
            info!("Evicted pattern {} (type {} at capacity)", id, pattern.pattern_type);
        }
        self.patterns.insert(pattern.id.clone(), pattern);
        evicted
    }

    /// Rank patterns against `query` by `0.7 * similarity + 0.3 * effectiveness`.
    ///
    /// Uses TF-IDF cosine once the index holds at least two vectors, word
    /// overlap before that. Ties go to higher usage, then older patterns, then id.
    pub fn rank(
        &self,
        query: &str,
        pattern_type: Option<&str>,
        brain_region: Option<BrainRegion>,
        limit: usize,
    ) -> Vec<RetrievedPattern> {
        let query_vector = if self.index.is_ready() {
            self.index.query_vector(query)
        } else {
            None
        };

        let mut results: Vec<RetrievedPattern> = self
            .patterns
            .values()
            .filter(|p| pattern_type.map_or(true, |t| p.pattern_type == t))
            .filter(|p| brain_region.map_or(true, |r| p.brain_region == r))
            .map(|p| {
                let similarity = match &query_vector {
                    Some(qv) => self.index.similarity_to(qv, &p.id),
                    None => word_overlap(query, &p.input_context),
                };
                RetrievedPattern {
                    score: SIMILARITY_WEIGHT * similarity + EFFECTIVENESS_WEIGHT * p.effectiveness_score,
                    similarity,
                    pattern: p.clone(),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.pattern.usage_count.cmp(&a.pattern.usage_count))
                .then_with(|| a.pattern.created_at.cmp(&b.pattern.created_at))
                .then_with(|| a.pattern.id.cmp(&b.pattern.id))
        });
        results.truncate(limit);
        results
    }

    /// Remove patterns created before `cutoff` that are both ineffective and
    /// rarely used. Rebuilds the index when anything was removed.
    pub fn remove_stale(&mut self, cutoff: DateTime<Utc>, min_effectiveness: f64, min_usage: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .patterns
            .values()
            .filter(|p| {
                p.created_at < cutoff && p.effectiveness_score < min_effectiveness && p.usage_count < min_usage
            })
            .map(|p| p.id.clone())
            .collect();

        for id in &stale {
            self.patterns.remove(id);
            info!("Removed old pattern: {}", id);
        }
        if !stale.is_empty() {
            self.rebuild_index();
        }
        stale
    }

    pub fn is_persistent(&self) -> bool {
        self.paths.is_some()
    }

    /// Write patterns and the vectorizer artifact
    pub fn save_patterns(&self) -> Result<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let records: Vec<&LearningPattern> = self.patterns.values().collect();
        write_json(&paths.patterns, &records)?;
        self.index.save_vectorizer(&paths.vectorizer)
    }

    pub fn save_feedback(&self) -> Result<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        write_json(&paths.feedback, self.ledger.records())
    }

    pub fn save(&self) -> Result<()> {
        self.save_patterns()?;
        self.save_feedback()
    }
}

/// Read a JSON array, keeping the elements that decode as `T`
fn load_records<T: DeserializeOwned>(path: &Path, kind: &str) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let values: Vec<serde_json::Value> = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value::<T>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed {} #{} in {}: {}", kind, i, path.display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::pattern::Interaction;
    use tempfile::tempdir;

    fn pattern(ctx: &str, ptype: &str, eff: f64) -> LearningPattern {
        let mut p = LearningPattern::from_interaction(
            Interaction::new(ctx, "out", 0.9, BrainRegion::FrontalLobe).with_pattern_type(ptype),
        );
        p.effectiveness_score = eff;
        p
    }

    #[test]
    fn test_find_similar_respects_type_and_region() {
        let mut store = PatternStore::in_memory(1000);
        let p = pattern("summarize the meeting notes", "conversation", 0.9);
        let id = p.id.clone();
        store.insert(p, 0);

        let found = store.find_similar("summarize the meeting notes", "conversation", BrainRegion::FrontalLobe, 0.8, None);
        assert_eq!(found, Some(id));
        assert!(store
            .find_similar("summarize the meeting notes", "tool_usage", BrainRegion::FrontalLobe, 0.8, None)
            .is_none());
        assert!(store
            .find_similar("summarize the meeting notes", "conversation", BrainRegion::Cerebellum, 0.8, None)
            .is_none());
        assert!(store
            .find_similar("book a flight", "conversation", BrainRegion::FrontalLobe, 0.8, None)
            .is_none());
    }

    #[test]
    fn test_insert_evicts_weakest_of_type() {
        let mut store = PatternStore::in_memory(1000);
        let weak = pattern("weak", "conversation", 0.2);
        let weak_id = weak.id.clone();
        store.insert(weak, 2);
        store.insert(pattern("strong", "conversation", 0.9), 2);
        store.insert(pattern("other type", "tool_usage", 0.1), 2);

        let evicted = store.insert(pattern("newcomer", "conversation", 0.8), 2);
        assert_eq!(evicted, Some(weak_id));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_rank_falls_back_to_word_overlap() {
        let mut store = PatternStore::in_memory(1000);
        store.insert(pattern("user asks about weather in Paris", "tool_usage", 0.9), 0);
        store.rebuild_index();
        assert!(!store.index().is_ready());

        let ranked = store.rank("weather in Paris today", Some("tool_usage"), None, 5);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].similarity - 3.0 / 7.0).abs() < 1e-9);
        assert!(ranked[0].score > 0.3);
    }

    #[test]
    fn test_rank_filters_and_orders() {
        let mut store = PatternStore::in_memory(1000);
        store.insert(pattern("deploy the web service", "tool_usage", 0.5), 0);
        store.insert(pattern("deploy the database", "tool_usage", 0.9), 0);
        store.insert(pattern("recipe for pancakes", "conversation", 1.0), 0);
        store.rebuild_index();

        let ranked = store.rank("deploy web service", Some("tool_usage"), None, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].pattern.input_context, "deploy the web service");
        assert!(ranked[0].score >= ranked[1].score);

        let limited = store.rank("deploy", None, None, 1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_remove_stale() {
        let mut store = PatternStore::in_memory(1000);
        let mut old = pattern("old and weak", "conversation", 0.4);
        old.created_at = Utc::now() - chrono::Duration::days(31);
        let mut old_used = old.clone();
        old_used.id = "kept".into();
        old_used.usage_count = 5;
        store.insert(old, 0);
        store.insert(old_used, 0);
        store.insert(pattern("fresh", "conversation", 0.1), 0);

        let removed = store.remove_stale(Utc::now() - chrono::Duration::days(30), 0.5, 3);
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 2);
        assert!(store.get("kept").is_some());
    }

    #[test]
    fn test_open_skips_malformed_records() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());

        let good = pattern("valid context", "conversation", 0.8);
        let mut out_of_range = serde_json::to_value(pattern("bad score", "conversation", 0.8)).unwrap();
        out_of_range["effectiveness_score"] = serde_json::json!(1.7);
        let records = serde_json::json!([
            serde_json::to_value(&good).unwrap(),
            {"id": "broken", "pattern_type": 42},
            out_of_range,
        ]);
        std::fs::write(&paths.patterns, records.to_string()).unwrap();
        std::fs::write(&paths.feedback, "not json").unwrap();

        let store = PatternStore::open(paths, 1000);
        assert_eq!(store.len(), 1);
        assert!(store.get(&good.id).is_some());
        assert!(store.ledger().is_empty());
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());

        let mut store = PatternStore::open(paths.clone(), 1000);
        store.insert(pattern("first context here", "conversation", 0.8), 0);
        store.insert(pattern("second context there", "conversation", 0.7), 0);
        store.rebuild_index();
        store.save().unwrap();
        assert!(paths.vectorizer.exists());

        let reopened = PatternStore::open(paths, 1000);
        assert_eq!(reopened.len(), 2);
        assert!(reopened.index().is_ready());
    }

    #[test]
    fn test_rank_breaks_score_ties_by_usage_then_age() {
        let mut store = PatternStore::in_memory(1000);
        let now = Utc::now();
        for (id, usage, hours_ago) in [("older", 1, 2), ("busy", 5, 1), ("newer", 1, 1)] {
            let mut p = pattern("rotate the api keys", "tool_usage", 0.8);
            p.id = id.into();
            p.usage_count = usage;
            p.created_at = now - chrono::Duration::hours(hours_ago);
            store.insert(p, 0);
        }
        store.rebuild_index();

        let ranked = store.rank("rotate keys", None, None, 10);
        assert_eq!(ranked[0].score, ranked[2].score);
        let ids: Vec<&str> = ranked.iter().map(|r| r.pattern.id.as_str()).collect();
        assert_eq!(ids, vec!["busy", "older", "newer"]);
    }

    #[test]
    fn test_open_refits_inconsistent_vectorizer() {
        let dir = tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());
        let mut store = PatternStore::open(paths.clone(), 1000);
        store.insert(pattern("restart the web server", "tool_usage", 0.8), 0);
        store.insert(pattern("clear the build cache", "tool_usage", 0.7), 0);
        store.rebuild_index();
        store.save().unwrap();
        let expected = store.rank("restart server", None, None, 5);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.vectorizer).unwrap()).unwrap();
        let mut no_weights = saved.clone();
        no_weights["idf"] = serde_json::json!([]);
        let mut bad_index = saved;
        if let Some(vocab) = bad_index["vocabulary"].as_object_mut() {
            for value in vocab.values_mut() {
                *value = serde_json::json!(999);
            }
        }

        for corrupt in [no_weights, bad_index] {
            std::fs::write(&paths.vectorizer, corrupt.to_string()).unwrap();
            let reopened = PatternStore::open(paths.clone(), 1000);
            assert!(reopened.index().is_ready());
            let ranked = reopened.rank("restart server", None, None, 5);
            assert_eq!(ranked.len(), expected.len());
            assert_eq!(ranked[0].pattern.id, expected[0].pattern.id);
            assert!((ranked[0].score - expected[0].score).abs() < 1e-12);
        }
    }
}
