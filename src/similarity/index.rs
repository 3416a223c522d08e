//! Similarity index over pattern input contexts
//!
//! A derived view of the pattern store: one TF-IDF vector per pattern, keyed by
//! pattern id. Never mutated in place; callers rebuild it after every insert or
//! delete.

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::tfidf::{TermVector, TfidfVectorizer};
use crate::error::{MemoryError, Result};
use crate::persist::write_atomic;

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    max_features: usize,
    vectorizer: Option<TfidfVectorizer>,
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    vectors: Vec<TermVector>,
}

impl SimilarityIndex {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            vectorizer: None,
            ids: Vec::new(),
            positions: HashMap::new(),
            vectors: Vec::new(),
        }
    }

    /// Refit the vectorizer over `(id, text)` pairs. An empty corpus clears the index.
    pub fn rebuild<'a, I>(&mut self, corpus: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (ids, texts): (Vec<&str>, Vec<&str>) = corpus.into_iter().unzip();
        if texts.is_empty() {
            self.clear();
            return;
        }
        let vectorizer = TfidfVectorizer::fit(&texts, self.max_features);
        self.install(vectorizer, &ids, &texts);
        debug!(
            "Rebuilt similarity index: {} vectors, {} terms",
            self.vectors.len(),
            self.vocabulary_len()
        );
    }

    /// Reuse a previously fitted vectorizer for the given corpus.
    /// Falls back to a refit when the model was fitted on a different corpus size.
    pub fn restore<'a, I>(&mut self, vectorizer: TfidfVectorizer, corpus: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (ids, texts): (Vec<&str>, Vec<&str>) = corpus.into_iter().unzip();
        if vectorizer.n_docs() != texts.len() || texts.is_empty() {
            debug!(
                "Stored vectorizer covers {} documents, corpus has {}; refitting",
                vectorizer.n_docs(),
                texts.len()
            );
            self.rebuild(ids.into_iter().zip(texts));
            return;
        }
        self.install(vectorizer, &ids, &texts);
    }

    fn install(&mut self, vectorizer: TfidfVectorizer, ids: &[&str], texts: &[&str]) {
        self.vectors = texts.iter().map(|t| vectorizer.transform(t)).collect();
        self.ids = ids.iter().map(|id| id.to_string()).collect();
        self.positions = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        self.vectorizer = Some(vectorizer);
    }

    pub fn clear(&mut self) {
        self.vectorizer = None;
        self.ids.clear();
        self.positions.clear();
        self.vectors.clear();
    }

    pub fn is_fitted(&self) -> bool {
        self.vectorizer.is_some()
    }

    /// Enough data for TF-IDF ranking to mean anything
    pub fn is_ready(&self) -> bool {
        self.vectors.len() >= 2 && self.vocabulary_len() > 0
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vectorizer.as_ref().map(|v| v.vocabulary_len()).unwrap_or(0)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Project a query into the fitted vocabulary
    pub fn query_vector(&self, query: &str) -> Option<TermVector> {
        self.vectorizer.as_ref().map(|v| v.transform(query))
    }

    pub fn try_similarity(&self, query: &str, index: usize) -> Result<f64> {
        let vectorizer = self
            .vectorizer
            .as_ref()
            .ok_or_else(|| MemoryError::Computation("vectorizer not fitted".into()))?;
        let stored = self.vectors.get(index).ok_or_else(|| {
            MemoryError::Computation(format!(
                "index {} out of range for {} vectors",
                index,
                self.vectors.len()
            ))
        })?;
        Ok(cosine(&vectorizer.transform(query), stored))
    }

    /// Cosine similarity between `query` and the vector at `index`; 0.0 on any failure
    pub fn similarity(&self, query: &str, index: usize) -> f64 {
        match self.try_similarity(query, index) {
            Ok(score) => score,
            Err(e) => {
                debug!("Similarity degraded to 0.0: {}", e);
                0.0
            }
        }
    }

    /// Similarity of a projected query to the pattern with `id`
    pub fn similarity_to(&self, query: &TermVector, id: &str) -> f64 {
        self.position(id)
            .and_then(|i| self.vectors.get(i))
            .map(|stored| cosine(query, stored))
            .unwrap_or(0.0)
    }

    pub fn vectorizer(&self) -> Option<&TfidfVectorizer> {
        self.vectorizer.as_ref()
    }

    pub fn save_vectorizer(&self, path: &Path) -> Result<()> {
        let Some(vectorizer) = &self.vectorizer else {
            // Nothing fitted; drop any stale artifact
            if path.exists() {
                std::fs::remove_file(path).map_err(|e| MemoryError::io(path, e))?;
            }
            return Ok(());
        };
        let json = serde_json::to_string(vectorizer).map_err(|e| MemoryError::json(path, e))?;
        write_atomic(path, json.as_bytes())
    }

    pub fn load_vectorizer(path: &Path) -> Result<Option<TfidfVectorizer>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| MemoryError::io(path, e))?;
        let vectorizer: TfidfVectorizer =
            serde_json::from_str(&content).map_err(|e| MemoryError::json(path, e))?;
        vectorizer
            .check_consistency()
            .map_err(|e| MemoryError::Computation(format!("{}: {}", path.display(), e)))?;
        info!(
            "Loaded vectorizer from {} ({} terms)",
            path.display(),
            vectorizer.vocabulary_len()
        );
        Ok(Some(vectorizer))
    }
}

/// Cosine similarity of two sparse vectors, 0.0 when either is empty
pub fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let denom = a.norm() * b.norm();
    if denom == 0.0 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Vec<(&'static str, &'static str)> {
        vec![
            ("a", "user asks about weather in Paris"),
            ("b", "user wants to store a grocery list"),
            ("c", "deploy the service to production"),
        ]
    }

    #[test]
    fn test_unfitted_similarity_is_zero() {
        let index = SimilarityIndex::new(1000);
        assert!(!index.is_fitted());
        assert_eq!(index.similarity("anything", 0), 0.0);
        assert!(index.try_similarity("anything", 0).is_err());
    }

    #[test]
    fn test_rebuild_and_query() {
        let mut index = SimilarityIndex::new(1000);
        index.rebuild(sample());
        assert!(index.is_ready());
        assert_eq!(index.len(), 3);

        let pos = index.position("a").unwrap();
        let weather = index.similarity("weather in Paris today", pos);
        let other = index.similarity("weather in Paris today", index.position("c").unwrap());
        assert!(weather > 0.5);
        assert_eq!(other, 0.0);
        assert_eq!(index.similarity("weather", 99), 0.0);
    }

    #[test]
    fn test_rebuild_empty_clears() {
        let mut index = SimilarityIndex::new(1000);
        index.rebuild(sample());
        index.rebuild(Vec::<(&str, &str)>::new());
        assert!(index.is_empty());
        assert!(!index.is_fitted());
    }

    #[test]
    fn test_vectorizer_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectorizer.json");

        let mut index = SimilarityIndex::new(1000);
        index.rebuild(sample());
        index.save_vectorizer(&path).unwrap();

        let loaded = SimilarityIndex::load_vectorizer(&path).unwrap().unwrap();
        let mut restored = SimilarityIndex::new(1000);
        restored.restore(loaded, sample());

        let q = "store my grocery list";
        for id in ["a", "b", "c"] {
            let qa = index.query_vector(q).unwrap();
            let qb = restored.query_vector(q).unwrap();
            assert_eq!(index.similarity_to(&qa, id), restored.similarity_to(&qb, id));
        }
    }

    #[test]
    fn test_restore_refits_on_size_mismatch() {
        let stale = TfidfVectorizer::fit(&["only one document"], 1000);
        let mut index = SimilarityIndex::new(1000);
        index.restore(stale, sample());
        assert_eq!(index.vectorizer().unwrap().n_docs(), 3);
    }
}
