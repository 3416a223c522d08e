//! TF-IDF vectorizer
//!
//! Raw term counts weighted by smoothed inverse document frequency
//! (`ln((1 + n) / (1 + df)) + 1`) and L2-normalized. The vocabulary keeps the
//! `max_features` most frequent terms across the corpus, ties broken
//! alphabetically, so fitting the same corpus always yields the same model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::tokenize::{content_tokens, tokenize};

/// Sparse, L2-normalized term vector sorted by term index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermVector {
    entries: Vec<(usize, f64)>,
}

impl TermVector {
    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn norm(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt()
    }

    pub fn dot(&self, other: &TermVector) -> f64 {
        let (mut i, mut j, mut sum) = (0, 0, 0.0);
        while i < self.entries.len() && j < other.entries.len() {
            let (a_idx, a_w) = self.entries[i];
            let (b_idx, b_w) = other.entries[j];
            match a_idx.cmp(&b_idx) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += a_w * b_w;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Fitted TF-IDF model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    max_features: Option<usize>,
    stop_words: bool,
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
    n_docs: usize,
}

impl TfidfVectorizer {
    /// Fit over a corpus with English stop words removed
    pub fn fit<S: AsRef<str>>(corpus: &[S], max_features: usize) -> Self {
        Self::fit_with(corpus, Some(max_features), true)
    }

    /// Fit with every token kept and no vocabulary cap
    pub fn fit_unfiltered<S: AsRef<str>>(corpus: &[S]) -> Self {
        Self::fit_with(corpus, None, false)
    }

    fn fit_with<S: AsRef<str>>(corpus: &[S], max_features: Option<usize>, stop_words: bool) -> Self {
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let tokens = analyze(doc.as_ref(), stop_words);
            let mut seen = HashSet::new();
            for token in tokens {
                *term_counts.entry(token.clone()).or_default() += 1;
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = max_features {
            ranked.truncate(limit);
        }

        let mut terms: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort();

        let n_docs = corpus.len();
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(terms.len());
        for (index, term) in terms.into_iter().enumerate() {
            let df = doc_freq.get(&term).copied().unwrap_or(0);
            idf.push(((1.0 + n_docs as f64) / (1.0 + df as f64)).ln() + 1.0);
            vocabulary.insert(term, index);
        }

        Self {
            max_features,
            stop_words,
            vocabulary,
            idf,
            n_docs,
        }
    }

    /// Project text into the fitted vocabulary. Unknown terms are dropped.
    pub fn transform(&self, text: &str) -> TermVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for token in analyze(text, self.stop_words) {
            if let Some(&index) = self.vocabulary.get(&token) {
                *counts.entry(index).or_default() += 1.0;
            }
        }

        let mut entries: Vec<(usize, f64)> = counts
            .into_iter()
            .filter_map(|(index, tf)| self.idf.get(index).map(|idf| (index, tf * idf)))
            .collect();

        let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in entries.iter_mut() {
                *w /= norm;
            }
        }
        TermVector { entries }
    }

    /// Check a deserialized model before use: one finite idf weight per term
    /// and every term index in range.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.idf.len() != self.vocabulary.len() {
            return Err(format!(
                "{} idf weights for {} terms",
                self.idf.len(),
                self.vocabulary.len()
            ));
        }
        if let Some((term, index)) = self.vocabulary.iter().find(|(_, &i)| i >= self.idf.len()) {
            return Err(format!("term '{}' has out-of-range index {}", term, index));
        }
        if self.idf.iter().any(|w| !w.is_finite()) {
            return Err("non-finite idf weight".to_string());
        }
        Ok(())
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// Number of documents the model was fitted on
    pub fn n_docs(&self) -> usize {
        self.n_docs
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.vocabulary.contains_key(term)
    }
}

fn analyze(text: &str, stop_words: bool) -> Vec<String> {
    if stop_words {
        content_tokens(text)
    } else {
        tokenize(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_drops_stop_words() {
        let v = TfidfVectorizer::fit(&["the weather in Paris", "the weather in Rome"], 1000);
        assert!(v.contains_term("weather"));
        assert!(v.contains_term("paris"));
        assert!(!v.contains_term("the"));
        assert_eq!(v.vocabulary_len(), 3);
        assert_eq!(v.n_docs(), 2);
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let v = TfidfVectorizer::fit(&["alpha alpha beta", "alpha gamma", "delta"], 1);
        assert_eq!(v.vocabulary_len(), 1);
        assert!(v.contains_term("alpha"));
    }

    #[test]
    fn test_transform_is_normalized() {
        let v = TfidfVectorizer::fit(&["rust borrow checker", "python garbage collector"], 1000);
        let vec = v.transform("borrow checker rules");
        assert_eq!(vec.entries().len(), 2);
        assert!((vec.norm() - 1.0).abs() < 1e-9);
        assert!(v.transform("completely unrelated").is_empty());
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let v = TfidfVectorizer::fit(&["weather paris", "weather rome", "weather tokyo"], 1000);
        let vec = v.transform("weather paris");
        let weights: Vec<f64> = vec.entries().iter().map(|(_, w)| *w).collect();
        // vocabulary is sorted: paris < weather
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn test_serde_round_trip() {
        let v = TfidfVectorizer::fit(&["one thing", "another thing"], 1000);
        let json = serde_json::to_string(&v).unwrap();
        let back: TfidfVectorizer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.transform("thing"), v.transform("thing"));
    }

    #[test]
    fn test_consistency_check() {
        let v = TfidfVectorizer::fit(&["red apple", "green apple"], 1000);
        assert!(v.check_consistency().is_ok());

        let mut truncated = v.clone();
        truncated.idf.clear();
        assert!(truncated.check_consistency().is_err());
        // transform never indexes past the weights
        assert!(truncated.transform("red apple").is_empty());

        let mut shifted = v.clone();
        if let Some(index) = shifted.vocabulary.get_mut("red") {
            *index = 99;
        }
        assert!(shifted.check_consistency().is_err());

        let mut infinite = v;
        infinite.idf[0] = f64::INFINITY;
        assert!(infinite.check_consistency().is_err());
    }
}
