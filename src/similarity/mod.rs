//! Local text similarity
//!
//! TF-IDF cosine for ranking, plus two cheap pairwise measures: a two-document
//! TF-IDF cosine used to detect near-duplicate patterns, and word-set overlap
//! used before the index has enough data.

pub mod index;
pub mod tfidf;
pub mod tokenize;

use std::collections::HashSet;

pub use index::{cosine, SimilarityIndex};
pub use tfidf::{TermVector, TfidfVectorizer};
pub use tokenize::{content_tokens, tokenize};

/// TF-IDF cosine between two texts fitted on just the pair, every token kept.
/// Returns 0.0 when either text has no tokens.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let vectorizer = TfidfVectorizer::fit_unfiltered(&[a, b]);
    if vectorizer.is_empty() {
        return 0.0;
    }
    cosine(&vectorizer.transform(a), &vectorizer.transform(b))
}

/// Jaccard overlap of lowercase whitespace-separated words
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let a_words: HashSet<&str> = a_lower.split_whitespace().collect();
    let b_words: HashSet<&str> = b_lower.split_whitespace().collect();

    let union = a_words.union(&b_words).count();
    if union == 0 {
        return 0.0;
    }
    a_words.intersection(&b_words).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_similarity() {
        assert!((text_similarity("check the weather", "check the weather") - 1.0).abs() < 1e-9);
        assert!(text_similarity("check the weather", "check the weather please") > 0.7);
        assert_eq!(text_similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(text_similarity("", "gamma delta"), 0.0);
        assert_eq!(text_similarity("", ""), 0.0);
    }

    #[test]
    fn test_word_overlap() {
        let score = word_overlap("weather in Paris today", "user asks about weather in Paris");
        assert!((score - 3.0 / 7.0).abs() < 1e-9);
        assert_eq!(word_overlap("", ""), 0.0);
        assert_eq!(word_overlap("Same words", "same WORDS"), 1.0);
    }
}
