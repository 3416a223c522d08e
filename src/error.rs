//! Error taxonomy for the learning and conversation core
//!
//! Validation and not-found errors go straight back to the caller. Persistence
//! errors report the failed save while the in-memory state stays authoritative.
//! Computation errors are absorbed by the similarity layer and never escape
//! retrieval.

use std::path::PathBuf;

/// Errors produced by the memory core
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Missing or out-of-range input
    #[error("invalid input: {0}")]
    Validation(String),

    /// Referenced session, pattern, flow or agent does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Reading or writing a state file failed
    #[error("failed to access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state file could not be encoded or decoded
    #[error("failed to encode or decode {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Vectorizer or similarity failure
    #[error("similarity computation failed: {0}")]
    Computation(String),
}

impl MemoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MemoryError::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        MemoryError::NotFound { kind, id: id.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MemoryError::Persistence { path: path.into(), source }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        MemoryError::Serialization { path: path.into(), source }
    }

    /// True for errors caused by the caller's input rather than the environment
    pub fn is_caller_error(&self) -> bool {
        matches!(self, MemoryError::Validation(_) | MemoryError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Check that a score lies inside `[min, max]`
pub(crate) fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_nan() || value < min || value > max {
        return Err(MemoryError::validation(format!(
            "{} must be within [{}, {}], got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range("success_score", 0.0, 0.0, 1.0).is_ok());
        assert!(check_range("success_score", 1.0, 0.0, 1.0).is_ok());
        assert!(check_range("success_score", 1.01, 0.0, 1.0).is_err());
        assert!(check_range("feedback_score", -1.5, -1.0, 1.0).is_err());
        assert!(check_range("feedback_score", f64::NAN, -1.0, 1.0).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = MemoryError::not_found("session", "abc");
        assert_eq!(err.to_string(), "session not found: abc");
        assert!(err.is_caller_error());

        let err = MemoryError::io("/tmp/x.json", std::io::Error::other("disk full"));
        assert!(err.to_string().contains("/tmp/x.json"));
        assert!(!err.is_caller_error());
    }
}
